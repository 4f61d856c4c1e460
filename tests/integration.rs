//! Integration tests for qrc-client.
//!
//! These drive a full engine against an in-process mock core listening on
//! a loopback port.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use qrc_client::protocol::{encode, Envelope, FrameBuffer};
use qrc_client::{
    CallbackError, ConnectionState, Credentials, Engine, EngineEvent, MethodResult, QrcError,
    RpcErrorKind, Topic,
};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

const WAIT: Duration = Duration::from_secs(2);

/// The core side of one connection.
struct Peer {
    stream: TcpStream,
    frames: FrameBuffer,
    queued: VecDeque<Envelope>,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Peer {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("no connection")
            .unwrap();
        Peer {
            stream,
            frames: FrameBuffer::new(),
            queued: VecDeque::new(),
        }
    }

    /// Next document from the engine, `None` on EOF.
    async fn try_next(&mut self) -> Option<Envelope> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(envelope) = self.queued.pop_front() {
                return Some(envelope);
            }
            let n = tokio::time::timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("engine sent nothing")
                .unwrap_or(0);
            if n == 0 {
                return None;
            }
            let parsed: Vec<Envelope> = self.frames.feed(&buf[..n]).map(|f| f.unwrap()).collect();
            self.queued.extend(parsed);
        }
    }

    async fn next(&mut self) -> Envelope {
        self.try_next().await.expect("connection closed")
    }

    async fn send(&mut self, envelope: &Envelope) {
        let bytes = encode(envelope).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }

    async fn reply(&mut self, request: &Envelope, result: Value) {
        self.send(&Envelope::success(request.id_u64().unwrap(), result))
            .await;
    }
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn engine_on(port: u16) -> Engine {
    Engine::builder()
        .port(port)
        .request_timeout(WAIT)
        .build()
        .unwrap()
}

async fn connected() -> (Arc<Engine>, Peer) {
    let (listener, port) = listener().await;
    let engine = engine_on(port);
    engine.connect().await.unwrap();
    let peer = Peer::accept(&listener).await;
    (Arc::new(engine), peer)
}

async fn next_event<F>(events: &mut broadcast::Receiver<EngineEvent>, wanted: F) -> EngineEvent
where
    F: Fn(&EngineEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not emitted")
}

#[tokio::test]
async fn test_control_set_resolves_and_clears_pending() {
    let (engine, mut peer) = connected().await;
    assert_eq!(engine.state(), ConnectionState::Ready);

    let call = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .call("Control.Set", json!({"name": "gain1", "value": -6.0}))
                .await
        })
    };

    let request = peer.next().await;
    assert_eq!(request.jsonrpc, "2.0");
    assert_eq!(request.method(), Some("Control.Set"));
    assert_eq!(request.params, Some(json!({"Name": "gain1", "Value": -6.0})));
    assert_eq!(engine.pending_requests(), 1);

    peer.reply(&request, json!(true)).await;

    assert_eq!(call.await.unwrap().unwrap(), MethodResult::Ack);
    assert_eq!(engine.pending_requests(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_resolve_out_of_order() {
    let (engine, mut peer) = connected().await;
    let names: Vec<String> = (0..8).map(|i| format!("gain{i}")).collect();

    let calls: Vec<_> = names
        .iter()
        .cloned()
        .map(|name| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let controls = engine.control_get(&[name.as_str()]).await.unwrap();
                (name, controls)
            })
        })
        .collect();

    let mut requests = Vec::new();
    for _ in 0..names.len() {
        requests.push(peer.next().await);
    }
    let mut ids: Vec<_> = requests.iter().map(|r| r.id_u64().unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), names.len(), "ids must be unique");

    for request in requests.iter().rev() {
        let name = request.params.as_ref().unwrap()[0].clone();
        peer.reply(request, json!([{"Name": name, "Value": 0.0}])).await;
    }

    for call in calls {
        let (name, controls) = call.await.unwrap();
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].name, name);
    }
    assert_eq!(engine.pending_requests(), 0);
}

#[tokio::test]
async fn test_timeout_then_late_response_is_dropped() {
    let (engine, mut peer) = connected().await;

    let call = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .call_with_timeout("StatusGet", Value::Null, Duration::from_millis(50))
                .await
        })
    };

    let request = peer.next().await;
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, QrcError::RequestTimeout { ref method, .. } if method == "StatusGet"));
    assert_eq!(engine.pending_requests(), 0);

    // Late answer for the expired id
    peer.reply(&request, json!({"State": "Active"})).await;

    let call = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.no_op().await })
    };
    let noop = peer.next().await;
    assert_eq!(noop.method(), Some("NoOp"));
    assert_ne!(noop.id, request.id);
    peer.reply(&noop, json!({})).await;

    call.await.unwrap().unwrap();
    assert_eq!(engine.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_server_drop_fails_every_pending_request() {
    let (engine, mut peer) = connected().await;
    let mut events = engine.events();

    let calls: Vec<_> = (0..3)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.status_get().await })
        })
        .collect();
    for _ in 0..3 {
        peer.next().await;
    }
    drop(peer);

    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, QrcError::ConnectionLost(_)), "got {err:?}");
    }
    next_event(&mut events, |e| matches!(e, EngineEvent::ConnectionLost { .. })).await;
    assert_eq!(engine.state(), ConnectionState::Disconnected);
    assert_eq!(engine.pending_requests(), 0);

    let err = engine.no_op().await.unwrap_err();
    assert!(matches!(err, QrcError::NotReady(ConnectionState::Disconnected)));
}

#[tokio::test]
async fn test_logon_accepted() {
    let (listener, port) = listener().await;
    let core = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let logon = peer.next().await;
        peer.reply(&logon, json!(true)).await;
        (logon, peer)
    });

    let engine = Engine::builder()
        .port(port)
        .credentials(Credentials::new("admin", "1234"))
        .build()
        .unwrap();
    let mut events = engine.events();
    engine.connect().await.unwrap();

    let (logon, _peer) = core.await.unwrap();
    assert_eq!(logon.method(), Some("Logon"));
    assert_eq!(logon.params, Some(json!({"User": "admin", "Password": "1234"})));

    let mut states = Vec::new();
    while let Ok(EngineEvent::StateChanged(state)) = events.try_recv() {
        states.push(state);
    }
    assert_eq!(
        states,
        vec![
            ConnectionState::Connected,
            ConnectionState::AwaitingAuth,
            ConnectionState::Authenticated,
            ConnectionState::Ready,
        ]
    );
}

#[tokio::test]
async fn test_logon_rejected_closes_socket() {
    let (listener, port) = listener().await;
    let core = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let logon = peer.next().await;
        peer.send(&Envelope::failure(logon.id_u64().unwrap(), 10, "Logon required"))
            .await;
        // The engine hangs up
        peer.try_next().await
    });

    let engine = Engine::builder()
        .port(port)
        .credentials(Credentials::new("admin", "wrong"))
        .build()
        .unwrap();
    let err = engine.connect().await.unwrap_err();

    assert!(matches!(err, QrcError::AuthenticationFailed(_)), "got {err:?}");
    assert_eq!(engine.state(), ConnectionState::Disconnected);
    assert!(core.await.unwrap().is_none());
}

#[tokio::test]
async fn test_logon_false_result_is_rejection() {
    let (listener, port) = listener().await;
    let core = tokio::spawn(async move {
        let mut peer = Peer::accept(&listener).await;
        let logon = peer.next().await;
        peer.reply(&logon, json!(false)).await;
        peer.try_next().await
    });

    let engine = Engine::builder()
        .port(port)
        .credentials(Credentials::new("admin", "wrong"))
        .build()
        .unwrap();

    assert!(matches!(
        engine.connect().await,
        Err(QrcError::AuthenticationFailed(_))
    ));
    assert!(core.await.unwrap().is_none());
}

#[tokio::test]
async fn test_no_logon_without_credentials() {
    let (engine, mut peer) = connected().await;

    let call = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.status_get().await })
    };

    // The first document on the wire is the call itself
    let request = peer.next().await;
    assert_eq!(request.method(), Some("StatusGet"));
    peer.reply(&request, json!({"State": "Active", "DesignName": "Main"}))
        .await;

    let status = call.await.unwrap().unwrap();
    assert_eq!(status.design_name.as_deref(), Some("Main"));
}

#[tokio::test]
async fn test_keepalive_noop_on_the_wire() {
    let (listener, port) = listener().await;
    let engine = Engine::builder()
        .port(port)
        .keepalive_interval(Duration::from_millis(100))
        .keepalive_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    engine.connect().await.unwrap();
    let mut peer = Peer::accept(&listener).await;

    for _ in 0..2 {
        let probe = peer.next().await;
        assert_eq!(probe.method(), Some("NoOp"));
        assert_eq!(probe.params, Some(json!({})));
        peer.reply(&probe, json!({})).await;
    }
    assert_eq!(engine.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_keepalive_failure_keeps_connection() {
    let (listener, port) = listener().await;
    let engine = Engine::builder()
        .port(port)
        .keepalive_interval(Duration::from_millis(50))
        .keepalive_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let mut events = engine.events();
    engine.connect().await.unwrap();
    let mut peer = Peer::accept(&listener).await;

    // Never answer the probe
    peer.next().await;
    let event = next_event(&mut events, |e| {
        matches!(e, EngineEvent::KeepAliveFailed { .. })
    })
    .await;
    assert!(matches!(event, EngineEvent::KeepAliveFailed { consecutive: 1, .. }));
    assert_eq!(engine.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_rpc_error_reaches_caller() {
    let (engine, mut peer) = connected().await;

    let call = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.control_get(&["nope"]).await })
    };
    let request = peer.next().await;
    peer.send(&Envelope::failure(request.id_u64().unwrap(), 8, "Unknown control"))
        .await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, QrcError::Rpc { code: 8, ref message } if message == "Unknown control"));
    assert_eq!(err.rpc_kind(), Some(RpcErrorKind::UnknownControl));
    assert_eq!(engine.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_notifications_reach_subscribers() {
    let (engine, mut peer) = connected().await;

    engine.subscribe(Topic::Any, |_: &Envelope| -> Result<(), CallbackError> {
        panic!("broken subscriber")
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = engine.subscribe(Topic::method("EngineStatus"), move |env: &Envelope| {
        tx.send(env.params.clone())?;
        Ok(())
    });

    peer.send(&Envelope::notification(
        "EngineStatus",
        Some(json!({"State": "Standby"})),
    ))
    .await;
    let params = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(params, Some(json!({"State": "Standby"})));

    // The read loop is unaffected by the panicking subscriber
    let call = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.no_op().await })
    };
    let request = peer.next().await;
    peer.reply(&request, json!({})).await;
    call.await.unwrap().unwrap();

    assert!(engine.unsubscribe(&sub));
}

#[tokio::test]
async fn test_fragmented_and_damaged_input() {
    let (listener, port) = listener().await;
    let engine = Arc::new(
        Engine::builder()
            .port(port)
            .max_frame_size(1024)
            .build()
            .unwrap(),
    );
    engine.connect().await.unwrap();
    let mut peer = Peer::accept(&listener).await;

    let call = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.component_get_controls("Mixer1").await })
    };
    let request = peer.next().await;

    // Garbage and an oversized document are dropped on their own
    peer.stream.write_all(b"not json\0").await.unwrap();
    let big = format!("{{\"pad\":\"{}\"}}\0", "x".repeat(4096));
    peer.stream.write_all(big.as_bytes()).await.unwrap();

    // The real answer arrives one byte at a time
    let answer = encode(&Envelope::success(
        request.id_u64().unwrap(),
        json!({"Name": "Mixer1", "Controls": [{"Name": "gain", "Value": -3.0}]}),
    ))
    .unwrap();
    for byte in answer.iter() {
        peer.stream.write_all(&[*byte]).await.unwrap();
        peer.stream.flush().await.unwrap();
    }

    let component = call.await.unwrap().unwrap();
    assert_eq!(component.name, "Mixer1");
    assert_eq!(component.control("gain").unwrap().as_f64(), Some(-3.0));
    assert_eq!(engine.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_close_fails_pending_and_hangs_up() {
    let (engine, mut peer) = connected().await;

    let call = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.snapshot_load("Presets", 1, Some(2.0)).await })
    };
    let request = peer.next().await;
    assert_eq!(
        request.params,
        Some(json!({"Name": "Presets", "Bank": 1, "Ramp": 2.0}))
    );

    engine.close();
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, QrcError::ConnectionLost(_)));
    assert!(peer.try_next().await.is_none());

    // No automatic reconnect; a new session is set up explicitly
    let (listener, port) = listener().await;
    let second = engine_on(port);
    second.connect().await.unwrap();
    let _peer = Peer::accept(&listener).await;
    assert_eq!(second.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_connect_refused() {
    let (listener, port) = listener().await;
    drop(listener);

    let engine = engine_on(port);
    let err = engine.connect().await.unwrap_err();
    assert!(matches!(err, QrcError::ConnectFailed { .. }));
    assert_eq!(engine.state(), ConnectionState::Disconnected);
}
