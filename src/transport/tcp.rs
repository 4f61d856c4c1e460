//! TCP connection to a core.
//!
//! # Example
//!
//! ```ignore
//! use qrc_client::transport::{open, CONTROL_PORT};
//! use std::time::Duration;
//!
//! let stream = open("192.168.1.10", CONTROL_PORT, Duration::from_secs(5)).await?;
//! ```

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{QrcError, Result};

/// Port of the control variant of the protocol.
pub const CONTROL_PORT: u16 = 1710;

/// Port of the plain variant.
pub const PLAIN_PORT: u16 = 1711;

/// Open a TCP connection to `host:port`.
///
/// Fails with `ConnectFailed` on refusal, resolution failure or when
/// `timeout` elapses first.
pub async fn open(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);

    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr.as_str())).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(QrcError::ConnectFailed { addr, source }),
        Err(_) => {
            return Err(QrcError::ConnectFailed {
                addr,
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            })
        }
    };

    // Small request documents; do not wait for coalescing
    stream.set_nodelay(true)?;
    tracing::info!(%addr, "connected to core");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (client, accepted) = tokio::join!(
            open("127.0.0.1", port, Duration::from_secs(1)),
            listener.accept()
        );

        assert!(client.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_open_refused_is_connect_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = open("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap_err();

        match err {
            QrcError::ConnectFailed { addr, .. } => assert_eq!(addr, format!("127.0.0.1:{port}")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
