//! # qrc-client
//!
//! Async client engine for the QRC remote-control protocol of audio DSP
//! cores.
//!
//! A core speaks JSON-RPC 2.0 over a single TCP connection (port 1710),
//! with every document terminated by a NUL byte. This crate handles the
//! framing, request/response correlation, logon, keep-alive and routing of
//! unsolicited pushes, and exposes the method catalogue as validated calls.
//!
//! ## Architecture
//!
//! - **Framing** ([`protocol`]): envelope type and NUL-delimited frame buffer
//! - **Connection** ([`Engine`]): one read loop and one writer task per socket
//! - **Calls** ([`methods`]): parameter validation and typed result views
//! - **Pushes** ([`Topic`], [`Subscription`]): per-subscriber bounded queues
//!
//! ## Example
//!
//! ```no_run
//! use qrc_client::Engine;
//!
//! #[tokio::main]
//! async fn main() -> qrc_client::Result<()> {
//!     let engine = Engine::builder().host("192.168.1.10").build()?;
//!     engine.connect().await?;
//!
//!     engine.control_set("gain1", -6.0, None).await?;
//!     for control in engine.control_get(&["gain1"]).await? {
//!         println!("{} = {:?}", control.name, control.string);
//!     }
//!
//!     engine.close();
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod correlator;
pub mod error;
pub mod keepalive;
pub mod methods;
pub mod notify;
pub mod protocol;
pub mod transport;
pub mod writer;

mod config;
mod engine;

pub use auth::Credentials;
pub use config::{EngineBuilder, EngineConfig};
pub use engine::{ConnectionState, Engine, EngineEvent};
pub use error::{QrcError, Result, RpcErrorKind};
pub use methods::MethodResult;
pub use notify::{CallbackError, Subscription, Topic};
