//! Logon handling.
//!
//! Authentication is required exactly when credentials are configured. The
//! session walks `Connected -> AwaitingAuth -> Authenticated` with a `Logon`
//! call in between, or straight to `Authenticated` with no call at all.

use std::fmt;
use std::future::Future;

use serde_json::{json, Value};

use crate::engine::ConnectionState;
use crate::error::{QrcError, Result};
use crate::methods::MethodResult;

/// User name and PIN/password presented in `Logon`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn logon_params(&self) -> Value {
        json!({ "User": self.user, "Password": self.password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Drives the logon step of a new connection.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    credentials: Option<Credentials>,
}

impl AuthSession {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }

    pub fn is_required(&self) -> bool {
        self.credentials.is_some()
    }

    /// Run the logon step.
    ///
    /// `transition` is told about every state entered. `logon` performs the
    /// `Logon` call with the given params. An RPC error or a rejected logon
    /// becomes `AuthenticationFailed`; transport errors and timeouts are
    /// returned unchanged. The caller closes the connection on any error.
    pub async fn authenticate<S, L, Fut>(&self, mut transition: S, logon: L) -> Result<()>
    where
        S: FnMut(ConnectionState),
        L: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<MethodResult>>,
    {
        let Some(credentials) = &self.credentials else {
            tracing::debug!("authentication not required");
            transition(ConnectionState::Authenticated);
            return Ok(());
        };

        transition(ConnectionState::AwaitingAuth);
        tracing::info!(user = %credentials.user, "logging on");

        match logon(credentials.logon_params()).await {
            Ok(_) => {
                tracing::info!(user = %credentials.user, "logon accepted");
                transition(ConnectionState::Authenticated);
                Ok(())
            }
            Err(QrcError::Rpc { code, message }) => {
                tracing::warn!(user = %credentials.user, code, %message, "logon rejected");
                Err(QrcError::AuthenticationFailed(format!("{message} (code {code})")))
            }
            Err(e @ QrcError::AuthenticationFailed(_)) => {
                tracing::warn!(user = %credentials.user, error = %e, "logon rejected");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("admin", "1234");
        let printed = format!("{creds:?}");
        assert!(printed.contains("admin"));
        assert!(!printed.contains("1234"));
    }

    #[tokio::test]
    async fn test_not_required_skips_logon() {
        let session = AuthSession::new(None);
        let mut states = Vec::new();

        session
            .authenticate(
                |s| states.push(s),
                |_| async { Err(QrcError::Disconnected) },
            )
            .await
            .unwrap();

        assert!(!session.is_required());
        assert_eq!(states, vec![ConnectionState::Authenticated]);
    }

    #[tokio::test]
    async fn test_successful_logon() {
        let session = AuthSession::new(Some(Credentials::new("admin", "1234")));
        let mut states = Vec::new();
        let mut sent = None;

        session
            .authenticate(
                |s| states.push(s),
                |params| {
                    sent = Some(params);
                    async { Ok(MethodResult::Ack) }
                },
            )
            .await
            .unwrap();

        assert_eq!(
            states,
            vec![ConnectionState::AwaitingAuth, ConnectionState::Authenticated]
        );
        assert_eq!(sent, Some(json!({"User": "admin", "Password": "1234"})));
    }

    #[tokio::test]
    async fn test_rpc_error_becomes_authentication_failed() {
        let session = AuthSession::new(Some(Credentials::new("admin", "wrong")));
        let mut states = Vec::new();

        let err = session
            .authenticate(
                |s| states.push(s),
                |_| async {
                    Err(QrcError::Rpc {
                        code: 10,
                        message: "Logon required".into(),
                    })
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QrcError::AuthenticationFailed(ref r) if r.contains("code 10")));
        assert_eq!(states, vec![ConnectionState::AwaitingAuth]);
    }

    #[tokio::test]
    async fn test_timeout_is_not_an_auth_failure() {
        let session = AuthSession::new(Some(Credentials::new("admin", "1234")));

        let err = session
            .authenticate(
                |_| {},
                |_| async {
                    Err(QrcError::RequestTimeout {
                        method: "Logon".into(),
                        timeout: Duration::from_secs(1),
                    })
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, QrcError::RequestTimeout { .. }));
    }
}
