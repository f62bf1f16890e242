//! # Login Handshake
//!
//! ```text
//!   Hello ──hello──→ NonceSent ──login──→ LoginPending ──mount ok──→ Active
//!     │                  │                     │
//!     └──────────────────┴──── any failure ────┴──────────────→ Rejected
//! ```
//!
//! The broker answers `hello` with a connection-scoped nonce. `login` carries
//! either a plain password or `sha1(nonce ‖ sha1(password))`. There is no
//! retry: a rejected connection has to reconnect.

use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::config::ConfigSnapshot;
use super::error::BrokerError;

/// Number of random bytes in a nonce (hex encoded to twice as many chars).
pub const NONCE_BYTES: usize = 5;

const HELLO_ONLY: &str = "Only method 'hello' is allowed";
const HELLO_OR_LOGIN: &str = "Only methods 'hello' and 'login' are allowed";

/// Lowercase hex SHA1 digest.
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Compare two secrets without an early exit on the first mismatch.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let max_len = std::cmp::max(a.len(), b.len());

    // different pad bytes guarantee a mismatch when lengths differ
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Password encoding used by a login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum LoginType {
    #[serde(rename = "PLAIN")]
    Plain,
    #[default]
    #[serde(rename = "SHA1")]
    Sha1,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    #[serde(rename = "type", default)]
    pub kind: LoginType,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceOptions {
    pub device_id: Option<String>,
    pub mount_point: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginOptions {
    pub device: Option<DeviceOptions>,
    /// Idle timeout in seconds requested by the client
    #[serde(rename = "idleWatchDogTimeOut")]
    pub idle_watchdog_timeout: Option<u64>,
}

/// Parameter of the `login` method.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginParams {
    pub login: Credentials,
    #[serde(default)]
    pub options: LoginOptions,
}

/// Identity bound to a connection by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub user: String,
    pub roles: Vec<String>,
    pub device_id: Option<String>,
    pub mount_point: Option<String>,
    pub idle_timeout: Option<Duration>,
}

/// Handshake states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Hello,
    NonceSent { nonce: String },
    LoginPending,
    Active,
    Rejected,
}

/// What a pre-login request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Reply to `hello` with this nonce
    Nonce(String),
    /// Credentials accepted; bind the identity, then `complete` or `reject`
    LoggedIn(LoginGrant),
}

/// Per-connection handshake state machine.
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Hello,
        }
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == HandshakeState::Active
    }

    /// Feed a request received before login. Any error leaves the machine
    /// in `Rejected`.
    pub fn advance(
        &mut self,
        method: &str,
        param: Option<&Value>,
        config: &ConfigSnapshot,
    ) -> Result<HandshakeStep, BrokerError> {
        let result = self.try_advance(method, param, config);
        if result.is_err() {
            self.state = HandshakeState::Rejected;
        }
        result
    }

    fn try_advance(
        &mut self,
        method: &str,
        param: Option<&Value>,
        config: &ConfigSnapshot,
    ) -> Result<HandshakeStep, BrokerError> {
        match (&self.state, method) {
            (HandshakeState::Hello, "hello") => {
                let nonce = generate_nonce();
                self.state = HandshakeState::NonceSent {
                    nonce: nonce.clone(),
                };
                Ok(HandshakeStep::Nonce(nonce))
            }
            (HandshakeState::Hello, _) => Err(BrokerError::LoginRequired(HELLO_ONLY)),
            (HandshakeState::NonceSent { nonce }, "hello") => {
                Ok(HandshakeStep::Nonce(nonce.clone()))
            }
            (HandshakeState::NonceSent { nonce }, "login") => {
                let grant = verify_login(param, nonce, config)?;
                self.state = HandshakeState::LoginPending;
                Ok(HandshakeStep::LoggedIn(grant))
            }
            (HandshakeState::NonceSent { .. }, _) => {
                Err(BrokerError::LoginRequired(HELLO_OR_LOGIN))
            }
            (HandshakeState::LoginPending | HandshakeState::Active, _) => {
                Err(BrokerError::Protocol("Handshake already completed".into()))
            }
            (HandshakeState::Rejected, _) => Err(BrokerError::Auth),
        }
    }

    /// `LoginPending → Active`
    pub fn complete(&mut self) {
        if self.state == HandshakeState::LoginPending {
            self.state = HandshakeState::Active;
        }
    }

    /// Move to `Rejected`
    pub fn reject(&mut self) {
        self.state = HandshakeState::Rejected;
    }
}

fn verify_login(
    param: Option<&Value>,
    nonce: &str,
    config: &ConfigSnapshot,
) -> Result<LoginGrant, BrokerError> {
    let params: LoginParams = param
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| BrokerError::InvalidParam(e.to_string()))?
        .ok_or_else(|| BrokerError::InvalidParam("Missing login parameter".into()))?;

    let Some(user) = config.user(&params.login.user) else {
        debug!(user = %params.login.user, "Login for unknown user");
        return Err(BrokerError::Auth);
    };

    let accepted = match params.login.kind {
        LoginType::Plain => constant_time_compare(
            &sha1_hex(params.login.password.as_bytes()),
            &user.sha1_password,
        ),
        LoginType::Sha1 => {
            let expected = sha1_hex(format!("{}{}", nonce, user.sha1_password).as_bytes());
            constant_time_compare(&params.login.password.to_ascii_lowercase(), &expected)
        }
    };
    if !accepted {
        debug!(user = %user.name, "Login rejected");
        return Err(BrokerError::Auth);
    }

    let device = params.options.device.unwrap_or_default();
    Ok(LoginGrant {
        user: user.name.clone(),
        roles: user.roles.clone(),
        device_id: device.device_id,
        mount_point: device.mount_point,
        idle_timeout: params
            .options
            .idle_watchdog_timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{BrokerConfig, UserConfig};
    use serde_json::json;

    fn config() -> ConfigSnapshot {
        let mut config = BrokerConfig::default();
        config.roles.insert("tester".into(), Default::default());
        config.users.insert(
            "test".into(),
            UserConfig {
                password: Some("test".into()),
                sha1pass: None,
                roles: vec!["tester".into()],
            },
        );
        config.compile().unwrap()
    }

    fn nonce_of(step: HandshakeStep) -> String {
        match step {
            HandshakeStep::Nonce(n) => n,
            other => panic!("expected nonce, got {:?}", other),
        }
    }

    #[test]
    fn test_sha1_hex() {
        assert_eq!(sha1_hex(b"test"), "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3");
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
        assert!(!constant_time_compare("", "a"));
    }

    #[test]
    fn test_hello_issues_nonce() {
        let mut hs = Handshake::new();
        let nonce = nonce_of(hs.advance("hello", None, &config()).unwrap());
        assert_eq!(nonce.len(), NONCE_BYTES * 2);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(matches!(hs.state(), HandshakeState::NonceSent { .. }));
    }

    #[test]
    fn test_request_before_hello_rejects() {
        let mut hs = Handshake::new();
        let err = hs.advance("ls", None, &config()).unwrap_err();
        assert_eq!(err, BrokerError::LoginRequired(HELLO_ONLY));
        assert_eq!(hs.state(), &HandshakeState::Rejected);
    }

    #[test]
    fn test_plain_login() {
        let cfg = config();
        let mut hs = Handshake::new();
        hs.advance("hello", None, &cfg).unwrap();
        let param = json!({"login": {"user": "test", "password": "test", "type": "PLAIN"}});
        let step = hs.advance("login", Some(&param), &cfg).unwrap();
        let HandshakeStep::LoggedIn(grant) = step else {
            panic!("expected login");
        };
        assert_eq!(grant.user, "test");
        assert_eq!(grant.roles, vec!["tester".to_string()]);
        assert_eq!(hs.state(), &HandshakeState::LoginPending);
        hs.complete();
        assert!(hs.is_active());
    }

    #[test]
    fn test_sha1_login_uses_nonce() {
        let cfg = config();
        let mut hs = Handshake::new();
        let nonce = nonce_of(hs.advance("hello", None, &cfg).unwrap());
        let password = sha1_hex(format!("{}{}", nonce, sha1_hex(b"test")).as_bytes());
        let param = json!({
            "login": {"user": "test", "password": password, "type": "SHA1"},
            "options": {"device": {"deviceId": "dev1", "mountPoint": "test/dev1"}, "idleWatchDogTimeOut": 60}
        });
        let HandshakeStep::LoggedIn(grant) = hs.advance("login", Some(&param), &cfg).unwrap() else {
            panic!("expected login");
        };
        assert_eq!(grant.device_id.as_deref(), Some("dev1"));
        assert_eq!(grant.mount_point.as_deref(), Some("test/dev1"));
        assert_eq!(grant.idle_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_wrong_password_rejects_without_retry() {
        let cfg = config();
        let mut hs = Handshake::new();
        hs.advance("hello", None, &cfg).unwrap();
        let bad = json!({"login": {"user": "test", "password": "nope", "type": "PLAIN"}});
        assert_eq!(hs.advance("login", Some(&bad), &cfg).unwrap_err(), BrokerError::Auth);
        let good = json!({"login": {"user": "test", "password": "test", "type": "PLAIN"}});
        assert_eq!(hs.advance("login", Some(&good), &cfg).unwrap_err(), BrokerError::Auth);
    }

    #[test]
    fn test_unknown_user_and_bad_param() {
        let cfg = config();
        let mut hs = Handshake::new();
        hs.advance("hello", None, &cfg).unwrap();
        let param = json!({"login": {"user": "ghost", "password": "x", "type": "PLAIN"}});
        assert_eq!(hs.advance("login", Some(&param), &cfg).unwrap_err(), BrokerError::Auth);

        let mut hs = Handshake::new();
        hs.advance("hello", None, &cfg).unwrap();
        let param = json!({"login": {"type": "INVALID"}});
        assert!(matches!(
            hs.advance("login", Some(&param), &cfg),
            Err(BrokerError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_other_method_after_hello_rejects() {
        let cfg = config();
        let mut hs = Handshake::new();
        hs.advance("hello", None, &cfg).unwrap();
        assert_eq!(
            hs.advance("ls", None, &cfg).unwrap_err(),
            BrokerError::LoginRequired(HELLO_OR_LOGIN)
        );
    }
}
