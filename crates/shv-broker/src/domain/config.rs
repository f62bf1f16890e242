//! Broker configuration with validation.
//!
//! [`BrokerConfig`] is the serde shape read from disk. It is compiled into an
//! immutable [`ConfigSnapshot`] holding parsed patterns; the broker swaps
//! whole snapshots on reload and never mutates one in place.

use serde::{Deserialize, Deserializer, Serialize};
use shv_types::AccessLevel;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

use super::auth::sha1_hex;
use super::ri::{Glob, PathPattern, RiError, RiPattern};

/// Main broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker name, reported by `.broker:name` and appended to user ids
    pub name: String,
    /// Listen URLs: `tcp://host:port` or `unix:/path`
    pub listen: Vec<String>,
    /// Users by login name
    pub users: BTreeMap<String, UserConfig>,
    /// Roles by name
    pub roles: BTreeMap<String, RoleConfig>,
    /// Automatic mount points and subscriptions for devices
    pub autosetups: Vec<AutosetupConfig>,
    /// Timeouts
    pub timeouts: TimeoutConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: "shvbroker".to_string(),
            listen: vec!["tcp://localhost:3755".to_string()],
            users: BTreeMap::new(),
            roles: BTreeMap::new(),
            autosetups: Vec::new(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// A login account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Plain text password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Hex encoded SHA1 of the password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1pass: Option<String>,
    /// Role names
    #[serde(alias = "role", deserialize_with = "one_or_many")]
    pub roles: Vec<String>,
}

/// Access rules and mount permissions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    /// RI patterns per access level
    #[serde(deserialize_with = "levels_one_or_many")]
    pub access: BTreeMap<AccessLevel, Vec<String>>,
    /// Path patterns this role may mount at
    #[serde(alias = "mountPoints", deserialize_with = "one_or_many")]
    pub mount_points: Vec<String>,
}

/// Device auto-setup rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosetupConfig {
    /// Device id globs
    #[serde(alias = "deviceId", deserialize_with = "one_or_many")]
    pub device_ids: Vec<String>,
    /// Role name globs; empty matches any role
    #[serde(alias = "role", deserialize_with = "one_or_many")]
    pub roles: Vec<String>,
    /// Mount point template: `%d` device id, `%r` role, `%i` client id
    #[serde(alias = "mountPoint")]
    pub mount_point: String,
    /// RI patterns subscribed on behalf of the device
    pub subscriptions: Vec<String>,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time a fresh connection has to complete login
    #[serde(with = "humantime_serde")]
    pub login: Duration,
    /// Inactivity after which a logged-in client is dropped
    #[serde(with = "humantime_serde")]
    pub idle: Duration,
    /// Lifetime of a forwarded request without response
    #[serde(with = "humantime_serde")]
    pub forward: Duration,
    /// Period of the subscription expiry sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login: Duration::from_secs(5),
            idle: Duration::from_secs(180),
            forward: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid pattern in role '{role}': {source}")]
    InvalidPattern {
        role: String,
        #[source]
        source: RiError,
    },
    #[error("user '{user}' references unknown role '{role}'")]
    UnknownRole { user: String, role: String },
    #[error("user '{0}' has neither password nor sha1pass")]
    MissingCredential(String),
    #[error("user '{0}' has a malformed sha1pass")]
    InvalidSha1(String),
    #[error("invalid listen address: {0}")]
    InvalidListen(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("cannot load '{path}': {reason}")]
    Load { path: String, reason: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    OneOrMany::deserialize(deserializer).map(Into::into)
}

fn levels_one_or_many<'de, D>(deserializer: D) -> Result<BTreeMap<AccessLevel, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<AccessLevel, OneOrMany>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(level, v)| (level, v.into())).collect())
}

impl BrokerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compile().map(|_| ())
    }

    /// Validate and compile into an immutable snapshot.
    pub fn compile(&self) -> Result<ConfigSnapshot, ConfigError> {
        if self.name.is_empty() || self.name.contains([':', ';', '/']) {
            return Err(ConfigError::Invalid(format!("broker name '{}'", self.name)));
        }
        for url in &self.listen {
            if !(url.starts_with("tcp://") || url.starts_with("unix:")) {
                return Err(ConfigError::InvalidListen(url.clone()));
            }
        }
        if self.timeouts.login.is_zero() {
            return Err(ConfigError::InvalidTimeout("login cannot be 0".into()));
        }
        if self.timeouts.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout("sweep_interval cannot be 0".into()));
        }

        let mut roles = HashMap::with_capacity(self.roles.len());
        for (name, role) in &self.roles {
            roles.insert(name.clone(), Role::compile(name, role)?);
        }

        let mut users = HashMap::with_capacity(self.users.len());
        for (name, user) in &self.users {
            for role in &user.roles {
                if !roles.contains_key(role) {
                    return Err(ConfigError::UnknownRole {
                        user: name.clone(),
                        role: role.clone(),
                    });
                }
            }
            let sha1 = match (&user.sha1pass, &user.password) {
                (Some(hash), _) => {
                    if hash.len() != 40 || hex::decode(hash).is_err() {
                        return Err(ConfigError::InvalidSha1(name.clone()));
                    }
                    hash.to_ascii_lowercase()
                }
                (None, Some(plain)) => sha1_hex(plain.as_bytes()),
                (None, None) => return Err(ConfigError::MissingCredential(name.clone())),
            };
            users.insert(
                name.clone(),
                User {
                    name: name.clone(),
                    sha1_password: sha1,
                    roles: user.roles.clone(),
                },
            );
        }

        let autosetups = self
            .autosetups
            .iter()
            .map(Autosetup::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ConfigSnapshot {
            name: self.name.clone(),
            listen: self.listen.clone(),
            users,
            roles,
            autosetups,
            timeouts: self.timeouts.clone(),
        })
    }
}

/// A loaded user account.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    /// Lowercase hex SHA1 of the password
    pub sha1_password: String,
    pub roles: Vec<String>,
}

/// A compiled role.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    /// Patterns per level, highest level first
    pub access: Vec<(AccessLevel, Vec<RiPattern>)>,
    pub mount_points: Vec<PathPattern>,
}

impl Role {
    fn compile(name: &str, config: &RoleConfig) -> Result<Self, ConfigError> {
        let invalid = |source| ConfigError::InvalidPattern {
            role: name.to_string(),
            source,
        };
        let mut access = config
            .access
            .iter()
            .map(|(level, patterns)| {
                patterns
                    .iter()
                    .map(|p| RiPattern::parse(p))
                    .collect::<Result<Vec<_>, _>>()
                    .map(|compiled| (*level, compiled))
                    .map_err(invalid)
            })
            .collect::<Result<Vec<_>, _>>()?;
        access.sort_by(|a, b| b.0.cmp(&a.0));
        let mount_points = config
            .mount_points
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        Ok(Self {
            name: name.to_string(),
            access,
            mount_points,
        })
    }
}

/// A compiled autosetup rule.
#[derive(Debug, Clone)]
pub struct Autosetup {
    pub device_ids: Vec<Glob>,
    pub roles: Vec<Glob>,
    pub mount_point: String,
    pub subscriptions: Vec<RiPattern>,
}

impl Autosetup {
    fn compile(config: &AutosetupConfig) -> Result<Self, ConfigError> {
        let invalid = |source| ConfigError::InvalidPattern {
            role: "autosetup".to_string(),
            source,
        };
        let globs = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| Glob::parse(p))
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)
        };
        if config.mount_point.is_empty() {
            return Err(ConfigError::Invalid("autosetup without mount_point".into()));
        }
        Ok(Self {
            device_ids: globs(&config.device_ids)?,
            roles: globs(&config.roles)?,
            mount_point: config.mount_point.clone(),
            subscriptions: config
                .subscriptions
                .iter()
                .map(|p| RiPattern::parse(p))
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)?,
        })
    }

    /// Whether this rule applies to a device logging in with `roles`.
    pub fn applies_to(&self, device_id: &str, roles: &[String]) -> bool {
        self.device_ids.iter().any(|g| g.matches(device_id))
            && (self.roles.is_empty()
                || roles.iter().any(|r| self.roles.iter().any(|g| g.matches(r))))
    }

    /// Expand the mount point template.
    pub fn expand_mount_point(&self, device_id: &str, role: &str, client_id: u32) -> String {
        let mut out = String::with_capacity(self.mount_point.len() + device_id.len());
        let mut chars = self.mount_point.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('d') => out.push_str(device_id),
                Some('r') => out.push_str(role),
                Some('i') => out.push_str(&client_id.to_string()),
                Some(other) => out.push(other),
                None => out.push('%'),
            }
        }
        out
    }
}

/// One immutable generation of users, roles and settings.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub name: String,
    pub listen: Vec<String>,
    users: HashMap<String, User>,
    roles: HashMap<String, Role>,
    autosetups: Vec<Autosetup>,
    pub timeouts: TimeoutConfig,
}

impl ConfigSnapshot {
    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    /// First autosetup rule matching a device.
    pub fn autosetup_for(&self, device_id: &str, roles: &[String]) -> Option<&Autosetup> {
        self.autosetups.iter().find(|a| a.applies_to(device_id, roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name = "testbroker"
listen = ["tcp://localhost:3755", "unix:/tmp/shvbroker.sock"]

[users.admin]
password = "admin!123"
roles = ["admin"]

[users.test]
sha1pass = "A94A8FE5CCB19BA61C4C0873D391E987982FBBD3"
role = "tester"

[roles.admin.access]
su = "**:*"

[roles.tester]
mount_points = ["test/**"]

[roles.tester.access]
cmd = ["test/**:*"]
bws = ["**:ls", "**:dir"]

[[autosetups]]
device_ids = ["dev*"]
roles = ["tester"]
mount_point = "test/%d"
subscriptions = ["test/**:*:*"]

[timeouts]
login = "3s"
idle = "2m"
"#;

    fn sample() -> BrokerConfig {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = BrokerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts.login, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_sample() {
        let config = sample();
        assert_eq!(config.name, "testbroker");
        assert_eq!(config.users["test"].roles, vec!["tester".to_string()]);
        assert_eq!(config.roles["tester"].access[&AccessLevel::Browse].len(), 2);
        assert_eq!(config.roles["admin"].access[&AccessLevel::Admin], vec!["**:*"]);
        assert_eq!(config.timeouts.idle, Duration::from_secs(120));
        assert_eq!(config.timeouts.forward, Duration::from_secs(30));
    }

    #[test]
    fn test_compile_hashes_plain_passwords() {
        let snapshot = sample().compile().unwrap();
        assert_eq!(
            snapshot.user("admin").unwrap().sha1_password,
            sha1_hex(b"admin!123")
        );
        assert_eq!(
            snapshot.user("test").unwrap().sha1_password,
            "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3"
        );
    }

    #[test]
    fn test_role_levels_sorted_highest_first() {
        let snapshot = sample().compile().unwrap();
        let role = snapshot.role("tester").unwrap();
        assert_eq!(role.access[0].0, AccessLevel::Command);
        assert_eq!(role.access[1].0, AccessLevel::Browse);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let mut config = sample();
        config.users.get_mut("test").unwrap().roles = vec!["ghost".into()];
        assert!(matches!(config.validate(), Err(ConfigError::UnknownRole { .. })));
    }

    #[test]
    fn test_malformed_pattern_rejected() {
        let mut config = sample();
        config
            .roles
            .get_mut("tester")
            .unwrap()
            .access
            .insert(AccessLevel::Read, vec!["a:b:c:d".into()]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_missing_credential_rejected() {
        let mut config = sample();
        config.users.insert("nobody".into(), UserConfig::default());
        assert!(matches!(config.validate(), Err(ConfigError::MissingCredential(_))));
    }

    #[test]
    fn test_bad_listen_rejected() {
        let mut config = sample();
        config.listen.push("udp://0.0.0.0:1".into());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidListen(_))));
    }

    #[test]
    fn test_autosetup_template() {
        let snapshot = sample().compile().unwrap();
        let setup = snapshot
            .autosetup_for("dev42", &["tester".to_string()])
            .unwrap();
        assert_eq!(setup.expand_mount_point("dev42", "tester", 7), "test/dev42");
        assert!(snapshot.autosetup_for("other", &["tester".to_string()]).is_none());
        assert!(snapshot.autosetup_for("dev42", &["admin".to_string()]).is_none());
    }
}
