//! # Role & Access Resolver
//!
//! Resolves the access level a set of roles grants on a resource, and
//! whether a role set may mount a device at a path.
//!
//! Every pattern of every level of every role is considered and the highest
//! matching level wins. Adding roles can therefore only raise a result.

use shv_types::AccessLevel;

use super::config::{ConfigSnapshot, Role};

/// Paths owned by the broker itself; nothing may be mounted at or below them.
pub const LOCAL_ROOTS: [&str; 2] = [".app", ".broker"];

/// Highest level granted by a single role, if any.
pub fn role_access_level(
    role: &Role,
    path: &str,
    method: &str,
    signal: Option<&str>,
) -> Option<AccessLevel> {
    // levels are stored highest first, so the first hit is the answer
    role.access
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| p.matches(path, method, signal)))
        .map(|(level, _)| *level)
}

/// Highest level granted by any of `roles`.
pub fn access_level<'a>(
    roles: impl IntoIterator<Item = &'a Role>,
    path: &str,
    method: &str,
    signal: Option<&str>,
) -> Option<AccessLevel> {
    roles
        .into_iter()
        .filter_map(|role| role_access_level(role, path, method, signal))
        .max()
}

/// Whether `path` lies at or below a broker-local root.
pub fn is_local_path(path: &str) -> bool {
    LOCAL_ROOTS
        .iter()
        .any(|root| path == *root || path.strip_prefix(root).is_some_and(|r| r.starts_with('/')))
}

impl ConfigSnapshot {
    fn roles_of<'a>(&'a self, names: &'a [String]) -> impl Iterator<Item = &'a Role> + 'a {
        names.iter().filter_map(|name| self.role(name))
    }

    /// Access level a role set holds for a method call.
    pub fn access_level(&self, roles: &[String], path: &str, method: &str) -> Option<AccessLevel> {
        access_level(self.roles_of(roles), path, method, None)
    }

    /// Access level a role set holds for a signal.
    pub fn signal_access_level(
        &self,
        roles: &[String],
        path: &str,
        source: &str,
        signal: &str,
    ) -> Option<AccessLevel> {
        access_level(self.roles_of(roles), path, source, Some(signal))
    }

    /// Whether a role set may mount at `path`. Only the role patterns are
    /// checked here; overlap with other mounts is the mount tree's concern.
    pub fn mount_allowed(&self, roles: &[String], path: &str) -> bool {
        if path.is_empty() || is_local_path(path) {
            return false;
        }
        self.roles_of(roles)
            .any(|role| role.mount_points.iter().any(|p| p.matches(path)))
    }
}
