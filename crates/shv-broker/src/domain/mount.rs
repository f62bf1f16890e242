//! # Mount Tree
//!
//! Maps paths to their owners. A path is either broker-local (`.app`,
//! `.broker`, ...), a virtual directory on the way to mount points, inside a
//! mount point owned by exactly one connection, or nothing at all.
//!
//! Mount points never nest: a mount owns its path and everything below it,
//! so at most one mount can be a prefix of any path.

use parking_lot::RwLock;
use shv_types::ConnectionId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::access::is_local_path;
use super::error::MountError;
use super::ri::{normalize_path, path_segments};

/// Broker-local nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalNode {
    /// `""`
    Root,
    /// Intermediate path leading to one or more mount points
    Directory(String),
    /// `.app`
    App,
    /// `.broker`
    Broker,
    /// `.broker/currentClient`
    CurrentClient,
    /// `.broker/client`
    ClientDir,
}

/// Result of resolving a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Local(LocalNode),
    Mounted {
        connection: ConnectionId,
        relative_path: String,
    },
    /// `.broker/client/<id>/...`; valid only while client `<id>` is active
    ClientAlias {
        connection: ConnectionId,
        relative_path: String,
    },
    NotFound,
}

/// Registered mount points.
#[derive(Debug, Default)]
pub struct MountTree {
    mounts: RwLock<BTreeMap<String, ConnectionId>>,
}

fn join_rest<'a>(mut segments: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    if let Some(first) = segments.next() {
        out.push_str(first);
        for s in segments {
            out.push('/');
            out.push_str(s);
        }
    }
    out
}

impl MountTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a path by longest matching prefix.
    pub fn resolve(&self, path: &str) -> Resolution {
        let path = normalize_path(path);
        if path.is_empty() {
            return Resolution::Local(LocalNode::Root);
        }
        if is_local_path(&path) {
            return resolve_local(&path);
        }

        let mounts = self.mounts.read();
        let segments: Vec<&str> = path.split('/').collect();
        for len in (1..=segments.len()).rev() {
            let prefix = segments[..len].join("/");
            if let Some(owner) = mounts.get(&prefix) {
                return Resolution::Mounted {
                    connection: *owner,
                    relative_path: segments[len..].join("/"),
                };
            }
        }
        let below = format!("{}/", path);
        if mounts.range(below.clone()..).next().is_some_and(|(m, _)| m.starts_with(&below)) {
            return Resolution::Local(LocalNode::Directory(path));
        }
        Resolution::NotFound
    }

    /// Mount `connection` at `path`.
    ///
    /// The empty path and broker-local paths are never allowed. A path equal
    /// to, above or below an existing mount is `AlreadyMounted`.
    pub fn mount(&self, path: &str, connection: ConnectionId) -> Result<String, MountError> {
        let path = normalize_path(path);
        if path.is_empty() || is_local_path(&path) {
            return Err(MountError::NotAllowed);
        }

        let mut mounts = self.mounts.write();
        let mut ancestor = String::new();
        for segment in path_segments(&path) {
            if !ancestor.is_empty() {
                ancestor.push('/');
            }
            ancestor.push_str(segment);
            if mounts.contains_key(&ancestor) {
                return Err(MountError::AlreadyMounted);
            }
        }
        let below = format!("{}/", path);
        if mounts.range(below.clone()..).next().is_some_and(|(m, _)| m.starts_with(&below)) {
            return Err(MountError::AlreadyMounted);
        }

        mounts.insert(path.clone(), connection);
        debug!(client_id = %connection, mount_point = %path, "Mounted");
        Ok(path)
    }

    /// Remove every mount owned by `connection`. Idempotent.
    pub fn unmount(&self, connection: ConnectionId) -> Vec<String> {
        let mut mounts = self.mounts.write();
        let removed: Vec<String> = mounts
            .iter()
            .filter(|(_, owner)| **owner == connection)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &removed {
            mounts.remove(path);
            debug!(client_id = %connection, mount_point = %path, "Unmounted");
        }
        removed
    }

    /// Mount point owned by `connection`, if any.
    pub fn mount_of(&self, connection: ConnectionId) -> Option<String> {
        self.mounts
            .read()
            .iter()
            .find(|(_, owner)| **owner == connection)
            .map(|(path, _)| path.clone())
    }

    /// Owner of exactly this mount point.
    pub fn owner(&self, path: &str) -> Option<ConnectionId> {
        self.mounts.read().get(&normalize_path(path)).copied()
    }

    /// Point-in-time copy of all mounts.
    pub fn snapshot(&self) -> Vec<(String, ConnectionId)> {
        self.mounts
            .read()
            .iter()
            .map(|(path, owner)| (path.clone(), *owner))
            .collect()
    }

    /// Children of a root or directory node, from one consistent snapshot.
    pub fn children(&self, node: &LocalNode) -> Vec<String> {
        let prefix = match node {
            LocalNode::Root => String::new(),
            LocalNode::Directory(path) => format!("{}/", path),
            _ => return Vec::new(),
        };
        let mut names = BTreeSet::new();
        if *node == LocalNode::Root {
            names.extend([".app".to_string(), ".broker".to_string()]);
        }
        let mounts = self.mounts.read();
        for path in mounts.range(prefix.clone()..).map(|(p, _)| p) {
            let Some(rest) = path.strip_prefix(&prefix) else {
                break;
            };
            if let Some(segment) = path_segments(rest).next() {
                names.insert(segment.to_string());
            }
        }
        names.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.mounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.read().is_empty()
    }
}

fn resolve_local(path: &str) -> Resolution {
    let mut segments = path_segments(path);
    match (segments.next(), segments.next()) {
        (Some(".app"), None) => Resolution::Local(LocalNode::App),
        (Some(".broker"), None) => Resolution::Local(LocalNode::Broker),
        (Some(".broker"), Some("currentClient")) if segments.clone().next().is_none() => {
            Resolution::Local(LocalNode::CurrentClient)
        }
        (Some(".broker"), Some("client")) => match segments.next() {
            None => Resolution::Local(LocalNode::ClientDir),
            Some(id) => match id.parse::<u32>() {
                Ok(id) => Resolution::ClientAlias {
                    connection: ConnectionId(id),
                    relative_path: join_rest(segments),
                },
                Err(_) => Resolution::NotFound,
            },
        },
        _ => Resolution::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ConnectionId = ConnectionId(1);
    const B: ConnectionId = ConnectionId(2);

    #[test]
    fn test_resolve_under_mount() {
        let tree = MountTree::new();
        tree.mount("test/device", A).unwrap();
        assert_eq!(
            tree.resolve("test/device/value"),
            Resolution::Mounted {
                connection: A,
                relative_path: "value".into()
            }
        );
        assert_eq!(
            tree.resolve("test/device"),
            Resolution::Mounted {
                connection: A,
                relative_path: String::new()
            }
        );
        assert_eq!(
            tree.resolve("test"),
            Resolution::Local(LocalNode::Directory("test".into()))
        );
        assert_eq!(tree.resolve("test/other"), Resolution::NotFound);
        assert_eq!(tree.resolve("test/dev"), Resolution::NotFound);
    }

    #[test]
    fn test_resolve_local_nodes() {
        let tree = MountTree::new();
        assert_eq!(tree.resolve(""), Resolution::Local(LocalNode::Root));
        assert_eq!(tree.resolve(".app"), Resolution::Local(LocalNode::App));
        assert_eq!(tree.resolve(".broker"), Resolution::Local(LocalNode::Broker));
        assert_eq!(
            tree.resolve(".broker/currentClient"),
            Resolution::Local(LocalNode::CurrentClient)
        );
        assert_eq!(tree.resolve(".broker/client"), Resolution::Local(LocalNode::ClientDir));
        assert_eq!(
            tree.resolve(".broker/client/3/a/b"),
            Resolution::ClientAlias {
                connection: ConnectionId(3),
                relative_path: "a/b".into()
            }
        );
        assert_eq!(tree.resolve(".broker/client/x"), Resolution::NotFound);
        assert_eq!(tree.resolve(".app/x"), Resolution::NotFound);
    }

    #[test]
    fn test_overlapping_mounts_rejected() {
        let tree = MountTree::new();
        tree.mount("test/device", A).unwrap();
        assert_eq!(tree.mount("test/device", B), Err(MountError::AlreadyMounted));
        assert_eq!(tree.mount("test", B), Err(MountError::AlreadyMounted));
        assert_eq!(tree.mount("test/device/sub", B), Err(MountError::AlreadyMounted));
        assert!(tree.mount("test/device2", B).is_ok());
    }

    #[test]
    fn test_local_and_empty_mounts_not_allowed() {
        let tree = MountTree::new();
        assert_eq!(tree.mount("", A), Err(MountError::NotAllowed));
        assert_eq!(tree.mount("/", A), Err(MountError::NotAllowed));
        assert_eq!(tree.mount(".broker/x", A), Err(MountError::NotAllowed));
        assert_eq!(tree.mount(".app", A), Err(MountError::NotAllowed));
    }

    #[test]
    fn test_unmount_is_idempotent() {
        let tree = MountTree::new();
        tree.mount("test/device", A).unwrap();
        assert_eq!(tree.unmount(A), vec!["test/device".to_string()]);
        assert!(tree.unmount(A).is_empty());
        assert_eq!(tree.resolve("test/device/value"), Resolution::NotFound);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_children_snapshot() {
        let tree = MountTree::new();
        tree.mount("test/device", A).unwrap();
        tree.mount("test/other", B).unwrap();
        tree.mount("zone/x", ConnectionId(3)).unwrap();
        assert_eq!(
            tree.children(&LocalNode::Root),
            vec![".app", ".broker", "test", "zone"]
        );
        assert_eq!(
            tree.children(&LocalNode::Directory("test".into())),
            vec!["device", "other"]
        );
    }

    #[test]
    fn test_mount_of_and_owner() {
        let tree = MountTree::new();
        tree.mount("/test/device/", A).unwrap();
        assert_eq!(tree.mount_of(A).as_deref(), Some("test/device"));
        assert_eq!(tree.owner("test/device"), Some(A));
        assert_eq!(tree.mount_of(B), None);
    }
}
