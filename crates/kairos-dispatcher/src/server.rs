use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use kairos_core::NodeIdentity;
use serde::{Deserialize, Serialize};

/// Tag key → set of tag values.
pub type KeyTags = BTreeMap<String, BTreeSet<String>>;

/// How a tag query matches a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TagMode {
    /// Some queried key has every queried value on the server.
    All,
    /// Some queried key shares at least one value with the server.
    #[default]
    Any,
}

/// A known peer node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: KeyTags,
}

impl Server {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            tags: KeyTags::new(),
        }
    }

    pub fn with_tags(mut self, key: &str, values: &[&str]) -> Self {
        self.add_tags(key, values.iter().map(|v| v.to_string()));
        self
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(&self.host, self.port)
    }

    pub fn is_local(&self, local: &NodeIdentity) -> bool {
        self.host == local.host && self.port == local.port
    }

    pub fn add_tags(&mut self, key: &str, values: impl IntoIterator<Item = String>) {
        let set = self.tags.entry(key.to_string()).or_default();
        set.extend(values);
        if set.is_empty() {
            self.tags.remove(key);
        }
    }

    /// Remove one value; drops the key when its set empties.
    pub fn delete_tag(&mut self, key: &str, value: &str) -> bool {
        let Some(set) = self.tags.get_mut(key) else {
            return false;
        };
        let removed = set.remove(value);
        if set.is_empty() {
            self.tags.remove(key);
        }
        removed
    }

    pub fn delete_key(&mut self, key: &str) -> bool {
        self.tags.remove(key).is_some()
    }

    /// Drop empty tag sets (may arrive from a decoded document).
    pub fn normalize(&mut self) {
        self.tags.retain(|_, set| !set.is_empty());
    }

    /// An empty query matches every server.
    pub fn matches(&self, key_tags: &KeyTags, mode: TagMode) -> bool {
        if key_tags.is_empty() {
            return true;
        }
        key_tags.iter().any(|(key, wanted)| {
            let Some(have) = self.tags.get(key) else {
                return false;
            };
            match mode {
                TagMode::All => wanted.is_subset(have),
                TagMode::Any => !wanted.is_disjoint(have),
            }
        })
    }
}

/// `host:port`, then `key=[v1,v2]` per tag key.
impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        for (key, values) in &self.tags {
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            write!(f, " {key}=[{}]", values.join(","))?;
        }
        Ok(())
    }
}

/// Name → server inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerRegistry {
    servers: BTreeMap<String, Server>,
}

impl ServerRegistry {
    pub fn get(&self, name: &str) -> Option<&Server> {
        self.servers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Server> {
        self.servers.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn insert(&mut self, name: &str, mut server: Server) -> Option<Server> {
        server.normalize();
        self.servers.insert(name.to_string(), server)
    }

    pub fn remove(&mut self, name: &str) -> Option<Server> {
        self.servers.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Server)> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn clear(&mut self) {
        self.servers.clear();
    }

    /// Servers selected by a tag query, in name order.
    pub fn get_servers_by_tags(&self, key_tags: &KeyTags, mode: TagMode) -> Vec<(String, Server)> {
        self.servers
            .iter()
            .filter(|(_, s)| s.matches(key_tags, mode))
            .map(|(n, s)| (n.clone(), s.clone()))
            .collect()
    }

    /// The name under which the local node is registered, if it is.
    pub fn find_identity(&self, identity: &NodeIdentity) -> Option<&str> {
        self.servers
            .iter()
            .find(|(_, s)| s.is_local(identity))
            .map(|(n, _)| n.as_str())
    }
}
