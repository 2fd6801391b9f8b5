use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KairosError;

/// `(host, port)` pair identifying a dispatcher process.
///
/// Two dispatchers are the same node when both parts compare equal; the
/// dispatcher never makes an HTTP call to its own identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub host: String,
    pub port: u16,
}

impl NodeIdentity {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    /// Base URL for HTTP calls to this node.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeIdentity {
    type Err = KairosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| KairosError::Identity(format!("expected host:port, got {s}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| KairosError::Identity(format!("bad port in {s}: {e}")))?;
        if host.is_empty() {
            return Err(KairosError::Identity(format!("empty host in {s}")));
        }
        Ok(Self::new(host, port))
    }
}

/// Timed/log tag for one binding: `"{scheduler}:{action}"`.
pub fn binding_tag(scheduler_name: &str, action_name: &str) -> String {
    format!("{scheduler_name}:{action_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_parses_host_port() {
        let id: NodeIdentity = "pi.local:8181".parse().unwrap();
        assert_eq!(id, NodeIdentity::new("pi.local", 8181));
        assert_eq!(id.to_string(), "pi.local:8181");
        assert_eq!(id.base_url(), "http://pi.local:8181");
    }

    #[test]
    fn identity_rejects_missing_port() {
        assert!("pi.local".parse::<NodeIdentity>().is_err());
        assert!(":80".parse::<NodeIdentity>().is_err());
        assert!("host:notaport".parse::<NodeIdentity>().is_err());
    }

    #[test]
    fn tag_joins_scheduler_and_action() {
        assert_eq!(binding_tag("every_second", "append"), "every_second:append");
    }
}
