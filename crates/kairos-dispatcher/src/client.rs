//! Blocking HTTP calls to peer dispatchers.
//!
//! Calls happen on Timed worker threads or blocking tasks, never while the
//! dispatcher lock is held.

use std::sync::OnceLock;

use kairos_core::{NodeIdentity, Rez};
use reqwest::{blocking::Client, Url};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{action::Action, error::ActionError};

#[derive(Serialize)]
struct SuppliedRequest<'a> {
    action: &'a Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    rez: Option<&'a Rez>,
}

#[derive(Default)]
pub struct PeerClient {
    // built on first use so that no client is created or dropped on an async thread
    http: OnceLock<Client>,
}

impl PeerClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn http(&self) -> &Client {
        self.http.get_or_init(Client::new)
    }

    /// Peer base URL plus `segments`, each percent-encoded as one path segment.
    fn endpoint(peer: &NodeIdentity, segments: &[&str]) -> Result<Url, ActionError> {
        let invalid = || ActionError::failed(format!("{peer} is not a valid peer address"));
        let mut url = Url::parse(&peer.base_url()).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `POST {peer}/actions/{name}/execute` with the Rez as body.
    pub fn execute_action(
        &self,
        peer: &NodeIdentity,
        action_name: &str,
        rez: Option<&Rez>,
    ) -> Result<Rez, ActionError> {
        let url = Self::endpoint(peer, &["actions", action_name, "execute"])?;
        let body = match rez {
            Some(r) => serde_json::to_value(r).map_err(|e| ActionError::failed(e.to_string()))?,
            None => json!({}),
        };
        self.post(peer, url, &body)
    }

    /// `POST {peer}/execution/with_rez` with `{action, rez}` as body.
    pub fn execute_supplied(
        &self,
        peer: &NodeIdentity,
        action: &Action,
        rez: Option<&Rez>,
    ) -> Result<Rez, ActionError> {
        let url = Self::endpoint(peer, &["execution", "with_rez"])?;
        let body = serde_json::to_value(SuppliedRequest { action, rez })
            .map_err(|e| ActionError::failed(e.to_string()))?;
        self.post(peer, url, &body)
    }

    fn post(&self, peer: &NodeIdentity, url: Url, body: &Value) -> Result<Rez, ActionError> {
        debug!(%url, "calling peer");
        let remote = |status: Option<u16>, message: String| ActionError::Remote {
            server: peer.to_string(),
            status,
            message,
        };

        let response = self
            .http()
            .post(url)
            .json(body)
            .send()
            .map_err(|e| remote(None, e.to_string()))?;

        let status = response.status();
        let text = response.text().map_err(|e| remote(Some(status.as_u16()), e.to_string()))?;
        if !status.is_success() {
            // peers answer failures with {"outcome", "error", ...}
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            return Err(remote(Some(status.as_u16()), message));
        }
        serde_json::from_str(&text)
            .map_err(|e| remote(Some(status.as_u16()), format!("undecodable Rez: {e}")))
    }
}
