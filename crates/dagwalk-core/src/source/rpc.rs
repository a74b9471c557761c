//! JSON-RPC 2.0 over HTTP.
//!
//! Methods used: `eth_blockNumber`, `eth_getBlockByNumber` (a block's hash
//! is its atropos event id), `ftm_getEvent` and `ftm_currentEpoch`.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, trace};

use super::{EventSource, SourceError};
use crate::event::Event;
use crate::id::{BlockHeight, Epoch, EventId, ValidatorId};

pub struct RpcSource {
    url: String,
    timeout: Duration,
    agent: Option<ureq::Agent>,
    next_id: u64,
}

impl std::fmt::Debug for RpcSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSource")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("connected", &self.agent.is_some())
            .finish()
    }
}

impl RpcSource {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            agent: None,
            next_id: 0,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn agent(&mut self) -> &ureq::Agent {
        let timeout = self.timeout;
        let url = &self.url;
        self.agent.get_or_insert_with(|| {
            info!(%url, "connecting to event source");
            ureq::AgentBuilder::new().timeout(timeout).build()
        })
    }

    fn call<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> Result<T, SourceError> {
        self.next_id += 1;
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id,
            "method": method,
            "params": params,
        });
        trace!(method, id = self.next_id, "rpc request");

        let url = self.url.clone();
        let response = self
            .agent()
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(body)
            .map_err(|err| classify(method, err))?;

        let reply: RpcReply = response
            .into_json()
            .map_err(|err| SourceError::Malformed(format!("{method}: undecodable reply: {err}")))?;
        if let Some(error) = reply.error {
            return Err(SourceError::Malformed(format!(
                "{method}: rpc error {}: {}",
                error.code, error.message
            )));
        }
        serde_json::from_value(reply.result)
            .map_err(|err| SourceError::Malformed(format!("{method}: unexpected result: {err}")))
    }
}

fn classify(method: &str, err: ureq::Error) -> SourceError {
    match err {
        ureq::Error::Status(status, _) if status == 429 || status >= 500 => {
            SourceError::Transport(format!("{method}: http status {status}"))
        }
        ureq::Error::Status(status, _) => {
            SourceError::Malformed(format!("{method}: http status {status}"))
        }
        ureq::Error::Transport(transport) => {
            SourceError::Transport(format!("{method}: {transport}"))
        }
    }
}

#[derive(Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Hex `0x..` quantity, also accepted as a plain JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Quantity(u64);

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Self(n)),
            Repr::Text(text) => parse_quantity(&text).map(Self).map_err(serde::de::Error::custom),
        }
    }
}

fn parse_quantity(text: &str) -> Result<u64, String> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| format!("quantity `{text}` lacks 0x prefix"))?;
    u64::from_str_radix(digits, 16).map_err(|err| format!("quantity `{text}`: {err}"))
}

#[derive(Deserialize)]
struct RpcBlock {
    hash: EventId,
}

#[derive(Deserialize)]
struct RpcEvent {
    id: EventId,
    creator: Quantity,
    #[serde(default)]
    parents: Vec<EventId>,
}

impl TryFrom<RpcEvent> for Event {
    type Error = SourceError;

    fn try_from(raw: RpcEvent) -> Result<Self, Self::Error> {
        let creator = ValidatorId::try_from(raw.creator.0)
            .map_err(|_| SourceError::Malformed(format!("creator {} out of range", raw.creator.0)))?;
        Ok(Self::new(raw.id, creator, raw.parents)?)
    }
}

impl EventSource for RpcSource {
    fn current_epoch(&mut self) -> Result<Epoch, SourceError> {
        let Quantity(epoch) = self.call("ftm_currentEpoch", json!([]))?;
        Epoch::try_from(epoch).map_err(|_| SourceError::Malformed(format!("epoch {epoch} out of range")))
    }

    fn latest_block(&mut self) -> Result<BlockHeight, SourceError> {
        let Quantity(height) = self.call("eth_blockNumber", json!([]))?;
        Ok(height)
    }

    fn block_atropos(&mut self, height: BlockHeight) -> Result<Option<EventId>, SourceError> {
        let block: Option<RpcBlock> =
            self.call("eth_getBlockByNumber", json!([format!("0x{height:x}"), false]))?;
        Ok(block.map(|block| block.hash))
    }

    fn get_event(&mut self, id: &EventId) -> Result<Option<Event>, SourceError> {
        let raw: Option<RpcEvent> = self.call("ftm_getEvent", json!([id.to_string()]))?;
        raw.map(Event::try_from).transpose()
    }

    fn disconnect(&mut self) {
        if self.agent.take().is_some() {
            debug!(url = %self.url, "disconnected from event source");
        }
    }
}
