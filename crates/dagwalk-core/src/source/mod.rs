//! Where events come from.
//!
//! The crawler only sees the [`EventSource`] trait. Adapters:
//! - [`RpcSource`] speaks JSON-RPC over HTTP to a ledger node
//! - [`MemorySource`] serves an in-memory DAG, e.g. loaded from a JSONL dump

pub mod jsonl;
pub mod memory;
pub mod rpc;

use crate::error::ErrorCode;
use crate::event::{Event, EventError};
use crate::id::{BlockHeight, Epoch, EventId, IdError};

pub use memory::MemorySource;
pub use rpc::RpcSource;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The source could not be reached or timed out; worth retrying.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The source answered with something that does not decode.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) => ErrorCode::TransportFailure,
            Self::Malformed(_) => ErrorCode::MalformedEvent,
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code().is_transient()
    }
}

impl From<IdError> for SourceError {
    fn from(err: IdError) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<EventError> for SourceError {
    fn from(err: EventError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// A ledger node, or anything that can answer like one.
///
/// Missing data is `Ok(None)`, not an error.
pub trait EventSource: Send {
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source cannot answer.
    fn current_epoch(&mut self) -> Result<Epoch, SourceError>;

    /// Height of the newest block the source knows.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source cannot answer.
    fn latest_block(&mut self) -> Result<BlockHeight, SourceError>;

    /// The atropos event a block resolves to, `None` if the block does not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source cannot answer.
    fn block_atropos(&mut self, height: BlockHeight) -> Result<Option<EventId>, SourceError>;

    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source cannot answer or the event
    /// does not decode.
    fn get_event(&mut self, id: &EventId) -> Result<Option<Event>, SourceError>;

    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source cannot answer.
    fn has_event(&mut self, id: &EventId) -> Result<bool, SourceError> {
        Ok(self.get_event(id)?.is_some())
    }

    /// Drop any open connection; the next call reconnects.
    fn disconnect(&mut self);
}

impl<T: EventSource + ?Sized> EventSource for Box<T> {
    fn current_epoch(&mut self) -> Result<Epoch, SourceError> {
        (**self).current_epoch()
    }

    fn latest_block(&mut self) -> Result<BlockHeight, SourceError> {
        (**self).latest_block()
    }

    fn block_atropos(&mut self, height: BlockHeight) -> Result<Option<EventId>, SourceError> {
        (**self).block_atropos(height)
    }

    fn get_event(&mut self, id: &EventId) -> Result<Option<Event>, SourceError> {
        (**self).get_event(id)
    }

    fn has_event(&mut self, id: &EventId) -> Result<bool, SourceError> {
        (**self).has_event(id)
    }

    fn disconnect(&mut self) {
        (**self).disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(SourceError::Transport("timeout".into()).is_transient());
        assert!(!SourceError::Malformed("bad id".into()).is_transient());
    }

    #[test]
    fn decode_errors_become_malformed() {
        let err: SourceError = "0x12".parse::<EventId>().expect_err("short").into();
        assert_eq!(err.code(), ErrorCode::MalformedEvent);
    }
}
