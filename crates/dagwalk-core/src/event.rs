//! The DAG node handed between pipeline stages.
//!
//! An [`Event`] is immutable once observed. Stages pass it by value, so at
//! any moment exactly one stage owns a given event.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::id::{BlockHeight, Epoch, EventId, ValidatorId};

/// Fixed per-event overhead used by [`Event::approx_size`].
const EVENT_OVERHEAD_BYTES: usize = 64;

/// Role tag of an event within its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The decision event a block height resolves to.
    Atropos,
    /// A frame root.
    Root,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Atropos => "atropos",
            Self::Root => "root",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atropos" => Ok(Self::Atropos),
            "root" => Ok(Self::Root),
            other => Err(EventError::UnknownRole(other.to_string())),
        }
    }
}

/// Shape errors detected when building an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("event {0} lists itself as a parent")]
    SelfParent(EventId),

    #[error("event {event} lists parent {parent} more than once")]
    DuplicateParent { event: EventId, parent: EventId },

    #[error("unknown event role `{0}`")]
    UnknownRole(String),
}

impl EventError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::MalformedEvent
    }
}

/// One DAG event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    id: EventId,
    creator: ValidatorId,
    parents: Vec<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block: Option<BlockHeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
}

impl Event {
    /// Build an event, validating the parent set.
    ///
    /// Parent order is preserved; it is part of the event's identity on the
    /// ledger and is restored verbatim from the store.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SelfParent`] or [`EventError::DuplicateParent`]
    /// if the parents are not a proper set excluding the event itself.
    pub fn new(
        id: EventId,
        creator: ValidatorId,
        parents: Vec<EventId>,
    ) -> Result<Self, EventError> {
        let mut seen = HashSet::with_capacity(parents.len());
        for parent in &parents {
            if *parent == id {
                return Err(EventError::SelfParent(id));
            }
            if !seen.insert(*parent) {
                return Err(EventError::DuplicateParent {
                    event: id,
                    parent: *parent,
                });
            }
        }
        Ok(Self {
            id,
            creator,
            parents,
            block: None,
            role: None,
        })
    }

    /// Attach the block this event was discovered under.
    #[must_use]
    pub fn with_block(mut self, block: BlockHeight) -> Self {
        self.block = Some(block);
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    #[must_use]
    pub const fn id(&self) -> EventId {
        self.id
    }

    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.id.epoch()
    }

    #[must_use]
    pub const fn creator(&self) -> ValidatorId {
        self.creator
    }

    #[must_use]
    pub fn parents(&self) -> &[EventId] {
        &self.parents
    }

    #[must_use]
    pub const fn block(&self) -> Option<BlockHeight> {
        self.block
    }

    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        self.role
    }

    #[must_use]
    pub fn is_atropos(&self) -> bool {
        self.role == Some(Role::Atropos)
    }

    /// Approximate in-memory weight, used by capacity bounds.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        EVENT_OVERHEAD_BYTES + crate::id::ID_LEN * (1 + self.parents.len())
    }
}

/// Wire shape; goes through [`Event::new`] so malformed input is rejected.
#[derive(Deserialize)]
struct RawEvent {
    id: EventId,
    creator: ValidatorId,
    #[serde(default)]
    parents: Vec<EventId>,
    #[serde(default)]
    block: Option<BlockHeight>,
    #[serde(default)]
    role: Option<Role>,
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEvent::deserialize(deserializer)?;
        let mut event =
            Self::new(raw.id, raw.creator, raw.parents).map_err(serde::de::Error::custom)?;
        event.block = raw.block;
        event.role = raw.role;
        Ok(event)
    }
}
