//! Event identifiers and their binary/text codecs.
//!
//! An [`EventId`] packs `(epoch, seq, tail)` into 32 bytes:
//!
//! | bytes  | field | encoding                           |
//! |--------|-------|------------------------------------|
//! | 0..4   | epoch | big-endian `u32`                   |
//! | 4..8   | seq   | big-endian `u32` (lamport time)    |
//! | 8..32  | tail  | 24 bytes of the event content hash |
//!
//! Three encodings are supported, each the exact inverse of its decoder:
//!
//! - **binary**: the 32 raw bytes ([`EventId::to_bytes`]).
//! - **text**: `0x` + 64 lowercase hex digits of the binary form. This is the
//!   form used on the wire and as the store key ([`fmt::Display`], [`FromStr`]).
//! - **full**: `epoch:seq:tailhex`, used in logs and on the command line
//!   ([`EventId::full_id`], [`EventId::parse_full_id`]).
//!
//! Ordering by `(epoch, seq)` is NOT causal order across creators; only
//! parent-before-child is guaranteed by the DAG.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Era identifier partitioning events into eviction windows.
pub type Epoch = u32;
/// Block height on the ledger.
pub type BlockHeight = u64;
/// Numeric id of the validator that created an event.
pub type ValidatorId = u32;

/// Length of the content-hash tail carried in every id.
pub const TAIL_LEN: usize = 24;
/// Length of the binary encoding.
pub const ID_LEN: usize = 8 + TAIL_LEN;
/// Length of the hex text encoding, without the `0x` prefix.
pub const HEX_LEN: usize = ID_LEN * 2;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from decoding an [`EventId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input does not have the fixed width of the encoding.
    #[error("event id must be {expected} {unit} long, got {actual}")]
    Length {
        expected: usize,
        actual: usize,
        unit: &'static str,
    },

    /// The input has the right width but is not valid hex.
    #[error("event id is not valid hex: {0}")]
    Hex(String),

    /// A field of the `epoch:seq:tail` form is missing or invalid.
    #[error("event id field `{field}` is invalid: {reason}")]
    Field {
        field: &'static str,
        reason: String,
    },
}

impl IdError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::MalformedId
    }
}

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// Identifier of one DAG event.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId {
    epoch: Epoch,
    seq: u32,
    tail: [u8; TAIL_LEN],
}

impl EventId {
    #[must_use]
    pub const fn new(epoch: Epoch, seq: u32, tail: [u8; TAIL_LEN]) -> Self {
        Self { epoch, seq, tail }
    }

    /// Build an id whose tail is the BLAKE3 hash of `content`, truncated.
    ///
    /// Used for synthetic DAGs and fixtures; real ids come from the source.
    #[must_use]
    pub fn from_content(epoch: Epoch, seq: u32, content: &[u8]) -> Self {
        let digest = blake3::hash(content);
        let mut tail = [0_u8; TAIL_LEN];
        tail.copy_from_slice(&digest.as_bytes()[..TAIL_LEN]);
        Self { epoch, seq, tail }
    }

    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    #[must_use]
    pub const fn seq(&self) -> u32 {
        self.seq
    }

    #[must_use]
    pub const fn tail(&self) -> &[u8; TAIL_LEN] {
        &self.tail
    }

    /// Binary encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ID_LEN] {
        let mut out = [0_u8; ID_LEN];
        out[0..4].copy_from_slice(&self.epoch.to_be_bytes());
        out[4..8].copy_from_slice(&self.seq.to_be_bytes());
        out[8..].copy_from_slice(&self.tail);
        out
    }

    /// Decode the binary encoding.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Length`] unless `bytes` is exactly [`ID_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        if bytes.len() != ID_LEN {
            return Err(IdError::Length {
                expected: ID_LEN,
                actual: bytes.len(),
                unit: "bytes",
            });
        }
        let mut epoch = [0_u8; 4];
        let mut seq = [0_u8; 4];
        let mut tail = [0_u8; TAIL_LEN];
        epoch.copy_from_slice(&bytes[0..4]);
        seq.copy_from_slice(&bytes[4..8]);
        tail.copy_from_slice(&bytes[8..]);
        Ok(Self {
            epoch: u32::from_be_bytes(epoch),
            seq: u32::from_be_bytes(seq),
            tail,
        })
    }

    /// Human-oriented `epoch:seq:tailhex` form.
    #[must_use]
    pub fn full_id(&self) -> String {
        format!("{}:{}:{}", self.epoch, self.seq, hex::encode(self.tail))
    }

    /// Decode the `epoch:seq:tailhex` form.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Field`] if a field is missing, not a decimal `u32`,
    /// or the tail is not exactly 48 hex digits.
    pub fn parse_full_id(s: &str) -> Result<Self, IdError> {
        let mut parts = s.splitn(3, ':');
        let epoch = parse_u32_field(parts.next(), "epoch")?;
        let seq = parse_u32_field(parts.next(), "seq")?;
        let tail_hex = parts.next().ok_or_else(|| IdError::Field {
            field: "tail",
            reason: "missing".to_string(),
        })?;
        if tail_hex.len() != TAIL_LEN * 2 {
            return Err(IdError::Field {
                field: "tail",
                reason: format!(
                    "expected {} hex digits, got {}",
                    TAIL_LEN * 2,
                    tail_hex.len()
                ),
            });
        }
        let mut tail = [0_u8; TAIL_LEN];
        hex::decode_to_slice(tail_hex, &mut tail).map_err(|err| IdError::Field {
            field: "tail",
            reason: err.to_string(),
        })?;
        Ok(Self { epoch, seq, tail })
    }

    /// Decode either the text form or the full form, picked by shape.
    ///
    /// # Errors
    ///
    /// Returns the error of whichever decoder the input was routed to.
    pub fn parse_any(s: &str) -> Result<Self, IdError> {
        if s.contains(':') {
            Self::parse_full_id(s)
        } else {
            s.parse()
        }
    }
}

fn parse_u32_field(raw: Option<&str>, field: &'static str) -> Result<u32, IdError> {
    let raw = raw.filter(|r| !r.is_empty()).ok_or_else(|| IdError::Field {
        field,
        reason: "missing".to_string(),
    })?;
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdError::Field {
            field,
            reason: format!("`{raw}` is not a decimal number"),
        });
    }
    raw.parse::<u32>().map_err(|err| IdError::Field {
        field,
        reason: err.to_string(),
    })
}

impl FromStr for EventId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != HEX_LEN {
            return Err(IdError::Length {
                expected: HEX_LEN,
                actual: digits.len(),
                unit: "hex digits",
            });
        }
        let mut bytes = [0_u8; ID_LEN];
        hex::decode_to_slice(digits, &mut bytes).map_err(|err| IdError::Hex(err.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.full_id())
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_any(&raw).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> EventId {
        EventId::from_content(7, 42, b"sample")
    }

    #[test]
    fn binary_layout_is_big_endian() {
        let id = EventId::new(1, 2, [0xab; TAIL_LEN]);
        let bytes = id.to_bytes();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 2]);
        assert!(bytes[8..].iter().all(|b| *b == 0xab));
    }

    #[test]
    fn text_form_is_fixed_width() {
        let text = sample().to_string();
        assert_eq!(text.len(), 2 + HEX_LEN);
        assert!(text.starts_with("0x000000070000002a"));
        assert_eq!(
            EventId::new(0, 0, [0; TAIL_LEN]).to_string().len(),
            2 + HEX_LEN
        );
    }

    #[test]
    fn text_parse_accepts_uppercase_and_missing_prefix() {
        let id = sample();
        let text = id.to_string();
        let upper = format!("0X{}", text[2..].to_ascii_uppercase());
        assert_eq!(upper.parse::<EventId>().expect("upper"), id);
        assert_eq!(text[2..].parse::<EventId>().expect("bare"), id);
    }

    #[test]
    fn full_form_matches_fields() {
        let id = EventId::new(3, 9, [0x01; TAIL_LEN]);
        assert_eq!(id.full_id(), format!("3:9:{}", "01".repeat(TAIL_LEN)));
        assert_eq!(EventId::parse_full_id(&id.full_id()).expect("parse"), id);
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(matches!(
            "0x1234".parse::<EventId>(),
            Err(IdError::Length { actual: 4, .. })
        ));
        let bad_hex = format!("0x{}", "zz".repeat(ID_LEN));
        assert!(matches!(bad_hex.parse::<EventId>(), Err(IdError::Hex(_))));
        assert!(matches!(
            "".parse::<EventId>(),
            Err(IdError::Length { actual: 0, .. })
        ));
    }

    #[test]
    fn malformed_full_form_is_rejected() {
        let tail = "00".repeat(TAIL_LEN);
        for bad in [
            "1:".to_string(),
            "1:2".to_string(),
            format!(":2:{tail}"),
            format!("x:2:{tail}"),
            format!("1:-2:{tail}"),
            format!("1:2:{}", &tail[2..]),
            format!("4294967296:2:{tail}"),
            format!("1:2:{}zz", &tail[2..]),
        ] {
            let err = EventId::parse_full_id(&bad).expect_err(&bad);
            assert!(matches!(err, IdError::Field { .. }), "{bad}: {err}");
            assert_eq!(err.code(), ErrorCode::MalformedId);
        }
    }

    #[test]
    fn binary_rejects_wrong_length() {
        assert!(EventId::from_bytes(&[0_u8; ID_LEN - 1]).is_err());
        assert!(EventId::from_bytes(&[0_u8; ID_LEN + 1]).is_err());
    }

    #[test]
    fn serde_uses_text_form_and_reads_both() {
        let id = sample();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
        let back: EventId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
        let full: EventId =
            serde_json::from_str(&format!("\"{}\"", id.full_id())).expect("full form");
        assert_eq!(full, id);
        assert!(serde_json::from_str::<EventId>("\"nope\"").is_err());
    }

    fn any_id() -> impl Strategy<Value = EventId> {
        (any::<u32>(), any::<u32>(), any::<[u8; TAIL_LEN]>())
            .prop_map(|(epoch, seq, tail)| EventId::new(epoch, seq, tail))
    }

    proptest! {
        #[test]
        fn text_round_trip(id in any_id()) {
            prop_assert_eq!(id.to_string().parse::<EventId>().expect("text"), id);
        }

        #[test]
        fn binary_round_trip(id in any_id()) {
            prop_assert_eq!(EventId::from_bytes(&id.to_bytes()).expect("binary"), id);
        }

        #[test]
        fn full_round_trip(id in any_id()) {
            prop_assert_eq!(EventId::parse_full_id(&id.full_id()).expect("full"), id);
        }

        #[test]
        fn short_hex_is_always_rejected(s in "[0-9a-f]{0,63}") {
            prop_assert!(s.parse::<EventId>().is_err());
            let prefixed = format!("0x{s}");
            prop_assert!(prefixed.parse::<EventId>().is_err());
        }
    }
}
