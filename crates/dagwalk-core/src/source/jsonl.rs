//! JSON Lines event dumps: one [`Event`] object per line.
//!
//! Blank lines are skipped. A line that does not decode, including one that
//! is not valid UTF-8, is reported with its 1-based line number and reading
//! continues with the next line. Only a failing reader ends the stream.

use std::io::{BufRead, Write};

use crate::error::ErrorCode;
use crate::event::Event;

#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl JsonlError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) => ErrorCode::InputUnreadable,
            Self::Decode { .. } => ErrorCode::MalformedEvent,
        }
    }
}

/// Iterator over the events of a JSONL stream.
pub struct JsonlEvents<R> {
    reader: R,
    line: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> Iterator for JsonlEvents<R> {
    type Item = Result<Event, JsonlError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(err.into())),
            }
            self.line += 1;
            let bytes = self.buf.trim_ascii();
            if bytes.is_empty() {
                continue;
            }
            return Some(
                serde_json::from_slice(bytes).map_err(|source| JsonlError::Decode {
                    line: self.line,
                    source,
                }),
            );
        }
    }
}

#[must_use]
pub const fn read_events<R: BufRead>(reader: R) -> JsonlEvents<R> {
    JsonlEvents {
        reader,
        line: 0,
        buf: Vec::new(),
    }
}

/// Write `events` as JSON Lines. Returns the number written.
///
/// # Errors
///
/// Returns an I/O error if writing fails.
pub fn write_events<'a, W: Write>(
    mut writer: W,
    events: impl IntoIterator<Item = &'a Event>,
) -> std::io::Result<usize> {
    let mut count = 0;
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}
