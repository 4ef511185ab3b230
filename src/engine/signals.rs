//! Outbound engine notifications.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ENGINE_INTERFACE;
use crate::bus::Signal;
use crate::types::{Error, ObjectPath, Result};

/// Styling run over the character range `start..end` of a preedit string.
///
/// Serialized as a `(start, end, kind)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u32, u32, u32)", into = "(u32, u32, u32)")]
pub struct Styling {
    pub start: u32,
    /// Exclusive.
    pub end: u32,
    /// Styling type code understood by the client.
    pub kind: u32,
}

impl Styling {
    pub fn new(start: u32, end: u32, kind: u32) -> Self {
        Self { start, end, kind }
    }
}

impl From<(u32, u32, u32)> for Styling {
    fn from((start, end, kind): (u32, u32, u32)) -> Self {
        Self { start, end, kind }
    }
}

impl From<Styling> for (u32, u32, u32) {
    fn from(s: Styling) -> Self {
        (s.start, s.end, s.kind)
    }
}

/// Check that runs are ordered, non-overlapping and inside `text`.
pub fn validate_styling(text: &str, styling: &[Styling]) -> Result<()> {
    let len = text.chars().count();
    let mut previous_end = 0u32;
    for (i, run) in styling.iter().enumerate() {
        if run.start > run.end {
            return Err(Error::validation(format!(
                "styling run {} has start {} after end {}",
                i, run.start, run.end
            )));
        }
        if run.end as usize > len {
            return Err(Error::validation(format!(
                "styling run {} ends at {} beyond text length {}",
                i, run.end, len
            )));
        }
        if run.start < previous_end {
            return Err(Error::validation(format!(
                "styling run {} overlaps or precedes the previous run",
                i
            )));
        }
        previous_end = run.end;
    }
    Ok(())
}

/// Signals an engine emits toward its client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "member", content = "body")]
pub enum EngineSignal {
    Commit {
        text: String,
    },
    PreeditChanged {
        text: String,
        styling: Vec<Styling>,
        cursor_pos: i32,
    },
    /// `offset` is relative to the cursor; negative means before it.
    DeleteSurroundingText {
        offset: i32,
        nchars: u32,
    },
}

impl EngineSignal {
    pub fn member(&self) -> &'static str {
        match self {
            EngineSignal::Commit { .. } => "Commit",
            EngineSignal::PreeditChanged { .. } => "PreeditChanged",
            EngineSignal::DeleteSurroundingText { .. } => "DeleteSurroundingText",
        }
    }

    /// Bus signal emitted from the engine at `path`.
    pub fn to_signal(&self, path: &ObjectPath) -> Result<Signal> {
        let body = match self {
            EngineSignal::Commit { text } => json!({ "text": text }),
            EngineSignal::PreeditChanged {
                text,
                styling,
                cursor_pos,
            } => json!({
                "text": text,
                "styling": serde_json::to_value(styling)?,
                "cursor_pos": cursor_pos,
            }),
            EngineSignal::DeleteSurroundingText { offset, nchars } => {
                json!({ "offset": offset, "nchars": nchars })
            }
        };
        Ok(Signal {
            path: path.clone(),
            interface: ENGINE_INTERFACE.to_string(),
            member: self.member().to_string(),
            body,
        })
    }

    /// Decode a bus signal back into an engine signal (client side).
    pub fn from_signal(signal: &Signal) -> Result<Self> {
        if signal.interface != ENGINE_INTERFACE {
            return Err(Error::validation(format!(
                "not an engine signal: {}",
                signal.interface
            )));
        }
        let tagged: Value = json!({ "member": signal.member, "body": signal.body });
        Ok(serde_json::from_value(tagged)?)
    }
}
