//! Events published by a run.
//!
//! A run emits, in order: one `Polarity` per channel, then for normal runs a
//! stream of `TubeData`, `ChannelStatus` and `TimeInfo`, and always exactly
//! one `Completed` as its last event.

use serde::{Deserialize, Serialize};
use smdt_core::channel::{ChannelId, Polarity};
use smdt_core::sample::{ChannelStatusReport, TubeDataSample};
use std::fmt;

/// Identifier of one started run.
pub type RunId = u64;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum RunOutcome {
    Finished,
    Cancelled,
    Failed(String),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Finished => write!(f, "finished"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
            RunOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Everything a run publishes, in order; `Completed` is always last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Polarity {
        channel: ChannelId,
        polarity: Polarity,
    },
    TubeData(TubeDataSample),
    ChannelStatus(ChannelStatusReport),
    /// Seconds since the run started and seconds left in the scan, as
    /// `"{n} s"` strings
    TimeInfo {
        elapsed: String,
        remaining: String,
    },
    Completed {
        run_id: RunId,
        outcome: RunOutcome,
    },
}

impl RunEvent {
    pub(crate) fn time_info(elapsed_secs: u64, remaining_secs: u64) -> Self {
        RunEvent::TimeInfo {
            elapsed: format!("{} s", elapsed_secs),
            remaining: format!("{} s", remaining_secs),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunEvent::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_info_strings() {
        assert_eq!(
            RunEvent::time_info(3, 7),
            RunEvent::TimeInfo {
                elapsed: "3 s".to_string(),
                remaining: "7 s".to_string(),
            }
        );
    }

    #[test]
    fn completed_serializes_with_outcome() {
        let event = RunEvent::Completed {
            run_id: 4,
            outcome: RunOutcome::Failed("relay timeout".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["outcome"]["outcome"], "failed");
        assert_eq!(json["outcome"]["reason"], "relay timeout");
    }
}
