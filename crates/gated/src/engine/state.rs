use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// State of a gate, derived from the most recent successful status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GateState {
    Open,
    Closed,
    Opening,
    Closing,
    Stopped,

    /// The device responded but the payload could not be interpreted.
    #[default]
    Unknown,
}

/// Commands a gate accepts.
///
/// The lowercase display name doubles as the vendor execute-endpoint path
/// segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GateCommand {
    Open,
    Close,
    Stop,
}

/// State of a cover entity as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverState {
    /// Gate state from the last completed poll
    pub state: GateState,

    /// False once five consecutive poll/command cycles have failed
    pub available: bool,

    /// Stable identifier: vendor UUID when resolvable, else the configured
    /// device name
    pub unique_id: String,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub covers: HashMap<String, CoverState>,
}
