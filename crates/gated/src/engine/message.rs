//! Type-safe message system for gated
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use super::state::GateCommand;
use super::state::GateState;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug)]
pub enum FromIntegrationMessage {
    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        unique_id: String,
        integration_name: String,
    },

    /// An entity was removed
    EntityRemoved { entity_id: String },

    /// A cover's state or availability changed
    CoverStateChanged {
        entity_id: String,
        state: GateState,
        available: bool,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone)]
pub enum ToIntegrationMessage {
    /// Command to open, close, or stop a cover
    CoverCommand {
        entity_id: String,
        command: GateCommand,
    },
}
