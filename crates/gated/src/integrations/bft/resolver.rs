//! Gate state resolution from vendor diagnosis payloads.
//!
//! The diagnosis endpoint reports two engine positions (0-100) and two signed
//! velocities. The resolver is a pure function over one payload: it never
//! fails, and anything it cannot interpret resolves to `GateState::Unknown`.

use serde_json::Value;

use crate::engine::GateState;

/// Map a raw diagnosis payload to a gate state.
///
/// Both engines fully extended and at rest is open; both retracted and at
/// rest is closed; at rest anywhere in between is stopped. A positive
/// velocity means the gate is opening, a negative one that it is closing.
pub fn resolve(payload: &Value) -> GateState {
    let (Some(pos1), Some(pos2), Some(vel1), Some(vel2)) = (
        field(payload, "first_engine_pos_int"),
        field(payload, "second_engine_pos_int"),
        field(payload, "first_engine_vel_int"),
        field(payload, "second_engine_vel_int"),
    ) else {
        return GateState::Unknown;
    };

    if vel1 == 0 && vel2 == 0 {
        if pos1 == 100 && pos2 == 100 {
            GateState::Open
        } else if pos1 == 0 && pos2 == 0 {
            GateState::Closed
        } else if pos1 > 0 || pos2 > 0 {
            GateState::Stopped
        } else {
            GateState::Unknown
        }
    } else if vel1 > 0 || vel2 > 0 {
        GateState::Opening
    } else {
        GateState::Closing
    }
}

fn field(payload: &Value, key: &str) -> Option<i64> {
    payload.get(key).and_then(Value::as_i64)
}
