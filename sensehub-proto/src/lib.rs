use serde::{Deserialize, Serialize};

/// A single sensor reading on the wire: `{"sensor_value": <number>}`.
///
/// The same object is used in both directions: the station returns it from
/// `GET /status` and accepts it as the body of `POST /update`. The field
/// name is part of the contract with deployed device firmware, so renaming
/// it is a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReport {
    pub sensor_value: f64,
}
