//! Network snapshot consumed by the sample recorder.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{HashrateSource, Hashrates};

/// Point-in-time view of the network: idle flag plus each source's hashrate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub idle: bool,
    pub hashrates: Hashrates,
}

impl NetworkSnapshot {
    pub fn new(idle: bool, hashrates: Hashrates) -> Self {
        Self { idle, hashrates }
    }

    /// Build a snapshot from the aggregated tool payload
    /// (`{"status": ..., "data": {...}}`).
    ///
    /// The network estimate lives under `data.pool_hashrate.current.qli_hashrate`,
    /// each pool's corrected value under `data.<pool>.corrected_hashrate`.
    /// Missing or non-numeric values become 0.
    pub fn from_tool_payload(payload: &Value) -> Self {
        let data = payload.get("data").unwrap_or(&Value::Null);

        let idle = data.get("idle").and_then(Value::as_bool).unwrap_or(false);

        let hashrates = Hashrates::from_fn(|source| {
            let raw = match source {
                HashrateSource::Qli => data
                    .get("pool_hashrate")
                    .and_then(|p| p.get("current"))
                    .and_then(|c| c.get("qli_hashrate")),
                pool => data
                    .get(pool.as_str())
                    .and_then(|p| p.get("corrected_hashrate")),
            };
            raw.map(coerce_number).unwrap_or(0.0)
        });

        Self { idle, hashrates }
    }
}

fn coerce_number(value: &Value) -> f64 {
    let number = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };

    if number.is_finite() {
        number
    } else {
        0.0
    }
}
