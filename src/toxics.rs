//! Toxics: configurable byte-stream transformations that simulate network
//! pathologies. Each toxic is a parameter struct with a `pump` loop; the
//! [`ToxicKind`] union closes over the set and doubles as the JSON decoder
//! (serde selects the variant by the `name` tag).

mod bandwidth;
mod latency;
mod noop;
mod slow_close;
mod timeout;

pub use bandwidth::Bandwidth;
pub use latency::Latency;
pub use noop::Noop;
pub use slow_close::SlowClose;
pub use timeout::Timeout;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::stream::{PumpExit, StageStream};

/// Errors surfaced to the configuration side. Data-plane failures never
/// appear here; they terminate the affected link instead.
#[derive(Debug, Error)]
pub enum ToxicError {
    #[error("unknown toxic: {0}")]
    UnknownToxic(String),
    #[error("invalid toxic payload: {0}")]
    Decode(String),
}

/// A configured toxic: the stream transformation plus its enabled flag.
///
/// Serializes to the wire schema used by the admin side: a flat JSON
/// object with `name`, `enabled`, and the toxic's numeric parameters.
///
/// ```json
/// {"name": "latency", "enabled": true, "latency": 100, "jitter": 5}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toxic {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: ToxicKind,
}

/// The closed set of stream transformations, tagged by the same `name`
/// that identifies a toxic at the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ToxicKind {
    Noop(Noop),
    SlowClose(SlowClose),
    Latency(Latency),
    Bandwidth(Bandwidth),
    Timeout(Timeout),
}

impl ToxicKind {
    pub fn name(&self) -> &'static str {
        match self {
            ToxicKind::Noop(_) => "noop",
            ToxicKind::SlowClose(_) => "slow_close",
            ToxicKind::Latency(_) => "latency",
            ToxicKind::Bandwidth(_) => "bandwidth",
            ToxicKind::Timeout(_) => "timeout",
        }
    }

    /// Run this toxic between the stream's endpoints until the input
    /// closes, the output closes, or a stop signal fires.
    pub(crate) async fn pump(&self, io: &mut StageStream) -> PumpExit {
        match self {
            ToxicKind::Noop(t) => t.pump(io).await,
            ToxicKind::SlowClose(t) => t.pump(io).await,
            ToxicKind::Latency(t) => t.pump(io).await,
            ToxicKind::Bandwidth(t) => t.pump(io).await,
            ToxicKind::Timeout(t) => t.pump(io).await,
        }
    }
}

impl Toxic {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub(crate) fn disabled(kind: ToxicKind) -> Self {
        Self {
            enabled: false,
            kind,
        }
    }

    /// The stage object links actually run for this slot: the configured
    /// kind when enabled, the noop sentinel otherwise.
    pub(crate) fn stage(&self) -> ToxicKind {
        if self.enabled {
            self.kind.clone()
        } else {
            ToxicKind::Noop(Noop::default())
        }
    }

    /// Overlay a JSON payload onto this configuration. Fields absent from
    /// the payload keep their current values, so `{"enabled": true}` alone
    /// re-enables a previously configured toxic. A `name` field must match
    /// this toxic; unknown fields are errors only in strict mode.
    pub fn merge_json(&self, data: &[u8], strict: bool) -> Result<Toxic, ToxicError> {
        let patch: serde_json::Map<String, Value> =
            serde_json::from_slice(data).map_err(|err| ToxicError::Decode(err.to_string()))?;

        if let Some(name) = patch.get("name") {
            if name.as_str() != Some(self.name()) {
                return Err(ToxicError::Decode(format!(
                    "name mismatch: payload addresses {name}, expected \"{}\"",
                    self.name()
                )));
            }
        }

        // The current config serializes to exactly the set of legal keys.
        let Ok(Value::Object(mut base)) = serde_json::to_value(self) else {
            return Err(ToxicError::Decode(
                "toxic did not serialize to an object".into(),
            ));
        };
        for (key, value) in patch {
            if !base.contains_key(&key) {
                if strict {
                    return Err(ToxicError::Decode(format!("unknown field: {key}")));
                }
                continue;
            }
            base.insert(key, value);
        }

        serde_json::from_value(Value::Object(base))
            .map_err(|err| ToxicError::Decode(err.to_string()))
    }
}
