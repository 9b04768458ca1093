use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use stampede_metrics::{CollectorSnapshot, MetricsSnapshot};

use crate::context::CHECKS;
use crate::error::Result;
use crate::thresholds::ThresholdResult;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Completed,
    Cancelled,
    AbortedByThreshold,
}

/// Final result of a run. Field names are a stable JSON contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub state: RunState,
    /// Wall time, serialized in milliseconds.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub iterations: u64,
    #[serde(default)]
    pub interrupted_iterations: u64,
    #[serde(default)]
    pub vus_max: u64,
    pub metrics: MetricsSnapshot,
    pub thresholds: BTreeMap<String, ThresholdResult>,
    #[serde(default)]
    pub ingest_errors: BTreeMap<String, u64>,
}

impl RunSummary {
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.values().all(|t| t.passed)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = (&str, &ThresholdResult)> + '_ {
        self.thresholds
            .iter()
            .filter(|(_, t)| !t.passed)
            .map(|(name, t)| (name.as_str(), t))
    }

    pub fn metric(&self, key: &str) -> Option<&CollectorSnapshot> {
        self.metrics.get(key)
    }

    /// Value of a rate metric, if `key` is one.
    pub fn rate(&self, key: &str) -> Option<f64> {
        match self.metric(key)? {
            CollectorSnapshot::Rate(r) => Some(r.rate),
            _ => None,
        }
    }

    pub fn checks_failed(&self) -> u64 {
        match self.metric(CHECKS) {
            Some(CollectorSnapshot::Rate(r)) => r.fails,
            _ => 0,
        }
    }
}

/// Turns a summary into a document (JSON, text, ...).
pub trait SummaryExporter {
    /// Short format name used in logs.
    fn format(&self) -> &'static str;

    fn export(&self, summary: &RunSummary) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExporter {
    pub pretty: bool,
}

impl JsonExporter {
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl SummaryExporter for JsonExporter {
    fn format(&self) -> &'static str {
        "json"
    }

    fn export(&self, summary: &RunSummary) -> Result<String> {
        let out = if self.pretty {
            serde_json::to_string_pretty(summary)?
        } else {
            serde_json::to_string(summary)?
        };
        Ok(out)
    }
}

/// Parses a document produced by [`JsonExporter`].
pub fn summary_from_json(raw: &str) -> Result<RunSummary> {
    Ok(serde_json::from_str(raw)?)
}

mod duration_ms {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        Duration::try_from_secs_f64(ms / 1000.0).map_err(D::Error::custom)
    }
}
