//! Record and log types persisted by the network stats pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A pool (or the network estimate) whose hashrate is tracked every period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashrateSource {
    /// Network-wide estimate published by qubic.li. The primary source.
    Qli,
    Apool,
    Solutions,
    Minerlab,
    Nevermine,
}

impl HashrateSource {
    pub const ALL: [HashrateSource; 5] = [
        HashrateSource::Qli,
        HashrateSource::Apool,
        HashrateSource::Solutions,
        HashrateSource::Minerlab,
        HashrateSource::Nevermine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HashrateSource::Qli => "qli",
            HashrateSource::Apool => "apool",
            HashrateSource::Solutions => "solutions",
            HashrateSource::Minerlab => "minerlab",
            HashrateSource::Nevermine => "nevermine",
        }
    }

    /// The primary source may be recovered from history when it reports nothing.
    pub fn is_primary(&self) -> bool {
        matches!(self, HashrateSource::Qli)
    }
}

impl fmt::Display for HashrateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per tracked source.
///
/// Fields are named rather than keyed so that every source has to be handled
/// wherever a `PerSource` is built or read.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerSource<T> {
    pub qli: T,
    pub apool: T,
    pub solutions: T,
    pub minerlab: T,
    pub nevermine: T,
}

impl<T: Copy> PerSource<T> {
    pub fn splat(value: T) -> Self {
        Self {
            qli: value,
            apool: value,
            solutions: value,
            minerlab: value,
            nevermine: value,
        }
    }

    pub fn from_fn(mut f: impl FnMut(HashrateSource) -> T) -> Self {
        Self {
            qli: f(HashrateSource::Qli),
            apool: f(HashrateSource::Apool),
            solutions: f(HashrateSource::Solutions),
            minerlab: f(HashrateSource::Minerlab),
            nevermine: f(HashrateSource::Nevermine),
        }
    }

    pub fn get(&self, source: HashrateSource) -> T {
        match source {
            HashrateSource::Qli => self.qli,
            HashrateSource::Apool => self.apool,
            HashrateSource::Solutions => self.solutions,
            HashrateSource::Minerlab => self.minerlab,
            HashrateSource::Nevermine => self.nevermine,
        }
    }

    pub fn set(&mut self, source: HashrateSource, value: T) {
        match source {
            HashrateSource::Qli => self.qli = value,
            HashrateSource::Apool => self.apool = value,
            HashrateSource::Solutions => self.solutions = value,
            HashrateSource::Minerlab => self.minerlab = value,
            HashrateSource::Nevermine => self.nevermine = value,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (HashrateSource, T)> + '_ {
        HashrateSource::ALL.into_iter().map(move |s| (s, self.get(s)))
    }
}

/// Hashrate per source, in iterations per second.
pub type Hashrates = PerSource<f64>;

/// Per-source outcome of the recorder's admission checks.
pub type ValidationResults = PerSource<bool>;

impl ValidationResults {
    pub fn all_valid(&self) -> bool {
        self.iter().all(|(_, ok)| ok)
    }

    pub fn invalid_sources(&self) -> Vec<HashrateSource> {
        self.iter().filter(|(_, ok)| !ok).map(|(s, _)| s).collect()
    }
}

/// One accepted sample of every source's hashrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    /// Instant the sample was accepted
    pub timestamp: DateTime<Utc>,

    /// Boundary of the period this record belongs to
    pub period_start: DateTime<Utc>,

    pub hashrates: Hashrates,

    /// Whether the network was idle when the sample was taken
    pub was_idle: bool,
}

/// Vocabulary of pipeline events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Info,
    Skip,
    Warning,
    Validation,
    Error,
    Success,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Info => "info",
            EventType::Skip => "skip",
            EventType::Warning => "warning",
            EventType::Validation => "validation",
            EventType::Error => "error",
            EventType::Success => "success",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(EventType::Info),
            "skip" => Ok(EventType::Skip),
            "warning" => Ok(EventType::Warning),
            "validation" => Ok(EventType::Validation),
            "error" => Ok(EventType::Error),
            "success" => Ok(EventType::Success),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// One entry of the operator-facing event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub event_type: EventType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
