//! Periodic averaged recording of named signals

use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use hrl_core::{RLError, Result};

/// How a channel's per-tick vector is reduced before accumulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduce {
    /// Keep the vector as is
    Raw,
    /// Mean of the components
    Mean,
    /// Fraction of components below 0.01
    Sparsity,
}

impl Reduce {
    #[allow(clippy::cast_precision_loss)]
    fn apply(self, values: &[f64]) -> Vec<f64> {
        match self {
            Self::Raw => values.to_vec(),
            Self::Mean if values.is_empty() => vec![0.0],
            Self::Mean => vec![values.iter().sum::<f64>() / values.len() as f64],
            Self::Sparsity if values.is_empty() => vec![0.0],
            Self::Sparsity => {
                let quiet = values.iter().filter(|v| **v < 0.01).count();
                vec![quiet as f64 / values.len() as f64]
            }
        }
    }
}

/// One closed averaging period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    /// Midpoint of the period
    pub t: f64,
    /// Averaged values
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct Channel {
    reduce: Reduce,
    entries: Vec<Entry>,
    #[serde(skip)]
    sum: Option<Vec<f64>>,
    #[serde(skip)]
    ticks: u32,
}

/// Collects named channels every tick and closes an averaged entry each period
#[derive(Debug, Clone, Serialize)]
pub struct DataRecorder {
    period: f64,
    header: String,
    period_start: f64,
    channels: IndexMap<String, Channel>,
}

impl DataRecorder {
    /// Recorder closing one entry per `period` time units
    pub fn new(period: f64, header: impl Into<String>) -> Result<Self> {
        if !(period.is_finite() && period > 0.0) {
            return Err(RLError::Config(format!("record period must be positive, got {period}")));
        }
        Ok(Self {
            period,
            header: header.into(),
            period_start: 0.0,
            channels: IndexMap::new(),
        })
    }

    /// Register a channel; channels are written in registration order
    pub fn add_channel(&mut self, name: impl Into<String>, reduce: Reduce) {
        self.channels.entry(name.into()).or_insert(Channel {
            reduce,
            entries: Vec::new(),
            sum: None,
            ticks: 0,
        });
    }

    /// Whether a channel called `name` exists
    #[must_use]
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Accumulate this tick's value of channel `name`
    pub fn record(&mut self, name: &str, values: &[f64]) -> Result<()> {
        let channel = self
            .channels
            .get_mut(name)
            .ok_or_else(|| RLError::Config(format!("unknown record channel '{name}'")))?;
        let reduced = channel.reduce.apply(values);
        match &mut channel.sum {
            Some(sum) if sum.len() == reduced.len() => {
                for (s, v) in sum.iter_mut().zip(&reduced) {
                    *s += v;
                }
            }
            Some(sum) => {
                return Err(RLError::DimensionMismatch {
                    expected: sum.len(),
                    actual: reduced.len(),
                })
            }
            None => channel.sum = Some(reduced),
        }
        channel.ticks += 1;
        Ok(())
    }

    /// Close the current period if `t` has reached its end
    pub fn advance(&mut self, t: f64) {
        if t < self.period_start + self.period {
            return;
        }
        let mid = self.period_start + 0.5 * self.period;
        for channel in self.channels.values_mut() {
            if let Some(sum) = channel.sum.take() {
                let n = f64::from(channel.ticks.max(1));
                channel.entries.push(Entry {
                    t: mid,
                    values: sum.into_iter().map(|s| s / n).collect(),
                });
            }
            channel.ticks = 0;
        }
        self.period_start += self.period;
        debug!(t, "closed record period");
    }

    /// Closed entries of channel `name`
    #[must_use]
    pub fn entries(&self, name: &str) -> &[Entry] {
        self.channels
            .get(name)
            .map_or(&[][..], |c| c.entries.as_slice())
    }

    /// Text form: the header, then one line per channel with entries
    /// separated by `;` and values within an entry by spaces
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = self.header.clone();
        for channel in self.channels.values() {
            out.push('\n');
            let line: Vec<String> = channel
                .entries
                .iter()
                .map(|e| {
                    std::iter::once(e.t)
                        .chain(e.values.iter().copied())
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect();
            out.push_str(&line.join(";"));
        }
        out
    }

    /// Write [`Self::to_text`] to `path`
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    /// All channels and their entries as JSON
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
