// authorwatch/src/config.rs
//
// Tunable heuristics. Every threshold and penalty the detectors use lives
// here with its production default, so a deployment can retune them from a
// JSON file without touching the algorithms.
//
// Example (all keys optional):
//   {
//     "similarityThreshold": 0.8,
//     "rerun": "append",
//     "scoring": { "highPasteRatio": 0.5, "penalties": { "low_edit_ratio": 0.3 } }
//   }

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::Signal;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("penalty for {signal} must be non-negative, got {value}")]
    NegativePenalty { signal: Signal, value: f64 },
    #[error("{field} must be non-negative, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("penalty for {signal} is below the 0.0001 score resolution, got {value}")]
    PenaltyTooSmall { signal: Signal, value: f64 },
    #[error("{lower} ({lower_value}) must not exceed {upper} ({upper_value})")]
    Inverted { lower: &'static str, lower_value: f64, upper: &'static str, upper_value: f64 },
    #[error("worker count must be at least 1")]
    ZeroWorkers,
}

// ── Rerun policy ──────────────────────────────────────────────────────────────

/// What a detection run does with earlier results for the same activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RerunPolicy {
    /// Delete every detection and cluster of the activity, then store the new run.
    #[default]
    ReplaceAll,
    /// Keep earlier runs and store the new one next to them.
    Append,
}

// ── Behavior scoring ──────────────────────────────────────────────────────────

/// Authorship scores are reported to four decimals; a non-zero penalty
/// smaller than this would vanish in the rounding.
pub const PENALTY_RESOLUTION: f64 = 1e-4;

/// Penalty per signal, in rule order.
pub const DEFAULT_PENALTIES: &[(Signal, f64)] = &[
    (Signal::HighPasteRatio,          0.30),
    (Signal::ModeratePasteRatio,      0.15),
    (Signal::LowEditRatio,            0.25),
    (Signal::HighlyLinearEditing,     0.20),
    (Signal::MultiplePasteEvents,     0.15),
    (Signal::FastCompletionNoTesting, 0.20),
    (Signal::FrequentFocusLoss,       0.10),
    (Signal::LowTypingVariance,       0.15),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringConfig {
    pub high_paste_ratio:     f64,   // pasteCharRatio above → high_paste_ratio
    pub moderate_paste_ratio: f64,   // pasteCharRatio above → moderate_paste_ratio
    pub low_delete_ratio:     f64,   // deleteRatio below
    pub linear_editing:       f64,   // linearEditingScore above
    pub max_paste_events:     i64,   // pasteEvents above
    pub fast_completion_secs: f64,   // totalTime below, with zero executions
    pub max_focus_loss:       i64,   // focusLossCount above
    pub low_burstiness:       f64,   // burstiness below
    pub penalties:            HashMap<Signal, f64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            high_paste_ratio:     0.6,
            moderate_paste_ratio: 0.3,
            low_delete_ratio:     0.02,
            linear_editing:       0.9,
            max_paste_events:     3,
            fast_completion_secs: 120.0,
            max_focus_loss:       5,
            low_burstiness:       0.3,
            penalties:            DEFAULT_PENALTIES.iter().copied().collect(),
        }
    }
}

impl ScoringConfig {
    /// Configured penalty, falling back to the default when a partial map was supplied.
    pub fn penalty(&self, signal: Signal) -> f64 {
        self.penalties.get(&signal).copied().unwrap_or_else(|| {
            DEFAULT_PENALTIES.iter()
                .find(|(s, _)| *s == signal)
                .map(|(_, p)| *p)
                .unwrap_or(0.0)
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("highPasteRatio",     self.high_paste_ratio),
            ("moderatePasteRatio", self.moderate_paste_ratio),
            ("lowDeleteRatio",     self.low_delete_ratio),
            ("linearEditing",      self.linear_editing),
            ("lowBurstiness",      self.low_burstiness),
        ] {
            unit_range(field, value)?;
        }
        if self.fast_completion_secs < 0.0 {
            return Err(ConfigError::Negative { field: "fastCompletionSecs", value: self.fast_completion_secs });
        }
        for (&signal, &value) in &self.penalties {
            if !(value >= 0.0) {
                return Err(ConfigError::NegativePenalty { signal, value });
            }
            if value > 0.0 && value < PENALTY_RESOLUTION {
                return Err(ConfigError::PenaltyTooSmall { signal, value });
            }
        }
        ordered("moderatePasteRatio", self.moderate_paste_ratio, "highPasteRatio", self.high_paste_ratio)
    }
}

// ── Detection ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    /// A pair is suspicious when its score is strictly above this.
    pub similarity_threshold:      f64,
    /// Cluster average strictly above this → high suspicion.
    pub high_cluster_similarity:   f64,
    /// Cluster average strictly above this → medium suspicion.
    pub medium_cluster_similarity: f64,
    pub rerun:                     RerunPolicy,
    /// Comparison threads; `None` uses one per CPU.
    pub workers:                   Option<usize>,
    pub scoring:                   ScoringConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold:      0.75,
            high_cluster_similarity:   0.9,
            medium_cluster_similarity: 0.8,
            rerun:                     RerunPolicy::default(),
            workers:                   None,
            scoring:                   ScoringConfig::default(),
        }
    }
}

impl DetectionConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        unit_range("similarityThreshold",     self.similarity_threshold)?;
        unit_range("highClusterSimilarity",   self.high_cluster_similarity)?;
        unit_range("mediumClusterSimilarity", self.medium_cluster_similarity)?;
        ordered("mediumClusterSimilarity", self.medium_cluster_similarity,
                "highClusterSimilarity",   self.high_cluster_similarity)?;
        if self.workers == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        self.scoring.validate()
    }
}

fn unit_range(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) { Ok(()) } else { Err(ConfigError::OutOfRange { field, value }) }
}

/// The lower tier's threshold must not sit above the higher tier's.
fn ordered(lower: &'static str, lower_value: f64, upper: &'static str, upper_value: f64) -> Result<(), ConfigError> {
    if lower_value <= upper_value {
        Ok(())
    } else {
        Err(ConfigError::Inverted { lower, lower_value, upper, upper_value })
    }
}
