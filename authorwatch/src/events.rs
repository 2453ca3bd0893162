// authorwatch/src/events.rs
//
// Shared domain types flowing through authorwatch.
// Every record serializes with camelCase field names so the web layer can
// hand them straight to its JSON responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

// ── Feature keys ──────────────────────────────────────────────────────────────

/// Feature names produced by the editor-side telemetry collector.
pub mod feature {
    pub const AVG_KEYSTROKE_INTERVAL: &str = "avgKeystrokeInterval";
    pub const STD_KEYSTROKE_INTERVAL: &str = "stdKeystrokeInterval";
    pub const PASTE_CHAR_RATIO:       &str = "pasteCharRatio";
    pub const DELETE_RATIO:           &str = "deleteRatio";
    pub const LINEAR_EDITING_SCORE:   &str = "linearEditingScore";
    pub const PASTE_EVENTS:           &str = "pasteEvents";
    pub const EXECUTION_COUNT:        &str = "executionCount";
    pub const TOTAL_TIME:             &str = "totalTime";
    pub const FOCUS_LOSS_COUNT:       &str = "focusLossCount";
    pub const BURSTINESS:             &str = "burstiness";
    pub const TIME_TO_FIRST_RUN:      &str = "timeToFirstRun";
    pub const TOTAL_KEYSTROKES:       &str = "totalKeystrokes";
}

// ── Feature set ───────────────────────────────────────────────────────────────

/// Named numeric features for one editing session.
///
/// Values are kept as raw JSON so that a collector sending a string or a
/// null never makes scoring fail: anything that is not a number reads as 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(HashMap<String, Value>);

impl FeatureSet {
    pub fn new() -> Self { Self::default() }

    /// Float feature; missing or non-numeric keys read as 0.
    pub fn get(&self, key: &str) -> f64 {
        self.0.get(key).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Count feature, truncated toward zero (3.9 paste events is 3).
    pub fn count(&self, key: &str) -> i64 {
        self.get(key).trunc() as i64
    }

    /// Non-finite values are stored as null and therefore read back as 0.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        let v = serde_json::Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null);
        self.0.insert(key.into(), v);
    }

    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.insert(key, value);
        self
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl<K: Into<String>> FromIterator<(K, f64)> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (k, v) in iter { set.insert(k, v); }
        set
    }
}

// ── Behavior analysis ─────────────────────────────────────────────────────────

/// One heuristic rule that fired during behavior scoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    HighPasteRatio,
    ModeratePasteRatio,
    LowEditRatio,
    HighlyLinearEditing,
    MultiplePasteEvents,
    FastCompletionNoTesting,
    FrequentFocusLoss,
    LowTypingVariance,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighPasteRatio          => write!(f, "high_paste_ratio"),
            Self::ModeratePasteRatio      => write!(f, "moderate_paste_ratio"),
            Self::LowEditRatio            => write!(f, "low_edit_ratio"),
            Self::HighlyLinearEditing     => write!(f, "highly_linear_editing"),
            Self::MultiplePasteEvents     => write!(f, "multiple_paste_events"),
            Self::FastCompletionNoTesting => write!(f, "fast_completion_no_testing"),
            Self::FrequentFocusLoss       => write!(f, "frequent_focus_loss"),
            Self::LowTypingVariance       => write!(f, "low_typing_variance"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_signal_count(n: usize) -> Self {
        match n {
            0..=1 => Self::Low,
            2..=3 => Self::Medium,
            _     => Self::High,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low    => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High   => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub authorship_score: f64,
    pub confidence:       Confidence,
    pub signals:          Vec<Signal>,
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

/// One telemetry upload from the editor. `is_final` marks the end of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub activity_id: u64,
    pub student_id:  u64,
    #[serde(default)]
    pub timestamp:   i64,
    #[serde(default)]
    pub is_final:    bool,
    #[serde(default)]
    pub code:        String,
    #[serde(default)]
    pub features:    FeatureSet,
    #[serde(default)]
    pub raw_events:  Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub id:          u64,
    pub activity_id: u64,
    pub student_id:  u64,
    pub timestamp:   i64,
    pub is_final:    bool,
    pub features:    FeatureSet,
    pub raw_events:  Value,
    pub created_at:  DateTime<Utc>,
}

impl TelemetryRecord {
    pub fn from_event(event: &TelemetryEvent) -> Self {
        Self {
            id:          0,
            activity_id: event.activity_id,
            student_id:  event.student_id,
            timestamp:   event.timestamp,
            is_final:    event.is_final,
            features:    event.features.clone(),
            raw_events:  event.raw_events.clone(),
            created_at:  Utc::now(),
        }
    }
}

// ── Submissions ───────────────────────────────────────────────────────────────

/// Scalar behavior metrics copied off the final feature set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorMetrics {
    pub avg_keystroke_interval: f64,
    pub std_keystroke_interval: f64,
    pub paste_events:           i64,
    pub paste_char_ratio:       f64,
    pub delete_ratio:           f64,
    pub focus_loss_count:       i64,
    pub linear_editing_score:   f64,
    pub burstiness:             f64,
    pub time_to_first_run:      f64,
    pub execution_count:        i64,
    pub total_time:             f64,
    pub keystroke_count:        i64,
}

impl BehaviorMetrics {
    pub fn from_features(f: &FeatureSet) -> Self {
        Self {
            avg_keystroke_interval: f.get(feature::AVG_KEYSTROKE_INTERVAL),
            std_keystroke_interval: f.get(feature::STD_KEYSTROKE_INTERVAL),
            paste_events:           f.count(feature::PASTE_EVENTS),
            paste_char_ratio:       f.get(feature::PASTE_CHAR_RATIO),
            delete_ratio:           f.get(feature::DELETE_RATIO),
            focus_loss_count:       f.count(feature::FOCUS_LOSS_COUNT),
            linear_editing_score:   f.get(feature::LINEAR_EDITING_SCORE),
            burstiness:             f.get(feature::BURSTINESS),
            time_to_first_run:      f.get(feature::TIME_TO_FIRST_RUN),
            execution_count:        f.count(feature::EXECUTION_COUNT),
            total_time:             f.get(feature::TOTAL_TIME),
            keystroke_count:        f.count(feature::TOTAL_KEYSTROKES),
        }
    }
}

/// A student's final code for one activity.
///
/// `authorship_score` is the behavioral estimate only. `similarity_score` is
/// the highest pair score inside the submission's cluster, filled in when the
/// submission is read back as a cluster member. Neither overwrites the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default)]
    pub id:                  u64,
    #[serde(default)]
    pub activity_id:         u64,
    pub student_id:          u64,
    pub code:                String,
    #[serde(flatten)]
    pub metrics:             BehaviorMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorship_score:    Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence:          Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score:    Option<f64>,
    #[serde(default)]
    pub signals:             Vec<Signal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paste_event_details: Option<Value>,
    #[serde(default = "Utc::now")]
    pub created_at:          DateTime<Utc>,
}

impl Submission {
    /// Bare submission with no behavior data, as handed over by a storage layer.
    pub fn new(id: u64, activity_id: u64, student_id: u64, code: impl Into<String>) -> Self {
        Self {
            id,
            activity_id,
            student_id,
            code:                code.into(),
            metrics:             BehaviorMetrics::default(),
            authorship_score:    None,
            confidence:          None,
            similarity_score:    None,
            signals:             Vec::new(),
            paste_event_details: None,
            created_at:          Utc::now(),
        }
    }

    /// Build the submission record for a finalized session.
    pub fn finalize(event: &TelemetryEvent, analysis: &AnalysisResult) -> Self {
        Self {
            id:                  0,
            activity_id:         event.activity_id,
            student_id:          event.student_id,
            code:                event.code.clone(),
            metrics:             BehaviorMetrics::from_features(&event.features),
            authorship_score:    Some(analysis.authorship_score),
            confidence:          Some(analysis.confidence),
            similarity_score:    None,
            signals:             analysis.signals.clone(),
            paste_event_details: event.raw_events.get("pasteEvents").cloned(),
            created_at:          Utc::now(),
        }
    }
}

// ── Similarity ────────────────────────────────────────────────────────────────

/// One unordered pair comparison. Side A is always the earlier submission in
/// the input order of the run that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityDetection {
    #[serde(default)]
    pub id:              u64,
    pub activity_id:     u64,
    pub submission_id_a: u64,
    pub submission_id_b: u64,
    pub student_id_a:    u64,
    pub student_id_b:    u64,
    pub score:           f64,
    pub algorithm:       String,
    pub is_suspicious:   bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id:      Option<u64>,
    #[serde(default = "Utc::now")]
    pub created_at:      DateTime<Utc>,
}

impl SimilarityDetection {
    pub fn pair(&self) -> (u64, u64) { (self.submission_id_a, self.submission_id_b) }

    /// True when both endpoints are members of `members`.
    pub fn within(&self, members: &HashSet<u64>) -> bool {
        members.contains(&self.submission_id_a) && members.contains(&self.submission_id_b)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SuspicionLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for SuspicionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low    => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High   => write!(f, "HIGH"),
        }
    }
}

/// A connected component of suspicious pairs. `submission_ids` is sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityCluster {
    #[serde(default)]
    pub id:              u64,
    pub activity_id:     u64,
    pub size:            usize,
    pub avg_similarity:  f64,
    pub suspicion_level: SuspicionLevel,
    #[serde(default)]
    pub submission_ids:  Vec<u64>,
    #[serde(default = "Utc::now")]
    pub created_at:      DateTime<Utc>,
}

/// A cluster together with the submissions that could be resolved for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterView {
    #[serde(flatten)]
    pub cluster:     SimilarityCluster,
    pub submissions: Vec<Submission>,
}

/// Everything one detection run produced for an activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRun {
    pub activity_id:  u64,
    pub detections:   Vec<SimilarityDetection>,
    pub clusters:     Vec<SimilarityCluster>,
    pub failed_pairs: usize,
}

impl DetectionRun {
    pub fn empty(activity_id: u64) -> Self {
        Self { activity_id, ..Default::default() }
    }

    pub fn n_suspicious(&self) -> usize {
        self.detections.iter().filter(|d| d.is_suspicious).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_and_non_numeric_features_read_as_zero() {
        let f: FeatureSet = serde_json::from_value(json!({
            "pasteCharRatio": "lots",
            "deleteRatio": null,
            "burstiness": 0.4,
        })).unwrap();
        assert_eq!(f.get(feature::PASTE_CHAR_RATIO), 0.0);
        assert_eq!(f.get(feature::DELETE_RATIO), 0.0);
        assert_eq!(f.get(feature::TOTAL_TIME), 0.0);
        assert_eq!(f.get(feature::BURSTINESS), 0.4);
    }

    #[test]
    fn counts_truncate_toward_zero() {
        let f = FeatureSet::new().with(feature::PASTE_EVENTS, 3.9).with(feature::FOCUS_LOSS_COUNT, -0.5);
        assert_eq!(f.count(feature::PASTE_EVENTS), 3);
        assert_eq!(f.count(feature::FOCUS_LOSS_COUNT), 0);
        assert_eq!(f.count(feature::EXECUTION_COUNT), 0);
    }

    #[test]
    fn nan_feature_reads_as_zero() {
        let f = FeatureSet::new().with(feature::BURSTINESS, f64::NAN);
        assert_eq!(f.get(feature::BURSTINESS), 0.0);
    }

    #[test]
    fn confidence_tiers() {
        assert_eq!(Confidence::from_signal_count(0), Confidence::Low);
        assert_eq!(Confidence::from_signal_count(1), Confidence::Low);
        assert_eq!(Confidence::from_signal_count(2), Confidence::Medium);
        assert_eq!(Confidence::from_signal_count(3), Confidence::Medium);
        assert_eq!(Confidence::from_signal_count(4), Confidence::High);
        assert_eq!(Confidence::from_signal_count(8), Confidence::High);
    }

    #[test]
    fn signal_names_match_serialized_form() {
        let v = serde_json::to_value(Signal::FastCompletionNoTesting).unwrap();
        assert_eq!(v, json!("fast_completion_no_testing"));
        assert_eq!(Signal::FastCompletionNoTesting.to_string(), "fast_completion_no_testing");
    }

    #[test]
    fn detection_serializes_camel_case() {
        let d = SimilarityDetection {
            id: 1, activity_id: 7, submission_id_a: 10, submission_id_b: 11,
            student_id_a: 100, student_id_b: 101, score: 0.8,
            algorithm: "levenshtein_normalized".into(), is_suspicious: true,
            cluster_id: None, created_at: Utc::now(),
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["submissionIdA"], json!(10));
        assert_eq!(v["isSuspicious"], json!(true));
        assert!(v.get("clusterId").is_none());
    }

    #[test]
    fn minimal_submission_line_parses() {
        let s: Submission = serde_json::from_str(r#"{"id":3,"studentId":9,"code":"x = 1"}"#).unwrap();
        assert_eq!(s.id, 3);
        assert_eq!(s.activity_id, 0);
        assert_eq!(s.metrics, BehaviorMetrics::default());
        assert!(s.authorship_score.is_none());
    }

    #[test]
    fn finalize_copies_metrics_and_paste_details() {
        let event = TelemetryEvent {
            activity_id: 1,
            student_id:  2,
            timestamp:   0,
            is_final:    true,
            code:        "print(1)".into(),
            features:    FeatureSet::new()
                .with(feature::PASTE_EVENTS, 2.0)
                .with(feature::TOTAL_KEYSTROKES, 120.0)
                .with(feature::DELETE_RATIO, 0.1),
            raw_events:  json!({ "pasteEvents": [{ "length": 40 }] }),
        };
        let analysis = AnalysisResult { authorship_score: 0.9, confidence: Confidence::Low, signals: vec![] };
        let s = Submission::finalize(&event, &analysis);
        assert_eq!(s.metrics.paste_events, 2);
        assert_eq!(s.metrics.keystroke_count, 120);
        assert_eq!(s.metrics.delete_ratio, 0.1);
        assert_eq!(s.authorship_score, Some(0.9));
        assert_eq!(s.paste_event_details, Some(json!([{ "length": 40 }])));
    }
}
