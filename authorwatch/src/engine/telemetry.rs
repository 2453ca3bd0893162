// authorwatch/src/engine/telemetry.rs
//
// Telemetry ingestion. Every upload is scored and recorded; the final upload
// of a session also becomes the student's Submission, carrying the score and
// the scalar metrics so later similarity runs can read them back.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::events::{AnalysisResult, Submission, TelemetryEvent, TelemetryRecord};
use crate::engine::scorer::BehaviorScorer;
use crate::state::store::{StoreError, SubmissionStore};

/// The raw telemetry could not be recorded. The event was still scored and
/// the analysis travels with the error.
#[derive(Debug, Error)]
#[error("telemetry from student {student_id} not recorded: {source}")]
pub struct IngestError {
    pub student_id: u64,
    pub analysis:   AnalysisResult,
    #[source]
    pub source:     StoreError,
}

pub struct TelemetryProcessor<S> {
    scorer: BehaviorScorer,
    store:  Arc<S>,
}

impl<S: SubmissionStore> TelemetryProcessor<S> {
    pub fn new(scorer: BehaviorScorer, store: Arc<S>) -> Self {
        Self { scorer, store }
    }

    pub fn store(&self) -> &Arc<S> { &self.store }

    /// Score and record one event. Failing to record the raw telemetry is an
    /// error that still carries the analysis, and no submission is created;
    /// failing to create the submission is only logged.
    pub fn process(&self, event: &TelemetryEvent) -> Result<AnalysisResult, IngestError> {
        let analysis = self.scorer.score(&event.features);

        let mut record = TelemetryRecord::from_event(event);
        if let Err(source) = self.store.record_telemetry(&mut record) {
            return Err(IngestError { student_id: event.student_id, analysis, source });
        }
        debug!("Telemetry {} activity={} student={} score={:.4}",
               record.id, event.activity_id, event.student_id, analysis.authorship_score);

        if event.is_final {
            let mut submission = Submission::finalize(event, &analysis);
            match self.store.create_submission(&mut submission) {
                Ok(())  => debug!("Submission {} for student {} in activity {}",
                                  submission.id, event.student_id, event.activity_id),
                Err(e)  => warn!("Failed to create submission for student {} in activity {}: {}",
                                 event.student_id, event.activity_id, e),
            }
        }

        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{feature, Confidence, FeatureSet, Signal};
    use crate::state::store::MemoryStore;
    use serde_json::json;

    fn event(student: u64, is_final: bool, features: FeatureSet) -> TelemetryEvent {
        TelemetryEvent {
            activity_id: 7,
            student_id:  student,
            timestamp:   1_700_000_000,
            is_final,
            code:        "print('hi')".into(),
            features,
            raw_events:  json!({ "pasteEvents": [{ "length": 300 }] }),
        }
    }

    fn heavy_paste() -> FeatureSet {
        FeatureSet::new()
            .with(feature::PASTE_CHAR_RATIO, 0.8)
            .with(feature::DELETE_RATIO, 0.01)
            .with(feature::PASTE_EVENTS, 5.0)
            .with(feature::EXECUTION_COUNT, 1.0)
            .with(feature::BURSTINESS, 0.5)
            .with(feature::TOTAL_KEYSTROKES, 42.0)
    }

    fn processor() -> TelemetryProcessor<MemoryStore> {
        TelemetryProcessor::new(BehaviorScorer::default(), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn intermediate_event_is_recorded_without_submission() {
        let p = processor();
        let a = p.process(&event(1, false, heavy_paste())).unwrap();
        assert_eq!(a.signals, vec![Signal::HighPasteRatio, Signal::LowEditRatio, Signal::MultiplePasteEvents]);
        assert_eq!(p.store().telemetry().len(), 1);
        assert_eq!(p.store().n_submissions(), 0);
    }

    #[test]
    fn final_event_creates_scored_submission() {
        let p = processor();
        let a = p.process(&event(1, true, heavy_paste())).unwrap();
        assert_eq!(a.authorship_score, 0.3);
        assert_eq!(a.confidence, Confidence::Medium);

        let subs = p.store().find_submissions_by_activity(7).unwrap();
        assert_eq!(subs.len(), 1);
        let s = &subs[0];
        assert_ne!(s.id, 0);
        assert_eq!(s.student_id, 1);
        assert_eq!(s.authorship_score, Some(0.3));
        assert_eq!(s.metrics.paste_events, 5);
        assert_eq!(s.metrics.keystroke_count, 42);
        assert_eq!(s.paste_event_details, Some(json!([{ "length": 300 }])));
    }

    /// Accepts submissions, refuses every telemetry record.
    struct NoTelemetry(MemoryStore);

    impl SubmissionStore for NoTelemetry {
        fn create_submission(&self, s: &mut Submission) -> Result<(), StoreError> { self.0.create_submission(s) }
        fn find_submission(&self, id: u64) -> Result<Option<Submission>, StoreError> { self.0.find_submission(id) }
        fn find_submissions_by_activity(&self, a: u64) -> Result<Vec<Submission>, StoreError> { self.0.find_submissions_by_activity(a) }
        fn record_telemetry(&self, _: &mut TelemetryRecord) -> Result<(), StoreError> {
            Err(StoreError::Rejected("telemetry table locked".into()))
        }
    }

    #[test]
    fn failed_recording_still_returns_the_analysis() {
        let p = TelemetryProcessor::new(BehaviorScorer::default(), Arc::new(NoTelemetry(MemoryStore::new())));
        let err = p.process(&event(3, true, heavy_paste())).unwrap_err();
        assert_eq!(err.student_id, 3);
        assert_eq!(err.analysis, BehaviorScorer::default().score(&heavy_paste()));
        assert_eq!(err.analysis.authorship_score, 0.3);
        assert!(matches!(err.source, StoreError::Rejected(_)));
        assert_eq!(p.store().0.n_submissions(), 0);
    }

    #[test]
    fn each_final_event_is_its_own_submission() {
        let p = processor();
        p.process(&event(1, true, FeatureSet::new())).unwrap();
        p.process(&event(2, true, FeatureSet::new())).unwrap();
        let ids: Vec<u64> = p.store().find_submissions_by_activity(7).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
