// authorwatch/src/state/store.rs
//
// Storage seam between the detection core and whatever persists its records.
//
// The web application backs these traits with its relational database; this
// crate ships an in-memory implementation (MemoryStore) and a JSONL snapshot
// wrapper around it (JsonlStore, see jsonl.rs).
//
// DashMap = sharded concurrent HashMap, so the comparison workers and the
// orchestrator can share one store behind an Arc with no outer mutex.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::events::{SimilarityCluster, SimilarityDetection, Submission, TelemetryRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("detection {0} not found")]
    DetectionNotFound(u64),
    #[error("duplicate submission id {0}")]
    DuplicateSubmission(u64),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Detection and cluster records, queryable by activity.
pub trait SimilarityStore: Send + Sync {
    /// Assigns `detection.id`.
    fn create_detection(&self, detection: &mut SimilarityDetection) -> Result<(), StoreError>;
    fn update_detection(&self, detection: &SimilarityDetection) -> Result<(), StoreError>;
    /// Assigns `cluster.id`.
    fn create_cluster(&self, cluster: &mut SimilarityCluster) -> Result<(), StoreError>;
    /// Remove every detection and cluster of the activity.
    fn clear_activity(&self, activity_id: u64) -> Result<(), StoreError>;
    /// Highest score first.
    fn find_by_activity(&self, activity_id: u64) -> Result<Vec<SimilarityDetection>, StoreError>;
    /// Suspicious only, highest score first.
    fn find_suspicious_by_activity(&self, activity_id: u64) -> Result<Vec<SimilarityDetection>, StoreError>;
    /// Highest average similarity first.
    fn find_clusters_by_activity(&self, activity_id: u64) -> Result<Vec<SimilarityCluster>, StoreError>;
    fn find_by_cluster(&self, cluster_id: u64) -> Result<Vec<SimilarityDetection>, StoreError>;
}

/// Submissions and raw telemetry.
pub trait SubmissionStore: Send + Sync {
    /// Keeps a non-zero `submission.id`, assigns one otherwise.
    fn create_submission(&self, submission: &mut Submission) -> Result<(), StoreError>;
    fn find_submission(&self, id: u64) -> Result<Option<Submission>, StoreError>;
    /// Oldest id first.
    fn find_submissions_by_activity(&self, activity_id: u64) -> Result<Vec<Submission>, StoreError>;
    /// Assigns `record.id`.
    fn record_telemetry(&self, record: &mut TelemetryRecord) -> Result<(), StoreError>;
}

fn by_score_desc(list: &mut [SimilarityDetection]) {
    list.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
}

// ── In-memory store ───────────────────────────────────────────────────────────

pub struct MemoryStore {
    detections:  DashMap<u64, SimilarityDetection>,
    clusters:    DashMap<u64, SimilarityCluster>,
    submissions: DashMap<u64, Submission>,
    telemetry:   RwLock<Vec<TelemetryRecord>>,   // append-only log

    next_detection:  AtomicU64,
    next_cluster:    AtomicU64,
    next_submission: AtomicU64,
    next_telemetry:  AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            detections:      DashMap::new(),
            clusters:        DashMap::new(),
            submissions:     DashMap::new(),
            telemetry:       RwLock::new(Vec::new()),
            next_detection:  AtomicU64::new(1),
            next_cluster:    AtomicU64::new(1),
            next_submission: AtomicU64::new(1),
            next_telemetry:  AtomicU64::new(1),
        }
    }

    pub fn n_detections(&self) -> usize { self.detections.len() }
    pub fn n_clusters(&self) -> usize { self.clusters.len() }
    pub fn n_submissions(&self) -> usize { self.submissions.len() }

    pub fn telemetry(&self) -> Vec<TelemetryRecord> { self.telemetry.read().clone() }

    pub fn all_detections(&self) -> Vec<SimilarityDetection> {
        let mut all: Vec<_> = self.detections.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|d| d.id);
        all
    }

    pub fn all_clusters(&self) -> Vec<SimilarityCluster> {
        let mut all: Vec<_> = self.clusters.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|c| c.id);
        all
    }

    pub fn all_submissions(&self) -> Vec<Submission> {
        let mut all: Vec<_> = self.submissions.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    /// Distinct activity ids that have at least one submission, ascending.
    pub fn activities(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.submissions.iter().map(|e| e.value().activity_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

impl Default for MemoryStore { fn default() -> Self { Self::new() } }

impl SimilarityStore for MemoryStore {
    fn create_detection(&self, detection: &mut SimilarityDetection) -> Result<(), StoreError> {
        detection.id = self.next_detection.fetch_add(1, Ordering::Relaxed);
        self.detections.insert(detection.id, detection.clone());
        Ok(())
    }

    fn update_detection(&self, detection: &SimilarityDetection) -> Result<(), StoreError> {
        match self.detections.get_mut(&detection.id) {
            Some(mut entry) => { *entry = detection.clone(); Ok(()) }
            None            => Err(StoreError::DetectionNotFound(detection.id)),
        }
    }

    fn create_cluster(&self, cluster: &mut SimilarityCluster) -> Result<(), StoreError> {
        cluster.id = self.next_cluster.fetch_add(1, Ordering::Relaxed);
        self.clusters.insert(cluster.id, cluster.clone());
        Ok(())
    }

    fn clear_activity(&self, activity_id: u64) -> Result<(), StoreError> {
        self.detections.retain(|_, d| d.activity_id != activity_id);
        self.clusters.retain(|_, c| c.activity_id != activity_id);
        Ok(())
    }

    fn find_by_activity(&self, activity_id: u64) -> Result<Vec<SimilarityDetection>, StoreError> {
        let mut found: Vec<_> = self.detections.iter()
            .filter(|e| e.activity_id == activity_id)
            .map(|e| e.value().clone())
            .collect();
        by_score_desc(&mut found);
        Ok(found)
    }

    fn find_suspicious_by_activity(&self, activity_id: u64) -> Result<Vec<SimilarityDetection>, StoreError> {
        let mut found = self.find_by_activity(activity_id)?;
        found.retain(|d| d.is_suspicious);
        Ok(found)
    }

    fn find_clusters_by_activity(&self, activity_id: u64) -> Result<Vec<SimilarityCluster>, StoreError> {
        let mut found: Vec<_> = self.clusters.iter()
            .filter(|e| e.activity_id == activity_id)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| b.avg_similarity.total_cmp(&a.avg_similarity).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    fn find_by_cluster(&self, cluster_id: u64) -> Result<Vec<SimilarityDetection>, StoreError> {
        let mut found: Vec<_> = self.detections.iter()
            .filter(|e| e.cluster_id == Some(cluster_id))
            .map(|e| e.value().clone())
            .collect();
        by_score_desc(&mut found);
        Ok(found)
    }
}

impl SubmissionStore for MemoryStore {
    fn create_submission(&self, submission: &mut Submission) -> Result<(), StoreError> {
        if submission.id == 0 {
            submission.id = self.next_submission.fetch_add(1, Ordering::Relaxed);
        } else {
            if self.submissions.contains_key(&submission.id) {
                return Err(StoreError::DuplicateSubmission(submission.id));
            }
            // keep generated ids clear of imported ones
            self.next_submission.fetch_max(submission.id + 1, Ordering::Relaxed);
        }
        self.submissions.insert(submission.id, submission.clone());
        Ok(())
    }

    fn find_submission(&self, id: u64) -> Result<Option<Submission>, StoreError> {
        Ok(self.submissions.get(&id).map(|s| s.clone()))
    }

    fn find_submissions_by_activity(&self, activity_id: u64) -> Result<Vec<Submission>, StoreError> {
        let mut found: Vec<_> = self.submissions.iter()
            .filter(|e| e.activity_id == activity_id)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|s| s.id);
        Ok(found)
    }

    fn record_telemetry(&self, record: &mut TelemetryRecord) -> Result<(), StoreError> {
        record.id = self.next_telemetry.fetch_add(1, Ordering::Relaxed);
        self.telemetry.write().push(record.clone());
        Ok(())
    }
}
