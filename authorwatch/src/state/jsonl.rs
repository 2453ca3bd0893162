// authorwatch/src/state/jsonl.rs
//
// JSONL snapshot store: a MemoryStore whose contents are written out as
// one-record-per-line files on flush(). Used by the CLI; wire these files to
// the application database in deployments that do not link the crate.
//
//   similarity_detections.jsonl
//   similarity_clusters.jsonl
//   submissions.jsonl
//   telemetry.jsonl
//
// Each flush rewrites the files whole, so a replace-all rerun never leaves
// stale records behind.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::events::{SimilarityCluster, SimilarityDetection, Submission, TelemetryRecord};
use crate::state::store::{MemoryStore, SimilarityStore, StoreError, SubmissionStore};

pub const DETECTIONS_FILE:  &str = "similarity_detections.jsonl";
pub const CLUSTERS_FILE:    &str = "similarity_clusters.jsonl";
pub const SUBMISSIONS_FILE: &str = "submissions.jsonl";
pub const TELEMETRY_FILE:   &str = "telemetry.jsonl";

pub struct JsonlStore {
    inner: MemoryStore,
    out:   PathBuf,
}

impl JsonlStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out)?;
        Ok(Self { inner: MemoryStore::new(), out })
    }

    pub fn dir(&self) -> &Path { &self.out }

    pub fn memory(&self) -> &MemoryStore { &self.inner }

    /// Rewrite every snapshot file from the current in-memory state.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.write(DETECTIONS_FILE,  &self.inner.all_detections()).await?;
        self.write(CLUSTERS_FILE,    &self.inner.all_clusters()).await?;
        self.write(SUBMISSIONS_FILE, &self.inner.all_submissions()).await?;
        self.write(TELEMETRY_FILE,   &self.inner.telemetry()).await?;
        info!("Flushed {} detections, {} clusters, {} submissions to {}",
              self.inner.n_detections(), self.inner.n_clusters(),
              self.inner.n_submissions(), self.out.display());
        Ok(())
    }

    async fn write<T: Serialize>(&self, file: &str, records: &[T]) -> Result<(), StoreError> {
        let mut content = String::new();
        for r in records {
            content.push_str(&serde_json::to_string(r)?);
            content.push('\n');
        }
        let mut f = tokio::fs::File::create(self.out.join(file)).await?;
        f.write_all(content.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }
}

impl SimilarityStore for JsonlStore {
    fn create_detection(&self, detection: &mut SimilarityDetection) -> Result<(), StoreError> {
        self.inner.create_detection(detection)
    }
    fn update_detection(&self, detection: &SimilarityDetection) -> Result<(), StoreError> {
        self.inner.update_detection(detection)
    }
    fn create_cluster(&self, cluster: &mut SimilarityCluster) -> Result<(), StoreError> {
        self.inner.create_cluster(cluster)
    }
    fn clear_activity(&self, activity_id: u64) -> Result<(), StoreError> {
        self.inner.clear_activity(activity_id)
    }
    fn find_by_activity(&self, activity_id: u64) -> Result<Vec<SimilarityDetection>, StoreError> {
        self.inner.find_by_activity(activity_id)
    }
    fn find_suspicious_by_activity(&self, activity_id: u64) -> Result<Vec<SimilarityDetection>, StoreError> {
        self.inner.find_suspicious_by_activity(activity_id)
    }
    fn find_clusters_by_activity(&self, activity_id: u64) -> Result<Vec<SimilarityCluster>, StoreError> {
        self.inner.find_clusters_by_activity(activity_id)
    }
    fn find_by_cluster(&self, cluster_id: u64) -> Result<Vec<SimilarityDetection>, StoreError> {
        self.inner.find_by_cluster(cluster_id)
    }
}

impl SubmissionStore for JsonlStore {
    fn create_submission(&self, submission: &mut Submission) -> Result<(), StoreError> {
        self.inner.create_submission(submission)
    }
    fn find_submission(&self, id: u64) -> Result<Option<Submission>, StoreError> {
        self.inner.find_submission(id)
    }
    fn find_submissions_by_activity(&self, activity_id: u64) -> Result<Vec<Submission>, StoreError> {
        self.inner.find_submissions_by_activity(activity_id)
    }
    fn record_telemetry(&self, record: &mut TelemetryRecord) -> Result<(), StoreError> {
        self.inner.record_telemetry(record)
    }
}
