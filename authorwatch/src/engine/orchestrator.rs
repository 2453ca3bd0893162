// authorwatch/src/engine/orchestrator.rs
//
// One detection run over one activity:
//
//   submissions ──► compare_all_until (rayon, off the async runtime)
//               ──► rerun policy (replace-all clears the activity first)
//               ──► persist each detection, skipping failures
//               ──► cluster barrier over the persisted set
//
// A detection that fails to persist is logged and left out of clustering;
// the run carries on and reports how many pairs were lost.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DetectionConfig, RerunPolicy};
use crate::engine::cluster::ClusterBuilder;
use crate::engine::similarity::SimilarityEngine;
use crate::events::{ClusterView, DetectionRun, SimilarityCluster, SimilarityDetection, Submission};
use crate::state::store::{SimilarityStore, SubmissionStore};

pub struct DetectionOrchestrator<S> {
    config:   DetectionConfig,
    engine:   Arc<SimilarityEngine>,
    clusters: ClusterBuilder,
    store:    Arc<S>,
}

impl<S> DetectionOrchestrator<S>
where
    S: SimilarityStore + SubmissionStore,
{
    pub fn new(config: DetectionConfig, store: Arc<S>) -> Result<Self> {
        config.validate()?;
        let engine = match config.workers {
            Some(n) => SimilarityEngine::with_workers(config.similarity_threshold, n)
                .context("building comparison pool")?,
            None    => SimilarityEngine::new(config.similarity_threshold),
        };
        let clusters = ClusterBuilder::new(config.high_cluster_similarity, config.medium_cluster_similarity);
        Ok(Self { config, engine: Arc::new(engine), clusters, store })
    }

    pub fn config(&self) -> &DetectionConfig { &self.config }

    pub fn store(&self) -> &Arc<S> { &self.store }

    /// Run detection over every stored submission of the activity.
    pub async fn detect(&self, activity_id: u64) -> Result<DetectionRun> {
        let submissions = self.store.find_submissions_by_activity(activity_id)?;
        self.detect_submissions(activity_id, submissions).await
    }

    pub async fn detect_submissions(&self, activity_id: u64, submissions: Vec<Submission>) -> Result<DetectionRun> {
        let cancel = Arc::new(AtomicBool::new(false));
        let detections = self.spawn_compare(activity_id, submissions, cancel).await
            .context("comparison task failed")?
            .ok_or_else(|| anyhow!("comparisons for activity {activity_id} were cancelled"))?;
        self.finish(activity_id, detections)
    }

    /// Like [`detect_submissions`](Self::detect_submissions) but gives up when the
    /// comparisons outlast `deadline`. The comparison workers are stopped before
    /// this returns, nothing is stored or cleared, and `Ok(None)` means
    /// "no clusters computed".
    pub async fn detect_within(
        &self,
        activity_id: u64,
        submissions: Vec<Submission>,
        deadline:    Duration,
    ) -> Result<Option<DetectionRun>> {
        let cancel     = Arc::new(AtomicBool::new(false));
        let mut handle = self.spawn_compare(activity_id, submissions, Arc::clone(&cancel));

        let outcome    = tokio::time::timeout(deadline, &mut handle).await;
        let detections = match outcome {
            Ok(joined) => joined.context("comparison task failed")?,
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                // workers notice the flag before their next pair
                let _ = handle.await;
                warn!("Activity {}: comparisons exceeded {:?}, no clusters computed", activity_id, deadline);
                return Ok(None);
            }
        };

        match detections {
            Some(detections) => Ok(Some(self.finish(activity_id, detections)?)),
            None             => Ok(None),
        }
    }

    fn spawn_compare(
        &self,
        activity_id: u64,
        submissions: Vec<Submission>,
        cancel:      Arc<AtomicBool>,
    ) -> JoinHandle<Option<Vec<SimilarityDetection>>> {
        let submissions = scope(activity_id, submissions);
        debug!("Activity {}: comparing {} submissions", activity_id, submissions.len());

        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.compare_all_until(activity_id, &submissions, &cancel))
    }

    fn finish(&self, activity_id: u64, detections: Vec<SimilarityDetection>) -> Result<DetectionRun> {
        if self.config.rerun == RerunPolicy::ReplaceAll {
            self.store.clear_activity(activity_id)
                .with_context(|| format!("clearing previous results for activity {activity_id}"))?;
        }

        let total = detections.len();
        let mut stored = Vec::with_capacity(total);
        for mut d in detections {
            match self.store.create_detection(&mut d) {
                Ok(())  => stored.push(d),
                Err(e)  => warn!("Activity {}: dropping pair {:?}: {}", activity_id, d.pair(), e),
            }
        }
        let failed_pairs = total - stored.len();

        let clusters = self.clusters.build_clusters(activity_id, &mut stored, self.store.as_ref());

        let run = DetectionRun { activity_id, detections: stored, clusters, failed_pairs };
        info!("Activity {}: {} pairs, {} suspicious, {} clusters, {} failed",
              activity_id, run.detections.len(), run.n_suspicious(), run.clusters.len(), failed_pairs);
        Ok(run)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn similarities_for_activity(&self, activity_id: u64) -> Result<Vec<SimilarityDetection>> {
        Ok(self.store.find_by_activity(activity_id)?)
    }

    pub fn suspicious_for_activity(&self, activity_id: u64) -> Result<Vec<SimilarityDetection>> {
        Ok(self.store.find_suspicious_by_activity(activity_id)?)
    }

    pub fn submissions_for_activity(&self, activity_id: u64) -> Result<Vec<Submission>> {
        Ok(self.store.find_submissions_by_activity(activity_id)?)
    }

    /// Clusters with their member submissions. Members that cannot be
    /// resolved are left out; the cluster statistics are reported as stored.
    /// Each member carries its best pair score inside the cluster.
    pub fn clusters_for_activity(&self, activity_id: u64) -> Result<Vec<ClusterView>> {
        let clusters = self.store.find_clusters_by_activity(activity_id)?;
        Ok(clusters.into_iter().map(|c| self.resolve(c)).collect())
    }

    fn resolve(&self, cluster: SimilarityCluster) -> ClusterView {
        let mut best: HashMap<u64, f64> = cluster.submission_ids.iter().map(|&id| (id, 0.0)).collect();
        for d in self.store.find_by_cluster(cluster.id).unwrap_or_default() {
            for id in [d.submission_id_a, d.submission_id_b] {
                let e = best.entry(id).or_insert(0.0);
                *e = e.max(d.score);
            }
        }

        let mut ids: Vec<u64> = best.keys().copied().collect();
        ids.sort_unstable();

        let submissions = ids.into_iter()
            .filter_map(|id| self.store.find_submission(id).ok().flatten())
            .map(|mut s| {
                s.similarity_score = best.get(&s.id).copied();
                s
            })
            .collect();
        ClusterView { cluster, submissions }
    }
}

/// Keep only this activity's submissions, first occurrence of each id.
fn scope(activity_id: u64, submissions: Vec<Submission>) -> Vec<Submission> {
    let mut seen = HashSet::new();
    submissions.into_iter()
        .filter(|s| {
            if s.activity_id != activity_id {
                warn!("Skipping submission {} of activity {} in run for activity {}",
                      s.id, s.activity_id, activity_id);
                return false;
            }
            if !seen.insert(s.id) {
                warn!("Skipping duplicate submission id {} in activity {}", s.id, activity_id);
                return false;
            }
            true
        })
        .collect()
}
