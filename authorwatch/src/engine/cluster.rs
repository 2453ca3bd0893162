// authorwatch/src/engine/cluster.rs
//
// Collusion clusters: connected components over suspicious pairs.
//
// Nodes are submission ids that appear in at least one suspicious detection,
// edges are the suspicious pairs. Components are walked breadth-first from
// the smallest unvisited id, so cluster numbering depends only on membership.
//
// Per component:
//   avg_similarity = mean score of every detection with BOTH endpoints inside
//   level          = high > 0.9, medium > 0.8, else low
// The cluster is stored first; every detection inside it is then re-stamped
// with the new cluster id.

use std::collections::HashSet;

use petgraph::graphmap::UnGraphMap;
use petgraph::visit::Bfs;
use tracing::{debug, error, warn};

use crate::events::{SimilarityCluster, SimilarityDetection, SuspicionLevel};
use crate::state::store::SimilarityStore;

pub struct ClusterBuilder {
    high:   f64,
    medium: f64,
}

impl ClusterBuilder {
    pub fn new(high: f64, medium: f64) -> Self { Self { high, medium } }

    pub fn level(&self, avg_similarity: f64) -> SuspicionLevel {
        if avg_similarity > self.high {
            SuspicionLevel::High
        } else if avg_similarity > self.medium {
            SuspicionLevel::Medium
        } else {
            SuspicionLevel::Low
        }
    }

    /// Connected components of the suspicious-edge graph, each sorted, ordered
    /// by smallest member. Single-node components are dropped as invalid.
    pub fn components(detections: &[SimilarityDetection]) -> Vec<Vec<u64>> {
        let mut graph: UnGraphMap<u64, ()> = UnGraphMap::new();
        for d in detections.iter().filter(|d| d.is_suspicious) {
            graph.add_edge(d.submission_id_a, d.submission_id_b, ());
        }

        let mut nodes: Vec<u64> = graph.nodes().collect();
        nodes.sort_unstable();

        let mut visited: HashSet<u64> = HashSet::new();
        let mut components = Vec::new();

        for start in nodes {
            if visited.contains(&start) { continue; }

            let mut members = Vec::new();
            let mut bfs = Bfs::new(&graph, start);
            while let Some(node) = bfs.next(&graph) {
                visited.insert(node);
                members.push(node);
            }

            if members.len() < 2 {
                // A suspicious edge always has two distinct ends; this only
                // happens when a submission was compared with itself.
                error!("Dropping single-node component {:?}: suspicious self-pair", members);
                continue;
            }
            members.sort_unstable();
            components.push(members);
        }

        components
    }

    /// Build, store and stamp clusters for one activity's detections.
    /// A cluster that fails to store is skipped and its detections stay unstamped.
    pub fn build_clusters<S: SimilarityStore + ?Sized>(
        &self,
        activity_id: u64,
        detections:  &mut [SimilarityDetection],
        store:       &S,
    ) -> Vec<SimilarityCluster> {
        let mut clusters = Vec::new();

        for members in Self::components(detections) {
            let member_set: HashSet<u64> = members.iter().copied().collect();

            let inside: Vec<usize> = detections.iter().enumerate()
                .filter(|(_, d)| d.within(&member_set))
                .map(|(i, _)| i)
                .collect();
            if inside.is_empty() {
                error!("Component {:?} has no detections inside it", members);
                continue;
            }

            let avg = inside.iter().map(|&i| detections[i].score).sum::<f64>() / inside.len() as f64;

            let mut cluster = SimilarityCluster {
                id:              0,
                activity_id,
                size:            members.len(),
                avg_similarity:  avg,
                suspicion_level: self.level(avg),
                submission_ids:  members,
                created_at:      chrono::Utc::now(),
            };

            if let Err(e) = store.create_cluster(&mut cluster) {
                warn!("Failed to store cluster {:?} for activity {}: {}", cluster.submission_ids, activity_id, e);
                continue;
            }

            for &i in &inside {
                detections[i].cluster_id = Some(cluster.id);
                if let Err(e) = store.update_detection(&detections[i]) {
                    warn!("Failed to stamp detection {} with cluster {}: {}", detections[i].id, cluster.id, e);
                }
            }

            debug!("Cluster {} size={} avg={:.4} level={}",
                   cluster.id, cluster.size, cluster.avg_similarity, cluster.suspicion_level);
            clusters.push(cluster);
        }

        clusters
    }
}

impl Default for ClusterBuilder { fn default() -> Self { Self::new(0.9, 0.8) } }
