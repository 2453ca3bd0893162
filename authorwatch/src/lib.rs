// authorwatch/src/lib.rs
//
// Authorship signals for programming-course submissions.
//
//   events   telemetry, submissions, detections, clusters
//   config   thresholds and penalties, JSON file + CLI overrides
//   engine   behavior scorer, similarity engine, cluster builder,
//            detection orchestrator, telemetry processor
//   state    store traits, in-memory store, JSONL snapshot store
//
// All results are advisory: they flag work for an instructor to review.

pub mod config;
pub mod engine;
pub mod events;
pub mod state;
