pub mod cluster;
pub mod orchestrator;
pub mod scorer;
pub mod similarity;
pub mod telemetry;
