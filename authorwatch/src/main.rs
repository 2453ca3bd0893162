// authorwatch/src/main.rs
//
// Authorwatch: authorship signals for programming-course submissions
//
// Three operational modes:
//   score   score telemetry feature sets, one JSON result per line on stdout
//   detect  similarity + collusion clusters over a file of submissions
//   ingest  replay telemetry uploads, then run detection per activity
//
// Usage:
//   authorwatch --mode score  --path features.jsonl
//   authorwatch --mode detect --path submissions.jsonl --activity 12 --output out/
//   authorwatch --mode ingest --path telemetry.jsonl --output out/ --deadline-secs 60

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use authorwatch::config::{DetectionConfig, RerunPolicy};
use authorwatch::engine::orchestrator::DetectionOrchestrator;
use authorwatch::engine::scorer::BehaviorScorer;
use authorwatch::engine::telemetry::TelemetryProcessor;
use authorwatch::events::{ClusterView, DetectionRun, FeatureSet, Submission, SuspicionLevel, TelemetryEvent};
use authorwatch::state::jsonl::JsonlStore;
use authorwatch::state::store::SubmissionStore;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "authorwatch",
    about   = "Authorship signals and collusion clusters for student code submissions",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "detect")]
    mode: Mode,

    #[arg(long, help = "JSONL input: features (score), submissions (detect) or telemetry (ingest)")]
    path: PathBuf,

    #[arg(long, default_value = "/tmp/authorwatch_output",
          help = "Directory for the JSONL result files")]
    output: PathBuf,

    #[arg(long, help = "Only run this activity (detect mode); also fills in a missing activityId")]
    activity: Option<u64>,

    #[arg(long, help = "JSON detection config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override similarityThreshold")]
    threshold: Option<f64>,

    #[arg(long, help = "Dedicated comparison threads (default: one per CPU)")]
    workers: Option<usize>,

    #[arg(long, value_enum, help = "What a rerun does with earlier results")]
    rerun: Option<RerunPolicy>,

    #[arg(long, help = "Give up on an activity whose comparisons take longer than this")]
    deadline_secs: Option<u64>,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Score,   // behavior scoring only, nothing stored
    Detect,  // similarity detection over final submissions
    Ingest,  // telemetry → submissions → detection
}

impl Cli {
    fn detection_config(&self) -> Result<DetectionConfig> {
        let mut config = match &self.config {
            Some(path) => DetectionConfig::from_json_file(path)?,
            None       => DetectionConfig::default(),
        };
        if let Some(t) = self.threshold { config.similarity_threshold = t; }
        if let Some(n) = self.workers   { config.workers = Some(n); }
        if let Some(r) = self.rerun     { config.rerun = r; }
        config.validate()?;
        Ok(config)
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

// ── Input ─────────────────────────────────────────────────────────────────────

/// Score mode accepts whole telemetry events or bare feature maps.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScoreInput {
    Event(TelemetryEvent),
    Features(FeatureSet),
}

impl ScoreInput {
    fn features(&self) -> &FeatureSet {
        match self {
            Self::Event(e)    => &e.features,
            Self::Features(f) => f,
        }
    }
}

async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = tokio::fs::read_to_string(path).await
        .with_context(|| format!("reading {}", path.display()))?;

    let mut records = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() { continue; }
        match serde_json::from_str::<T>(line) {
            Ok(r)  => records.push(r),
            Err(e) => warn!("{}:{}: parse error: {}", path.display(), n + 1, e),
        }
    }
    Ok(records)
}

// ── Modes ─────────────────────────────────────────────────────────────────────

async fn run_score(cli: &Cli) -> Result<()> {
    let config = cli.detection_config()?;
    let scorer = BehaviorScorer::new(config.scoring);
    for input in read_jsonl::<ScoreInput>(&cli.path).await? {
        println!("{}", serde_json::to_string(&scorer.score(input.features()))?);
    }
    Ok(())
}

async fn run_detect(cli: &Cli) -> Result<()> {
    let store = Arc::new(JsonlStore::new(&cli.output)?);

    for mut s in read_jsonl::<Submission>(&cli.path).await? {
        if s.activity_id == 0 {
            if let Some(a) = cli.activity { s.activity_id = a; }
        }
        if let Err(e) = store.create_submission(&mut s) {
            warn!("Skipping submission {} of student {}: {}", s.id, s.student_id, e);
        }
    }

    let activities = match cli.activity {
        Some(a) => vec![a],
        None    => store.memory().activities(),
    };
    detect_activities(cli, store, &activities).await
}

async fn run_ingest(cli: &Cli) -> Result<()> {
    let config    = cli.detection_config()?;
    let store     = Arc::new(JsonlStore::new(&cli.output)?);
    let processor = TelemetryProcessor::new(BehaviorScorer::new(config.scoring), Arc::clone(&store));

    let events = read_jsonl::<TelemetryEvent>(&cli.path).await?;
    let mut n_final = 0;
    for event in &events {
        match processor.process(event) {
            Ok(a) => {
                if event.is_final {
                    n_final += 1;
                    print_analysis(event, a.authorship_score, &a.confidence.to_string(), a.signals.len());
                }
            }
            Err(e) => {
                warn!("{}", e);
                print_analysis(event, e.analysis.authorship_score, &e.analysis.confidence.to_string(),
                               e.analysis.signals.len());
            }
        }
    }
    info!("Ingested {} events, {} final", events.len(), n_final);

    let activities = store.memory().activities();
    detect_activities(cli, store, &activities).await
}

async fn detect_activities(cli: &Cli, store: Arc<JsonlStore>, activities: &[u64]) -> Result<()> {
    let orchestrator = DetectionOrchestrator::new(cli.detection_config()?, Arc::clone(&store))?;

    for &activity_id in activities {
        let start       = Instant::now();
        let submissions = orchestrator.submissions_for_activity(activity_id)?;
        let n           = submissions.len();

        let run = match cli.deadline() {
            Some(deadline) => orchestrator.detect_within(activity_id, submissions, deadline).await?,
            None           => Some(orchestrator.detect_submissions(activity_id, submissions).await?),
        };
        let run = match run {
            Some(run) => run,
            None      => {
                println!("\n\x1b[90mActivity {}: deadline hit, no clusters computed\x1b[0m", activity_id);
                DetectionRun::empty(activity_id)
            }
        };

        print_run(&run, n, start.elapsed());
        for view in orchestrator.clusters_for_activity(activity_id)? {
            print_cluster(&view);
        }
    }

    store.flush().await?;
    println!("\n  Output: \x1b[90m{}\x1b[0m", store.dir().display());
    Ok(())
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_banner(mode: &str, cli: &Cli) {
    println!("\n\x1b[1m  authorwatch\x1b[0m  \x1b[90m{}\x1b[0m", env!("CARGO_PKG_VERSION"));
    println!("  \x1b[90mAuthorship signals for student code | advisory only\x1b[0m");
    println!("  Mode: \x1b[96m{}\x1b[0m  |  {}\n", mode, cli.path.display());
}

fn print_analysis(event: &TelemetryEvent, score: f64, confidence: &str, n_signals: usize) {
    let color = if score < 0.5 { "\x1b[93m" } else { "\x1b[92m" };
    println!("  student {:>6}  activity {:>4}  authorship {}{:.4}\x1b[0m  confidence {:<6}  signals {}",
             event.student_id, event.activity_id, color, score, confidence, n_signals);
}

fn print_run(run: &DetectionRun, n_submissions: usize, elapsed: Duration) {
    println!(
        "\n\x1b[1m── activity {}  submissions={}  pairs={}  suspicious={}  clusters={}  failed={}  {:.2}s ──\x1b[0m",
        run.activity_id, n_submissions, run.detections.len(), run.n_suspicious(),
        run.clusters.len(), run.failed_pairs, elapsed.as_secs_f64()
    );
}

fn print_cluster(view: &ClusterView) {
    let c = &view.cluster;
    let color = match c.suspicion_level {
        SuspicionLevel::High   => "\x1b[91;1m",
        SuspicionLevel::Medium => "\x1b[93;1m",
        SuspicionLevel::Low    => "\x1b[96m",
    };
    let reset    = "\x1b[0m";
    let students = view.submissions.iter()
        .map(|s| s.student_id.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    println!("\n{}{} cluster {}{}", color, c.suspicion_level, c.id, reset);
    println!("  Size    : {}", c.size);
    println!("  Average : {}{:.4}{}", color, c.avg_similarity, reset);
    println!("  Members : {:?}", c.submission_ids);
    println!("  Students: {}", students);
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("authorwatch=info".parse()?))
        .with_writer(std::io::stderr)
        .compact().init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Score  => run_score(&cli).await,
        Mode::Detect => {
            print_banner("DETECT", &cli);
            run_detect(&cli).await
        }
        Mode::Ingest => {
            print_banner("INGEST", &cli);
            run_ingest(&cli).await
        }
    }
}
