//! `scout`: run the script analysis or location grounding pipeline and follow
//! its event stream in the terminal.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, warn};

use scout_stream::prelude::*;
use scout_stream::{GroundingPhase, LocationCandidate, LocationRequirement};

#[derive(Debug, Parser)]
#[command(name = "scout", version, about = "Follow location-scout pipeline runs")]
struct Cli {
    /// Backend base URL (defaults to SCOUT_API_BASE_URL or http://localhost:8000).
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Cancel the run if it has not finished after this many seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze a screenplay and collect its location requirements.
    Analyze(AnalyzeArgs),
    /// Ground analyzed scenes to real-world venues.
    Ground(GroundArgs),
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    /// Path of the screenplay PDF as seen by the backend.
    file_path: String,
    #[arg(long)]
    project_id: Option<String>,
    #[arg(long)]
    target_city: Option<String>,
    /// Where to write the collected locations.
    #[arg(long, default_value = "locations_output.json")]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct GroundArgs {
    /// Scene ids to ground.
    #[arg(required = true)]
    scene_ids: Vec<String>,
    #[arg(long)]
    target_city: Option<String>,
    #[arg(long)]
    max_results: Option<u32>,
    /// Number of scenes grounded in parallel by the backend.
    #[arg(long)]
    workers: Option<u32>,
    /// Do not persist candidates on the backend.
    #[arg(long)]
    no_save: bool,
    /// Optionally write every discovered candidate as JSON.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    scout_stream::init_observability();
    let cli = Cli::parse();

    let mut config = PipelineClientConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config = config.base_url(base_url);
    }
    let client = PipelineClient::new(config)?;
    let timeout = cli.timeout_secs.map(Duration::from_secs);

    match cli.command {
        Command::Analyze(args) => run_analyze(&client, args, timeout).await,
        Command::Ground(args) => run_ground(&client, args, timeout).await,
    }
}

/// Wires the deadline and Ctrl-C to the session's cancel switch.
fn arm_cancellation<P: scout_stream::Pipeline>(session: &SessionHandle<P>, timeout: Option<Duration>) {
    if let Some(timeout) = timeout {
        session.cancel_after(timeout);
    }
    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling session");
            cancel.cancel();
        }
    });
}

async fn run_analyze(
    client: &PipelineClient,
    args: AnalyzeArgs,
    timeout: Option<Duration>,
) -> Result<()> {
    let mut request = AnalyzeScriptRequest::new(&args.file_path);
    if let Some(project_id) = args.project_id {
        request = request.project_id(project_id);
    }
    if let Some(target_city) = args.target_city {
        request = request.target_city(target_city);
    }

    let (sink, mut updates) = ChannelSink::new();
    let session = client.analyze_script(request, sink, SessionOptions::default())?;
    arm_cancellation(&session, timeout);
    println!("Analyzing {} (session {})", args.file_path, session.id());

    let mut locations: Vec<LocationRequirement> = Vec::new();
    let mut failure = None;
    while let Some(update) = updates.recv().await {
        match update {
            SessionUpdate::Event(AnalysisEvent::Status(status)) => {
                println!("[{:?}] {}", session.phase(), status.message);
            }
            SessionUpdate::Event(AnalysisEvent::Location(location)) => {
                println!(
                    "  + {} {} ({:?}, {}h)",
                    location.scene_id,
                    location.scene_header,
                    location.priority,
                    location.estimated_shoot_hours
                );
                locations.push(location);
            }
            SessionUpdate::Event(AnalysisEvent::Progress(progress)) => {
                println!("  {}/{} ({}%)", progress.processed, progress.total, progress.percent);
            }
            SessionUpdate::Event(AnalysisEvent::Complete(summary)) => {
                let total = summary.total_locations.unwrap_or(locations.len());
                println!("[complete] {total} locations");
            }
            SessionUpdate::Event(AnalysisEvent::Error(err)) => {
                eprintln!("[error] {}", err.message);
            }
            SessionUpdate::Event(AnalysisEvent::Unknown { name, .. }) => {
                debug!(event = %name, "ignoring unknown analysis event");
            }
            SessionUpdate::Error(err) => failure = Some(err),
            SessionUpdate::Complete => {}
        }
    }

    match session.join().await? {
        SessionState::Completed => {
            write_json(&args.output, &analysis_output(&locations))?;
            println!("Wrote {} locations to {}", locations.len(), args.output.display());
            Ok(())
        }
        SessionState::Cancelled => bail!("analysis cancelled"),
        state => match failure {
            Some(err) => Err(err).context("analysis failed"),
            None => bail!("analysis ended in state {state:?}"),
        },
    }
}

async fn run_ground(client: &PipelineClient, args: GroundArgs, timeout: Option<Duration>) -> Result<()> {
    let mut request = GroundScenesRequest::new(args.scene_ids).save_to_db(!args.no_save);
    if let Some(target_city) = args.target_city {
        request = request.target_city(target_city);
    }
    if let Some(max_results) = args.max_results {
        request = request.max_results(max_results);
    }
    if let Some(workers) = args.workers {
        request = request.parallel_workers(workers);
    }

    let (sink, mut updates) = ChannelSink::new();
    let session = client.ground_scenes(request, sink, SessionOptions::default())?;
    arm_cancellation(&session, timeout);

    let mut candidates: Vec<LocationCandidate> = Vec::new();
    let mut failure = None;
    while let Some(update) = updates.recv().await {
        match update {
            SessionUpdate::Event(GroundingEvent::Status(status)) => {
                println!("[{:?}] {}", session.phase(), status.message);
            }
            SessionUpdate::Event(GroundingEvent::SceneStart(start)) => {
                println!("> {} {}", start.scene_id, start.scene_header);
            }
            SessionUpdate::Event(GroundingEvent::Candidate(found)) => {
                println!("  {}", describe_candidate(&found.candidate));
                candidates.push(found.candidate);
            }
            SessionUpdate::Event(GroundingEvent::SceneComplete(done)) => {
                println!("< {} ({} candidates)", done.scene_id, done.candidates_found);
            }
            SessionUpdate::Event(GroundingEvent::Progress(progress)) => {
                println!("  {}/{} scenes ({}%)", progress.processed, progress.total, progress.percent);
            }
            SessionUpdate::Event(GroundingEvent::Complete(summary)) => {
                if let Some(message) = summary.message {
                    println!("[complete] {message}");
                }
            }
            SessionUpdate::Event(GroundingEvent::Error(err)) => match err.scene_id {
                Some(scene_id) => eprintln!("[error] {scene_id}: {}", err.message),
                None => eprintln!("[error] {}", err.message),
            },
            SessionUpdate::Event(GroundingEvent::Unknown { name, .. }) => {
                debug!(event = %name, "ignoring unknown grounding event");
            }
            SessionUpdate::Error(err) => failure = Some(err),
            SessionUpdate::Complete => {}
        }
    }

    let progress = session.progress();
    let state = session.join().await?;
    for (scene_id, count) in &progress.candidates_per_scene {
        println!("{scene_id}: {count}");
    }
    if !progress.failed_scenes.is_empty() {
        eprintln!("failed scenes: {}", progress.failed_scenes.join(", "));
    }
    if let Some(path) = &args.output {
        write_json(path, &serde_json::to_value(&candidates)?)?;
    }

    match state {
        SessionState::Completed if progress.phase() == GroundingPhase::Complete => {
            println!("Found {} candidates", progress.candidates_seen);
            Ok(())
        }
        SessionState::Completed => bail!("grounding stream ended before completion"),
        SessionState::Cancelled => bail!("grounding cancelled"),
        state => match failure {
            Some(err) => Err(err).context("grounding failed"),
            None => bail!("grounding ended in state {state:?}"),
        },
    }
}

fn describe_candidate(candidate: &LocationCandidate) -> String {
    let mut line = format!(
        "{} [{:.0}%]",
        candidate.venue_name,
        candidate.match_score * 100.0
    );
    if !candidate.formatted_address.is_empty() {
        line.push_str(" - ");
        line.push_str(&candidate.formatted_address);
    }
    if !candidate.red_flags.is_empty() {
        line.push_str(&format!(" (flags: {})", candidate.red_flags.join("; ")));
    }
    line
}

fn analysis_output(locations: &[LocationRequirement]) -> serde_json::Value {
    serde_json::json!({
        "total_locations": locations.len(),
        "locations": locations,
    })
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_stream::{Pipeline, ScriptAnalysis};

    #[test]
    fn analyze_defaults_output_path() {
        let cli = Cli::try_parse_from(["scout", "analyze", "/scripts/heist.pdf"]).expect("parse");
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.file_path, "/scripts/heist.pdf");
        assert_eq!(args.output, PathBuf::from("locations_output.json"));
    }

    #[test]
    fn ground_requires_scene_ids_and_accepts_globals() {
        assert!(Cli::try_parse_from(["scout", "ground"]).is_err());
        let cli = Cli::try_parse_from([
            "scout",
            "ground",
            "s1",
            "s2",
            "--workers",
            "3",
            "--no-save",
            "--timeout-secs",
            "60",
        ])
        .expect("parse");
        assert_eq!(cli.timeout_secs, Some(60));
        let Command::Ground(args) = cli.command else {
            panic!("expected ground");
        };
        assert_eq!(args.scene_ids, vec!["s1", "s2"]);
        assert_eq!(args.workers, Some(3));
        assert!(args.no_save);
    }

    #[test]
    fn analysis_output_is_written_as_json() {
        let event = ScriptAnalysis::normalize(
            "location",
            serde_json::json!({"scene_id": "SC_001", "scene_header": "INT. BANK - DAY"}),
        )
        .expect("location");
        let AnalysisEvent::Location(location) = event else {
            panic!("expected location");
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("locations.json");
        write_json(&path, &analysis_output(&[location])).expect("write");

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written["total_locations"], 1);
        assert_eq!(written["locations"][0]["scene_header"], "INT. BANK - DAY");
        assert_eq!(written["locations"][0]["target_city"], "Los Angeles, CA");
    }
}
