use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use freshcheck_contracts::events::{EventPayload, EventWriter};
use freshcheck_contracts::history::HistoryRecord;
use freshcheck_contracts::presenter::{present, rate_label, render_text, share_result, ShareOutcome};
use freshcheck_contracts::session::{Identity, LocalSession, SessionProvider};
use freshcheck_engine::acquire::CameraDevice;
use freshcheck_engine::{
    AnalysisRequestBuilder, HistoryPersister, MediaAcquirer, ScanController, SelectedFile,
    Settings, StillFrameCamera,
};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "freshcheck", version, about = "Produce freshness checks from a photo")]
struct Cli {
    /// Dotenv file merged under the process environment.
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,
    /// JSONL event log (defaults to FRESHCHECK_EVENTS).
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze one image and optionally save it to history.
    Scan(ScanArgs),
    /// List the signed-in user's saved scans, newest first.
    History(HistoryArgs),
    /// Delete one saved scan.
    Delete(DeleteArgs),
    /// Show the top scanners.
    Leaderboard,
}

#[derive(Debug, Parser)]
struct ScanArgs {
    /// Image file to upload.
    #[arg(long, conflicts_with = "camera_frame", required_unless_present = "camera_frame")]
    image: Option<PathBuf>,
    /// Still frame served through the camera path (re-encoded as JPEG).
    #[arg(long)]
    camera_frame: Option<PathBuf>,
    /// Overrides FRESHCHECK_MODEL; `dryrun` answers offline.
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    save: bool,
    #[arg(long)]
    share: bool,
    /// Print the decoded assessment as JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct DeleteArgs {
    #[arg(long)]
    id: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("freshcheck error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.env_file)?;
    let events_path = cli
        .events
        .clone()
        .unwrap_or_else(|| settings.events_path.clone());
    let events = EventWriter::new(&events_path, uuid::Uuid::new_v4().to_string());
    let session = Arc::new(LocalSession::new(settings.identity.clone()));

    let mut payload = EventPayload::new();
    payload.insert("command".to_string(), json!(command_name(&cli.command)));
    payload.insert("model".to_string(), json!(settings.model));
    payload.insert(
        "identity".to_string(),
        json!(session.current().map(|identity| identity.id)),
    );
    events.note("session_started", payload);

    match cli.command {
        Command::Scan(args) => run_scan(args, &settings, session, events),
        Command::History(args) => {
            let (persister, owner) = signed_in_persister(&settings, session.as_ref(), events)?;
            let records = persister.list(&owner)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_history(&records);
            }
            Ok(0)
        }
        Command::Delete(args) => {
            let (persister, owner) = signed_in_persister(&settings, session.as_ref(), events)?;
            persister.delete(&args.id, &owner)?;
            println!("Deleted {}.", args.id);
            Ok(0)
        }
        Command::Leaderboard => {
            let persister = settings
                .persister(events)
                .context("Set FRESHCHECK_SUPABASE_URL and FRESHCHECK_SUPABASE_ANON_KEY.")?;
            let board = persister.leaderboard(session.current().as_ref())?;
            for (idx, entry) in board.entries.iter().enumerate() {
                println!("{:>3}. {:<24} {}", idx + 1, entry.display_name, entry.scan_count);
            }
            if let Some(rank) = board.viewer_rank {
                println!("Your rank: #{rank}");
            }
            Ok(0)
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Scan(_) => "scan",
        Command::History(_) => "history",
        Command::Delete(_) => "delete",
        Command::Leaderboard => "leaderboard",
    }
}

fn build_controller(
    settings: &Settings,
    model: &str,
    camera_frame: Option<&Path>,
    session: Arc<dyn SessionProvider>,
    events: EventWriter,
) -> Result<ScanController> {
    let registry = settings.provider_registry();
    let provider = registry
        .for_model(model)
        .with_context(|| format!("no inference provider for model {model}"))?;
    let analyzer = AnalysisRequestBuilder::new(provider, model, events.clone());
    let camera = camera_frame
        .map(|path| Box::new(StillFrameCamera::new(path)) as Box<dyn CameraDevice>);
    Ok(ScanController::new(
        MediaAcquirer::new(camera),
        analyzer,
        settings.persister(events.clone()),
        session,
        events,
    ))
}

fn run_scan(
    args: ScanArgs,
    settings: &Settings,
    session: Arc<LocalSession>,
    events: EventWriter,
) -> Result<i32> {
    let model = args.model.clone().unwrap_or_else(|| settings.model.clone());
    let controller = build_controller(
        settings,
        &model,
        args.camera_frame.as_deref(),
        session,
        events,
    )?;

    let ticket = match (&args.image, &args.camera_frame) {
        (Some(path), _) => controller.capture_file(SelectedFile::from_path(path)?)?,
        (None, Some(_)) => controller.capture_camera()?,
        (None, None) => bail!("pass --image or --camera-frame"),
    };
    let result = controller
        .wait(&ticket)
        .context("analysis was superseded before it finished")?;

    if args.json {
        match result.assessment() {
            Some(assessment) => println!("{}", serde_json::to_string_pretty(assessment)?),
            None => println!("{}", serde_json::to_string_pretty(&result.failure())?),
        }
    } else {
        print!("{}", render_text(&present(&result)));
    }

    let Some(assessment) = result.assessment() else {
        return Ok(2);
    };
    if args.share {
        match share_result(None, assessment) {
            ShareOutcome::Shared(summary) => println!("Shared: {}", summary.title),
            ShareOutcome::Unsupported { notice } => println!("{notice}"),
            ShareOutcome::Failed(err) => eprintln!("Share failed: {err}"),
        }
    }
    if args.save {
        let ack = controller.save()?;
        println!("Saved to history ({}).", ack.record.id);
    }
    Ok(0)
}

fn signed_in_persister(
    settings: &Settings,
    session: &dyn SessionProvider,
    events: EventWriter,
) -> Result<(HistoryPersister, Identity)> {
    let owner = session
        .current()
        .context("Sign in first: set FRESHCHECK_USER_ID and FRESHCHECK_ACCESS_TOKEN.")?;
    let persister = settings
        .persister(events)
        .context("Set FRESHCHECK_SUPABASE_URL and FRESHCHECK_SUPABASE_ANON_KEY.")?;
    Ok((persister, owner))
}

fn print_history(records: &[HistoryRecord]) {
    if records.is_empty() {
        println!("No scans yet.");
        return;
    }
    for record in records {
        println!(
            "{}  {:<12}  {:<20}  {}",
            record.id,
            record.display_date(),
            record.record.item_name,
            rate_label(&record.record.status)
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn scan_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["freshcheck", "scan"]).is_err());
        assert!(Cli::try_parse_from([
            "freshcheck",
            "scan",
            "--image",
            "a.png",
            "--camera-frame",
            "b.png"
        ])
        .is_err());
        let cli = Cli::try_parse_from(["freshcheck", "scan", "--image", "a.png", "--save"])
            .expect("parses");
        assert!(matches!(cli.command, Command::Scan(ScanArgs { save: true, .. })));
    }

    #[test]
    fn dryrun_scan_runs_offline() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("apple.png");
        std::fs::write(&image_path, b"\x89PNG\r\n\x1a\nnot really a png")?;
        let settings = Settings::from_vars(&HashMap::new());
        let session = Arc::new(LocalSession::new(None));
        let controller = build_controller(
            &settings,
            "dryrun",
            None,
            session,
            EventWriter::new(temp.path().join("events.jsonl"), "test"),
        )?;

        let ticket = controller.capture_file(SelectedFile::from_path(&image_path)?)?;
        let result = controller.wait(&ticket).expect("delivered");
        assert_eq!(result.assessment().map(|a| a.item_name()), Some("Apple"));
        assert!(controller.save().is_err());
        Ok(())
    }
}
