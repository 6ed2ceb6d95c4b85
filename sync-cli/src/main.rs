use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Input;
use drivesync::{Settings, SyncEngine, SyncOutcome};
use drivesync_core::{DriveClient, FolderStore, RemoteStore};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "drivesync")]
#[command(about = "Two-way snapshot sync between a local folder and Google Drive")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Local sync root
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,

    /// Compute and print the plan without applying it
    #[arg(long, global = true)]
    dry: bool,

    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Create a drivesync.json skeleton in the sync root
    Init,
    /// Upload local changes since the last sync
    Push,
    /// Download remote changes since the last sync
    Pull,
    /// Delete the remote sync folder and the local snapshot
    Wipe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Commands::Init => init(&cli.root).await,
        Commands::Push => {
            let engine = open_engine(&cli.root, cli.dry).await?;
            report(engine.push().await?)
        }
        Commands::Pull => {
            let engine = open_engine(&cli.root, cli.dry).await?;
            report(engine.pull().await?)
        }
        Commands::Wipe => {
            let engine = open_engine(&cli.root, cli.dry).await?;
            if !cli.dry && !confirm_wipe(&engine.options().sync_name)? {
                println!("Wipe cancelled");
                return Ok(());
            }
            report(engine.wipe().await?)
        }
    }
}

fn parse_level(log_level: &str) -> tracing::Level {
    match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let level = parse_level(log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "drivesync={0},drivesync_core={0},drivesync_cli={0}",
            level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()?;
    }

    Ok(())
}

async fn init(root: &Path) -> Result<()> {
    let path = Settings::write_skeleton(root).await?;
    println!(
        "Initialized a drivesync directory, fill in {} and run push",
        path.display()
    );
    Ok(())
}

async fn open_store(root: &Path, settings: &Settings) -> Result<Arc<dyn RemoteStore>> {
    if let Some(folder) = settings.remote_folder_path(root) {
        info!("Using folder store at {}", folder.display());
        let store = FolderStore::open(folder.clone())
            .await
            .with_context(|| format!("Failed to open remote folder {}", folder.display()))?;
        return Ok(Arc::new(store));
    }

    let credentials = settings
        .credentials_path(root)
        .context("credentials is not set in drivesync.json")?;
    let client = DriveClient::from_credentials_file(&credentials)
        .await
        .with_context(|| format!("Failed to load credentials from {}", credentials.display()))?;
    Ok(Arc::new(client))
}

async fn open_engine(root: &Path, dry_run: bool) -> Result<SyncEngine> {
    let settings = Settings::load(root).await?;
    let store = open_store(root, &settings).await?;
    Ok(SyncEngine::new(root, settings.sync_options(root, dry_run), store)?)
}

fn confirm_wipe(sync_name: &str) -> Result<bool> {
    let answer: String = Input::new()
        .with_prompt(format!(
            "Delete remote folder '{}' and the local snapshot? Type 'yes' to continue",
            sync_name
        ))
        .allow_empty(true)
        .interact_text()
        .context("Failed to read confirmation")?;
    Ok(is_confirmation(&answer))
}

fn is_confirmation(answer: &str) -> bool {
    answer.trim() == "yes"
}

fn report(outcome: SyncOutcome) -> Result<()> {
    if outcome.metrics.dry_run {
        for action in &outcome.plan.actions {
            println!("{}", action);
        }
        println!("{}", outcome.plan.summary);
        return Ok(());
    }

    if outcome.plan.is_empty() {
        println!("No diff");
    }
    println!("{}", outcome.metrics.summary());

    for failure in outcome.metrics.failed() {
        eprintln!("failed: {}", failure);
    }
    if !outcome.is_successful() {
        bail!("{} entries failed to sync", outcome.metrics.failed().len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use drivesync::{Operation, SyncDirection, SyncMetrics, SyncPlan};
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_push_with_global_flags() {
        let cli = Cli::try_parse_from(["drivesync", "push", "--dry", "--root", "/data", "-l", "debug"]).unwrap();

        assert_eq!(cli.command, Commands::Push);
        assert!(cli.dry);
        assert_eq!(cli.root, PathBuf::from("/data"));
        assert_eq!(cli.log_level, "debug");
        assert!(!cli.json_logs);
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["drivesync", "wipe"]).unwrap();

        assert_eq!(cli.command, Commands::Wipe);
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(!cli.dry);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_rejects_unknown_or_missing_command() {
        assert!(Cli::try_parse_from(["drivesync"]).is_err());
        assert!(Cli::try_parse_from(["drivesync", "sync"]).is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), tracing::Level::DEBUG);
        assert_eq!(parse_level("warn"), tracing::Level::WARN);
        assert_eq!(parse_level("verbose"), tracing::Level::INFO);
    }

    #[test]
    fn test_confirmation() {
        assert!(is_confirmation("yes"));
        assert!(is_confirmation(" yes\n"));
        assert!(!is_confirmation("y"));
        assert!(!is_confirmation("YES please"));
    }

    #[tokio::test]
    async fn test_init_refuses_existing_settings() {
        let temp = TempDir::new().unwrap();

        init(temp.path()).await.unwrap();
        assert!(temp.path().join(drivesync::SETTINGS_FILE_NAME).exists());
        assert!(init(temp.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_open_engine_requires_settings() {
        let temp = TempDir::new().unwrap();
        assert!(open_engine(temp.path(), false).await.is_err());
    }

    #[tokio::test]
    async fn test_open_engine_with_folder_store() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("share")).unwrap();
        std::fs::write(
            temp.path().join(drivesync::SETTINGS_FILE_NAME),
            r#"{"sync-name": "backup", "remote-folder": "share"}"#,
        )
        .unwrap();

        let engine = open_engine(temp.path(), true).await.unwrap();

        assert_eq!(engine.options().sync_name, "backup");
        assert!(engine.options().dry_run);
    }

    #[test]
    fn test_report_fails_on_entry_failures() {
        let mut metrics = SyncMetrics::new(SyncDirection::Push, false);
        metrics.record_failure("a.txt", Operation::Upload, "boom");
        let outcome = SyncOutcome {
            plan: SyncPlan::default(),
            metrics,
        };

        assert!(report(outcome).is_err());

        let clean = SyncOutcome {
            plan: SyncPlan::default(),
            metrics: SyncMetrics::new(SyncDirection::Pull, false),
        };
        assert!(report(clean).is_ok());
    }
}
