use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use backlog_exporter::config::{expand_path, resolve_api_key};
use backlog_exporter::sync::{IssueSyncOptions, WikiSyncOptions};
use backlog_exporter::update::{AlwaysConfirm, Confirm, StdinConfirm};
use backlog_exporter::{
    settings, BacklogClient, BatchUpdater, Config, DirectoryOutcome, EntityKind, ItemOutcome,
    ItemSynchronizer, RateLimiter, Settings, SyncReport, UpdateOverrides,
};

#[derive(Parser)]
#[command(name = "backlog-exporter")]
#[command(about = "Download Backlog issues and wiki pages as Markdown")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Connection flags shared by the download commands
#[derive(Args)]
struct ProjectArgs {
    /// Backlog domain (e.g. example.backlog.jp)
    #[arg(long)]
    domain: String,

    /// Backlog project ID or key
    #[arg(long, alias = "projectIdOrKey")]
    project_id_or_key: String,

    /// Backlog API key (falls back to BACKLOG_API_KEY)
    #[arg(long, alias = "apiKey")]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download issues with their comments
    Issue {
        #[command(flatten)]
        project: ProjectArgs,

        /// Output directory
        #[arg(short, long, default_value = "./backlog-issues")]
        output: String,

        /// Maximum number of issues to fetch
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Only fetch issues with this status ID
        #[arg(long, alias = "statusId")]
        status_id: Option<String>,
    },

    /// Download wiki pages
    Wiki {
        #[command(flatten)]
        project: ProjectArgs,

        /// Output directory
        #[arg(short, long, default_value = "./backlog-wiki")]
        output: String,
    },

    /// Download issues and wiki pages together
    All {
        #[command(flatten)]
        project: ProjectArgs,

        /// Output root; issues/ and wiki/ are created below it (defaults to the project key)
        #[arg(short, long)]
        output: Option<String>,

        /// Maximum number of issues to fetch
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Only fetch issues with this status ID
        #[arg(long, alias = "statusId")]
        status_id: Option<String>,
    },

    /// Refresh every previously downloaded directory under DIRECTORY
    Update {
        /// Directory to search for settings files (defaults to the current directory)
        directory: Option<String>,

        /// Backlog API key (overrides stored settings)
        #[arg(long, alias = "apiKey")]
        api_key: Option<String>,

        /// Backlog domain (overrides stored settings)
        #[arg(long)]
        domain: Option<String>,

        /// Backlog project ID or key (overrides stored settings)
        #[arg(long, alias = "projectIdOrKey")]
        project_id_or_key: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,

        /// Only update issues
        #[arg(long, alias = "issuesOnly", conflicts_with = "wikis_only")]
        issues_only: bool,

        /// Only update wiki pages
        #[arg(long, alias = "wikisOnly")]
        wikis_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config)?;
    info!("Starting backlog-exporter v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Issue {
            project,
            output,
            count,
            status_id,
        } => cmd_issue(project, output, count, status_id, &config).await,
        Commands::Wiki { project, output } => cmd_wiki(project, output, &config).await,
        Commands::All {
            project,
            output,
            count,
            status_id,
        } => cmd_all(project, output, count, status_id, &config).await,
        Commands::Update {
            directory,
            api_key,
            domain,
            project_id_or_key,
            force,
            issues_only,
            wikis_only,
        } => {
            let overrides = UpdateOverrides {
                api_key,
                domain,
                project_id_or_key,
                force,
                issues_only,
                wikis_only,
            };
            cmd_update(directory, overrides, &config).await
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool, config: &Config) -> Result<()> {
    let default_level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Record a finished download in the directory's sidecar
async fn record_sync(
    dir: &Path,
    kind: EntityKind,
    project: &ProjectArgs,
    api_key: &str,
    started_at: &str,
) -> Result<()> {
    settings::merge_and_save(
        dir,
        Settings {
            api_key: Some(api_key.to_string()),
            domain: Some(project.domain.clone()),
            folder_type: Some(kind),
            last_updated: Some(started_at.to_string()),
            output_dir: Some(dir.display().to_string()),
            project_id_or_key: Some(project.project_id_or_key.clone()),
            ..Default::default()
        },
    )
    .await?;
    Ok(())
}

/// Download issues into a single directory
async fn cmd_issue(
    project: ProjectArgs,
    output: String,
    count: Option<usize>,
    status_id: Option<String>,
    config: &Config,
) -> Result<()> {
    let started_at = now_iso8601();
    let api_key = resolve_api_key(project.api_key.as_deref())?;
    let output_dir = expand_path(&output)?;

    println!(
        "📥 Downloading issues of project {} from {}",
        project.project_id_or_key, project.domain
    );

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let client = BacklogClient::new(config, &project.domain, &api_key, limiter)?;
    let project_id = client.resolve_project_id(&project.project_id_or_key).await?;
    info!("Using project id {}", project_id);

    let report = ItemSynchronizer::new(&client, config)
        .sync_issues(&IssueSyncOptions {
            output_dir: output_dir.clone(),
            project_id,
            status_id,
            max_count: config.max_count(count),
            last_synced_at: None,
        })
        .await
        .context("Download failed")?;

    record_sync(&output_dir, EntityKind::Issue, &project, &api_key, &started_at).await?;
    print_report(&report, &output_dir);
    Ok(())
}

/// Download wiki pages into a single directory
async fn cmd_wiki(project: ProjectArgs, output: String, config: &Config) -> Result<()> {
    let started_at = now_iso8601();
    let api_key = resolve_api_key(project.api_key.as_deref())?;
    let output_dir = expand_path(&output)?;

    println!(
        "📥 Downloading wiki pages of project {} from {}",
        project.project_id_or_key, project.domain
    );

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let client = BacklogClient::new(config, &project.domain, &api_key, limiter)?;

    let report = ItemSynchronizer::new(&client, config)
        .sync_wikis(&WikiSyncOptions {
            output_dir: output_dir.clone(),
            project_id_or_key: project.project_id_or_key.clone(),
            last_synced_at: None,
        })
        .await
        .context("Download failed")?;

    record_sync(&output_dir, EntityKind::Wiki, &project, &api_key, &started_at).await?;
    print_report(&report, &output_dir);
    Ok(())
}

/// Download issues and wiki pages concurrently under one root
async fn cmd_all(
    project: ProjectArgs,
    output: Option<String>,
    count: Option<usize>,
    status_id: Option<String>,
    config: &Config,
) -> Result<()> {
    let started_at = now_iso8601();
    let api_key = resolve_api_key(project.api_key.as_deref())?;
    let output_root = expand_path(output.as_deref().unwrap_or(&project.project_id_or_key))?;
    let issue_dir = output_root.join("issues");
    let wiki_dir = output_root.join("wiki");

    println!(
        "📥 Downloading issues and wiki pages of project {} from {}",
        project.project_id_or_key, project.domain
    );
    println!("   Output directory: {}", output_root.display());

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let client = BacklogClient::new(config, &project.domain, &api_key, limiter)?;
    let project_id = client.resolve_project_id(&project.project_id_or_key).await?;
    info!("Using project id {}", project_id);

    let synchronizer = ItemSynchronizer::new(&client, config);
    let issue_options = IssueSyncOptions {
        output_dir: issue_dir.clone(),
        project_id,
        status_id,
        max_count: config.max_count(count),
        last_synced_at: None,
    };
    let wiki_options = WikiSyncOptions {
        output_dir: wiki_dir.clone(),
        project_id_or_key: project.project_id_or_key.clone(),
        last_synced_at: None,
    };

    let (issue_report, wiki_report) = futures::try_join!(
        synchronizer.sync_issues(&issue_options),
        synchronizer.sync_wikis(&wiki_options)
    )
    .context("Download failed")?;

    record_sync(&issue_dir, EntityKind::Issue, &project, &api_key, &started_at).await?;
    record_sync(&wiki_dir, EntityKind::Wiki, &project, &api_key, &started_at).await?;

    print_report(&issue_report, &issue_dir);
    print_report(&wiki_report, &wiki_dir);
    println!("   🌐 API requests: {}", client.limiter().count());
    Ok(())
}

/// Refresh every configured directory below the given root
async fn cmd_update(
    directory: Option<String>,
    overrides: UpdateOverrides,
    config: &Config,
) -> Result<()> {
    let root = match directory {
        Some(dir) => expand_path(&dir)?,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };

    let confirm: Box<dyn Confirm> = if overrides.force {
        Box::new(AlwaysConfirm)
    } else {
        Box::new(StdinConfirm::new())
    };

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let updater = BatchUpdater::new(config.clone(), overrides, confirm, limiter.clone());

    println!("🔍 Searching {} for settings files...", root.display());
    let summary = updater.run(&root).await.context("Update failed")?;

    for outcome in &summary.outcomes {
        match outcome {
            DirectoryOutcome::Updated { dir, reports } => {
                for report in reports {
                    print_report(report, dir);
                }
            }
            DirectoryOutcome::Skipped { dir, reason } => {
                println!("   ⏭️  Skipped {}: {}", dir.display(), reason);
            }
        }
    }

    println!("\n🎉 Update complete!");
    println!("   ✅ Directories updated: {}", summary.updated());
    println!("   ⏭️  Directories skipped: {}", summary.skipped());
    println!("   🌐 API requests: {}", limiter.count());
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.outcomes.is_empty() {
        println!("\n💡 No backlog-settings.json found. Run 'issue', 'wiki' or 'all' first.");
    }

    Ok(())
}

fn print_report(report: &SyncReport, dir: &Path) {
    println!("\n📊 {} sync of {}", report.kind, dir.display());
    println!("   📥 Fetched: {}", report.fetched);
    println!("   🔄 Changed since last sync: {}", report.retained);
    println!("   ✅ Written: {}", report.written);
    println!("   ❌ Failed: {}", report.failed);
    println!("   ⏱️  Duration: {:.2}s", report.duration.as_secs_f64());

    for outcome in &report.outcomes {
        if let ItemOutcome::Failed { key, error } = outcome {
            println!("   ❌ {}: {}", key, error);
        }
    }
}
