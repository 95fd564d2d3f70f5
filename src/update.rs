//! Batch updater - re-runs every configured sync target under a directory
//!
//! Any directory holding a settings sidecar is a sync target. Targets are
//! discovered depth-first from a root; each one is refreshed with its stored
//! settings, overlaid by command-line overrides, and its last-sync timestamp
//! is advanced to the time the refresh started.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backlog::BacklogClient;
use crate::config::{self, Config};
use crate::rate_limit::RateLimiter;
use crate::settings::{self, Settings};
use crate::sync::{EntityKind, IssueSyncOptions, ItemSynchronizer, SyncReport, WikiSyncOptions};

/// Command-line values that take precedence over stored settings
#[derive(Debug, Clone, Default)]
pub struct UpdateOverrides {
    pub api_key: Option<String>,
    pub domain: Option<String>,
    pub project_id_or_key: Option<String>,
    pub force: bool,
    pub issues_only: bool,
    pub wikis_only: bool,
}

/// Entity kinds refreshed for one directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Targets {
    pub issues: bool,
    pub wikis: bool,
}

impl Targets {
    /// A stored folder type wins over the `--issues-only`/`--wikis-only` flags
    pub fn select(folder_type: Option<EntityKind>, issues_only: bool, wikis_only: bool) -> Self {
        match folder_type {
            Some(EntityKind::Issue) => Self { issues: true, wikis: false },
            Some(EntityKind::Wiki) => Self { issues: false, wikis: true },
            None => Self {
                issues: !wikis_only,
                wikis: !issues_only,
            },
        }
    }

    fn describe(&self) -> &'static str {
        match (self.issues, self.wikis) {
            (true, true) => "issues and wiki pages",
            (true, false) => "issues",
            (false, true) => "wiki pages",
            (false, false) => "nothing",
        }
    }
}

/// Everything needed to refresh one directory
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub dir: PathBuf,
    pub domain: String,
    pub project_id_or_key: String,
    pub folder_type: Option<EntityKind>,
    pub targets: Targets,
    pub last_synced_at: Option<String>,
}

/// Asks whether a planned update should go ahead
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, plan: &UpdatePlan) -> Result<bool>;
}

/// Approves every plan; used for `--force` and automation
pub struct AlwaysConfirm;

#[async_trait]
impl Confirm for AlwaysConfirm {
    async fn confirm(&self, _plan: &UpdatePlan) -> Result<bool> {
        Ok(true)
    }
}

/// Prints the plan and reads a yes/no answer from stdin.
///
/// One buffered reader serves every prompt, so answers piped in ahead of
/// time are consumed one line per directory.
pub struct StdinConfirm {
    input: Mutex<BufReader<Stdin>>,
}

impl StdinConfirm {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

impl Default for StdinConfirm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, plan: &UpdatePlan) -> Result<bool> {
        println!("About to update with these settings:");
        println!("  Directory: {}", plan.dir.display());
        println!("  Domain:    {}", plan.domain);
        println!("  Project:   {}", plan.project_id_or_key);
        if let Some(folder_type) = plan.folder_type {
            println!("  Folder:    {}", folder_type);
        }
        println!("  Updating:  {}", plan.targets.describe());
        println!("Proceed? (y/n)");

        let mut answer = String::new();
        self.input
            .lock()
            .await
            .read_line(&mut answer)
            .await
            .context("Failed to read confirmation from stdin")?;

        Ok(is_yes(&answer))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Every directory under `root` (root included) holding a settings sidecar.
///
/// Traversal is depth-first in name order. Each directory is visited once even
/// when symlinks form cycles; unreadable directories are logged and skipped.
pub fn discover_targets(root: &Path) -> Vec<PathBuf> {
    let mut visited = HashSet::new();
    let mut targets = Vec::new();
    walk(root, &mut visited, &mut targets);
    targets
}

fn walk(dir: &Path, visited: &mut HashSet<PathBuf>, targets: &mut Vec<PathBuf>) {
    let canonical = match dir.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            warn!("Failed to read directory {}: {}", dir.display(), e);
            return;
        }
    };
    if !visited.insert(canonical) {
        debug!("Already visited {}", dir.display());
        return;
    }

    if settings::has_settings(dir) {
        targets.push(dir.to_path_buf());
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read directory {}: {}", dir.display(), e);
            return;
        }
    };

    let mut subdirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();

    for subdir in subdirs {
        walk(&subdir, visited, targets);
    }
}

/// Result of handling one discovered directory
#[derive(Debug, Clone)]
pub enum DirectoryOutcome {
    Updated { dir: PathBuf, reports: Vec<SyncReport> },
    Skipped { dir: PathBuf, reason: String },
}

/// Results from a complete batch update
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub outcomes: Vec<DirectoryOutcome>,
    pub duration: Duration,
}

impl BatchSummary {
    pub fn updated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, DirectoryOutcome::Updated { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.updated()
    }
}

/// Walks a tree of output directories and refreshes each configured one
pub struct BatchUpdater {
    config: Config,
    overrides: UpdateOverrides,
    confirm: Box<dyn Confirm>,
    limiter: Arc<RateLimiter>,
}

impl BatchUpdater {
    pub fn new(
        config: Config,
        overrides: UpdateOverrides,
        confirm: Box<dyn Confirm>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config,
            overrides,
            confirm,
            limiter,
        }
    }

    /// Update every sync target under `root`
    pub async fn run(&self, root: &Path) -> Result<BatchSummary> {
        let start_time = Instant::now();
        let walk_root = root.to_path_buf();
        let targets = tokio::task::spawn_blocking(move || discover_targets(&walk_root))
            .await
            .context("Directory discovery task failed")?;
        info!("Found {} configured directories under {}", targets.len(), root.display());

        let mut outcomes = Vec::with_capacity(targets.len());
        for dir in targets {
            outcomes.push(self.update_directory(&dir).await?);
        }

        Ok(BatchSummary {
            outcomes,
            duration: start_time.elapsed(),
        })
    }

    /// Refresh one directory according to its sidecar and the overrides
    pub async fn update_directory(&self, dir: &Path) -> Result<DirectoryOutcome> {
        let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let stored = settings::load(dir).await;

        let api_key = match self.overrides.api_key.as_deref().or(stored.api_key.as_deref()) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => config::resolve_api_key(None)?,
        };

        let Some(domain) = self.overrides.domain.clone().or(stored.domain.clone()) else {
            return Ok(skip(dir, "no domain configured"));
        };
        let Some(project_id_or_key) = self
            .overrides
            .project_id_or_key
            .clone()
            .or(stored.project_id_or_key.clone())
        else {
            return Ok(skip(dir, "no project id or key configured"));
        };

        let plan = UpdatePlan {
            dir: dir.to_path_buf(),
            domain,
            project_id_or_key,
            folder_type: stored.folder_type,
            targets: Targets::select(
                stored.folder_type,
                self.overrides.issues_only,
                self.overrides.wikis_only,
            ),
            last_synced_at: stored.last_updated.clone(),
        };

        if !self.overrides.force && !self.confirm.confirm(&plan).await? {
            info!("Update of {} cancelled", dir.display());
            return Ok(DirectoryOutcome::Skipped {
                dir: dir.to_path_buf(),
                reason: "declined".to_string(),
            });
        }

        let reports = self.execute(&plan, &api_key).await?;

        settings::merge_and_save(
            dir,
            Settings {
                api_key: Some(api_key),
                domain: Some(plan.domain.clone()),
                last_updated: Some(started_at),
                output_dir: Some(dir.display().to_string()),
                project_id_or_key: Some(plan.project_id_or_key.clone()),
                ..Default::default()
            },
        )
        .await?;

        let message = format!("Updated {}", plan.targets.describe());
        settings::append_update_log(dir, &message).await;
        info!("Finished updating {}", dir.display());

        Ok(DirectoryOutcome::Updated {
            dir: dir.to_path_buf(),
            reports,
        })
    }

    async fn execute(&self, plan: &UpdatePlan, api_key: &str) -> Result<Vec<SyncReport>> {
        let client = BacklogClient::new(&self.config, &plan.domain, api_key, self.limiter.clone())?;
        let project_id = client.resolve_project_id(&plan.project_id_or_key).await?;
        info!("Using project id {}", project_id);

        let synchronizer = ItemSynchronizer::new(&client, &self.config);
        let mut reports = Vec::new();

        if plan.targets.issues {
            let report = synchronizer
                .sync_issues(&IssueSyncOptions {
                    output_dir: plan.dir.clone(),
                    project_id,
                    status_id: None,
                    max_count: self.config.max_count(None),
                    last_synced_at: plan.last_synced_at.clone(),
                })
                .await
                .with_context(|| format!("Failed to update issues in {}", plan.dir.display()))?;
            reports.push(report);
        }

        if plan.targets.wikis {
            let report = synchronizer
                .sync_wikis(&WikiSyncOptions {
                    output_dir: plan.dir.clone(),
                    project_id_or_key: plan.project_id_or_key.clone(),
                    last_synced_at: plan.last_synced_at.clone(),
                })
                .await
                .with_context(|| format!("Failed to update wiki pages in {}", plan.dir.display()))?;
            reports.push(report);
        }

        Ok(reports)
    }
}

fn skip(dir: &Path, reason: &str) -> DirectoryOutcome {
    warn!("{}: {}, skipping", dir.display(), reason);
    DirectoryOutcome::Skipped {
        dir: dir.to_path_buf(),
        reason: reason.to_string(),
    }
}
