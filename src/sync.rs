//! Item Synchronizer - downloads one entity kind into an output directory
//!
//! A sync fetches the complete remote collection, keeps only items updated
//! after the last sync, then fetches detail, renders and writes each retained
//! item in turn. Items are processed sequentially so every request goes
//! through the shared rate limiter in order and no two writes race on the
//! output directory. A failure on one item is logged and skipped; only a
//! failed collection fetch aborts the sync.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::backlog::{BacklogClient, Issue, IssueQuery, WikiSummary};
use crate::config::Config;
use crate::pagination::Paginator;
use crate::render;

/// Which remote collection a directory mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Issue,
    Wiki,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Issue => write!(f, "issue"),
            EntityKind::Wiki => write!(f, "wiki"),
        }
    }
}

/// Common view over remote items for incremental filtering
pub trait RemoteItem {
    /// Stable identifier used in logs and reports
    fn key(&self) -> String;

    /// Raw ISO 8601 update timestamp
    fn updated(&self) -> &str;
}

impl RemoteItem for Issue {
    fn key(&self) -> String {
        self.issue_key.clone()
    }

    fn updated(&self) -> &str {
        &self.updated
    }
}

impl RemoteItem for WikiSummary {
    fn key(&self) -> String {
        self.id.to_string()
    }

    fn updated(&self) -> &str {
        &self.updated
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok()
}

/// Keep items updated strictly after `since`.
///
/// An absent or unparsable `since` disables filtering. Items whose own
/// timestamp cannot be parsed are kept.
pub fn filter_updated_since<T: RemoteItem>(items: Vec<T>, since: Option<&str>) -> Vec<T> {
    let Some(raw_since) = since else {
        return items;
    };

    let Some(threshold) = parse_timestamp(raw_since) else {
        warn!("Ignoring unparsable last-sync timestamp: {}", raw_since);
        return items;
    };

    items
        .into_iter()
        .filter(|item| match parse_timestamp(item.updated()) {
            Some(updated) => updated > threshold,
            None => {
                debug!("Keeping {} with unparsable timestamp {:?}", item.key(), item.updated());
                true
            }
        })
        .collect()
}

/// Result of processing one retained item
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    /// Artifact written to disk
    Written { key: String, path: PathBuf },
    /// Detail fetch, render or write failed
    Failed { key: String, error: String },
}

/// Results from a complete sync of one entity kind
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub kind: EntityKind,
    pub fetched: usize,
    pub retained: usize,
    pub written: usize,
    pub failed: usize,
    pub duration: Duration,
    pub outcomes: Vec<ItemOutcome>,
}

impl SyncReport {
    fn compile(
        kind: EntityKind,
        fetched: usize,
        retained: usize,
        outcomes: Vec<ItemOutcome>,
        duration: Duration,
    ) -> Self {
        let written = outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Written { .. }))
            .count();

        Self {
            kind,
            fetched,
            retained,
            written,
            failed: outcomes.len() - written,
            duration,
            outcomes,
        }
    }
}

/// Options for an issue sync
#[derive(Debug, Clone)]
pub struct IssueSyncOptions {
    pub output_dir: PathBuf,
    pub project_id: u64,
    pub status_id: Option<String>,
    pub max_count: usize,
    pub last_synced_at: Option<String>,
}

/// Options for a wiki sync
#[derive(Debug, Clone)]
pub struct WikiSyncOptions {
    pub output_dir: PathBuf,
    pub project_id_or_key: String,
    pub last_synced_at: Option<String>,
}

/// Runs issue and wiki syncs against one client
pub struct ItemSynchronizer<'a> {
    client: &'a BacklogClient,
    config: &'a Config,
}

impl<'a> ItemSynchronizer<'a> {
    pub fn new(client: &'a BacklogClient, config: &'a Config) -> Self {
        Self { client, config }
    }

    /// Download issues (with comments) into `options.output_dir`
    pub async fn sync_issues(&self, options: &IssueSyncOptions) -> Result<SyncReport> {
        let start_time = Instant::now();
        info!("Starting issue download for project {}", options.project_id);

        ensure_dir(&options.output_dir).await?;

        let query = IssueQuery {
            project_id: options.project_id,
            status_id: options.status_id.clone(),
        };
        let paginator =
            Paginator::new(self.config.api.effective_page_size()).with_max_items(options.max_count);

        let issues = self.client.fetch_all_issues(&query, &paginator).await?;
        let fetched = issues.len();
        info!("Found {} issues", fetched);

        let retained = filter_updated_since(issues, options.last_synced_at.as_deref());
        if let Some(since) = &options.last_synced_at {
            info!("{} issues updated since {}", retained.len(), since);
        }

        if retained.is_empty() {
            info!("No issues need updating");
            return Ok(SyncReport::compile(
                EntityKind::Issue,
                fetched,
                0,
                Vec::new(),
                start_time.elapsed(),
            ));
        }

        let retained_count = retained.len();
        let mut outcomes = Vec::with_capacity(retained_count);

        for issue in &retained {
            let outcome = match self.write_issue(issue, &options.output_dir).await {
                Ok(path) => ItemOutcome::Written {
                    key: issue.issue_key.clone(),
                    path,
                },
                Err(e) => {
                    warn!("Failed to save issue {}: {:#}", issue.issue_key, e);
                    ItemOutcome::Failed {
                        key: issue.issue_key.clone(),
                        error: format!("{:#}", e),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let report = SyncReport::compile(
            EntityKind::Issue,
            fetched,
            retained_count,
            outcomes,
            start_time.elapsed(),
        );
        info!(
            "Issue download finished: {} written, {} failed",
            report.written, report.failed
        );
        Ok(report)
    }

    async fn write_issue(&self, issue: &Issue, output_dir: &Path) -> Result<PathBuf> {
        let comments = match self.client.fetch_all_comments(&issue.issue_key).await {
            Ok(comments) => comments,
            Err(partial) => {
                warn!(
                    "Failed to fetch comments for issue {}: {:#}",
                    issue.issue_key, partial.error
                );
                partial.items
            }
        };

        let markdown = render::render_issue(issue, &comments, &self.client.issue_url(&issue.issue_key));
        let path = output_dir.join(render::issue_file_name(&issue.summary));

        fs::write(&path, markdown)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Saved issue {} to {}", issue.issue_key, path.display());
        Ok(path)
    }

    /// Download wiki pages into `options.output_dir`
    pub async fn sync_wikis(&self, options: &WikiSyncOptions) -> Result<SyncReport> {
        let start_time = Instant::now();
        info!("Starting wiki download for project {}", options.project_id_or_key);

        ensure_dir(&options.output_dir).await?;

        let wikis = self.client.list_wikis(&options.project_id_or_key).await?;
        let fetched = wikis.len();
        info!("Found {} wiki pages", fetched);

        let retained = filter_updated_since(wikis, options.last_synced_at.as_deref());
        if let Some(since) = &options.last_synced_at {
            info!("{} wiki pages updated since {}", retained.len(), since);
        }

        if retained.is_empty() {
            info!("No wiki pages need updating");
            return Ok(SyncReport::compile(
                EntityKind::Wiki,
                fetched,
                0,
                Vec::new(),
                start_time.elapsed(),
            ));
        }

        let retained_count = retained.len();
        let mut outcomes = Vec::with_capacity(retained_count);

        for wiki in &retained {
            info!("Fetching wiki page {} (id: {})", wiki.name, wiki.id);
            let outcome = match self.write_wiki(wiki, options).await {
                Ok(path) => ItemOutcome::Written {
                    key: wiki.id.to_string(),
                    path,
                },
                Err(e) => {
                    warn!("Failed to save wiki page {}: {:#}", wiki.name, e);
                    ItemOutcome::Failed {
                        key: wiki.id.to_string(),
                        error: format!("{:#}", e),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let report = SyncReport::compile(
            EntityKind::Wiki,
            fetched,
            retained_count,
            outcomes,
            start_time.elapsed(),
        );
        info!(
            "Wiki download finished: {} written, {} failed",
            report.written, report.failed
        );
        Ok(report)
    }

    async fn write_wiki(&self, wiki: &WikiSummary, options: &WikiSyncOptions) -> Result<PathBuf> {
        let page = self
            .client
            .get_wiki(wiki.id, &options.project_id_or_key)
            .await?;

        let path = options.output_dir.join(render::wiki_file_path(&wiki.name));
        if let Some(parent) = path.parent() {
            ensure_dir(parent).await?;
        }

        let markdown = render::render_wiki(wiki, &page, &self.client.wiki_url(wiki.id));
        fs::write(&path, markdown)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Saved wiki page {} to {}", wiki.name, path.display());
        Ok(path)
    }
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    struct Item {
        key: &'static str,
        updated: &'static str,
    }

    impl RemoteItem for Item {
        fn key(&self) -> String {
            self.key.to_string()
        }

        fn updated(&self) -> &str {
            self.updated
        }
    }

    fn items() -> Vec<Item> {
        vec![
            Item { key: "old", updated: "2024-01-01T00:00:00Z" },
            Item { key: "same", updated: "2024-02-01T00:00:00Z" },
            Item { key: "new", updated: "2024-03-01T00:00:00Z" },
            Item { key: "offset", updated: "2024-02-01T09:00:01+09:00" },
            Item { key: "garbage", updated: "yesterday" },
        ]
    }

    fn keys(items: &[Item]) -> Vec<&'static str> {
        items.iter().map(|i| i.key).collect()
    }

    #[test]
    fn test_filter_keeps_strictly_newer() {
        let kept = filter_updated_since(items(), Some("2024-02-01T00:00:00.000Z"));
        assert_eq!(keys(&kept), vec!["new", "offset", "garbage"]);
    }

    #[test]
    fn test_filter_without_timestamp_keeps_all() {
        assert_eq!(filter_updated_since(items(), None).len(), 5);
        assert_eq!(filter_updated_since(items(), Some("not a date")).len(), 5);
    }

    #[test]
    fn test_filter_can_exclude_everything() {
        let kept = filter_updated_since(
            vec![Item { key: "old", updated: "2024-01-01T00:00:00Z" }],
            Some("2025-01-01T00:00:00Z"),
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn test_report_compile() {
        let outcomes = vec![
            ItemOutcome::Written { key: "A-1".to_string(), path: "/tmp/a.md".into() },
            ItemOutcome::Failed { key: "A-2".to_string(), error: "boom".to_string() },
            ItemOutcome::Written { key: "A-3".to_string(), path: "/tmp/c.md".into() },
        ];

        let report = SyncReport::compile(EntityKind::Issue, 10, 3, outcomes, Duration::from_secs(2));

        assert_eq!(report.fetched, 10);
        assert_eq!(report.retained, 3);
        assert_eq!(report.written, 2);
        assert_eq!(report.failed, 1);
        assert_matches!(&report.outcomes[1], ItemOutcome::Failed { key, .. } if key == "A-2");
    }

    #[test]
    fn test_entity_kind_serialization() {
        assert_eq!(serde_json::to_string(&EntityKind::Issue).unwrap(), "\"issue\"");
        assert_eq!(serde_json::from_str::<EntityKind>("\"wiki\"").unwrap(), EntityKind::Wiki);
        assert_eq!(EntityKind::Wiki.to_string(), "wiki");
    }
}
