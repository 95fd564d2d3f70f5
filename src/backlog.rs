use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Config, MAX_PAGE_SIZE};
use crate::pagination::{Cursor, Identified, Paginator, PartialPages};
use crate::rate_limit::RateLimiter;

/// `{id, name}` pairs used for status, priority and users
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Named {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: u64,
    #[serde(default)]
    pub project_key: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Issue summary as returned by the issue list endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: u64,
    pub issue_key: String,
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: Named,
    pub priority: Named,
    #[serde(default)]
    pub assignee: Option<Named>,
    pub created: String,
    pub updated: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub content: Option<String>,
    pub created: String,
    pub created_user: Named,
}

/// Wiki entry from the list endpoint, which omits the page body
#[derive(Debug, Clone, Deserialize)]
pub struct WikiSummary {
    pub id: u64,
    pub name: String,
    pub updated: String,
}

/// Full wiki page from the detail endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct WikiPage {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl Identified for Issue {
    fn id(&self) -> u64 {
        self.id
    }
}

impl Identified for Comment {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Filters applied to the issue list endpoint
#[derive(Debug, Clone, Default)]
pub struct IssueQuery {
    pub project_id: u64,
    pub status_id: Option<String>,
}

/// A project given either by numeric id or by human-readable key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectRef {
    Id(u64),
    Key(String),
}

impl ProjectRef {
    /// Numeric strings are ids; anything else is treated as a project key
    pub fn parse(reference: &str) -> Self {
        let trimmed = reference.trim();
        match trimmed.parse::<u64>() {
            Ok(id) => ProjectRef::Id(id),
            Err(_) => ProjectRef::Key(trimmed.to_string()),
        }
    }
}

/// Backlog REST client bound to one domain and API key
#[derive(Clone)]
pub struct BacklogClient {
    http: Client,
    domain: String,
    base_url: String,
    web_url: String,
    api_key: String,
    limiter: Arc<RateLimiter>,
}

impl BacklogClient {
    /// Create a client for `<scheme>://<domain>/api/v2`
    pub fn new(
        config: &Config,
        domain: &str,
        api_key: &str,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let domain = domain.trim().trim_end_matches('/');
        if domain.is_empty() {
            return Err(anyhow!("Backlog domain must not be empty"));
        }

        let http = Client::builder()
            .user_agent(concat!("backlog-exporter/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        let web_url = format!("{}://{}", config.api.scheme, domain);

        Ok(Self {
            http,
            domain: domain.to_string(),
            base_url: format!("{}/api/v2", web_url),
            web_url,
            api_key: api_key.to_string(),
            limiter,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Browser link to an issue
    pub fn issue_url(&self, issue_key: &str) -> String {
        format!("{}/view/{}", self.web_url, issue_key)
    }

    /// Browser link to a wiki page
    pub fn wiki_url(&self, wiki_id: u64) -> String {
        format!("{}/alias/wiki/{}", self.web_url, wiki_id)
    }

    /// Issue one rate-limited GET and decode the JSON body
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.limiter.increment().await;

        let url = format!("{}/{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .http
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
            .query(query)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", path, status, body.trim()));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode response from {}", path))
    }

    /// Look up a project by key
    pub async fn get_project(&self, project_key: &str) -> Result<Project> {
        self.get_json(&format!("projects/{}", project_key), &[])
            .await
    }

    /// Resolve a project reference to its numeric id.
    ///
    /// Numeric references are returned as-is without contacting the server.
    pub async fn resolve_project_id(&self, reference: &str) -> Result<u64> {
        match ProjectRef::parse(reference) {
            ProjectRef::Id(id) => Ok(id),
            ProjectRef::Key(key) => {
                let project = self.get_project(&key).await.with_context(|| {
                    format!("Failed to resolve project id from project key \"{}\"", key)
                })?;
                info!("Resolved project key {} to id {}", key, project.id);
                Ok(project.id)
            }
        }
    }

    /// One page of issues
    pub async fn list_issues(
        &self,
        query: &IssueQuery,
        offset: u64,
        count: usize,
    ) -> Result<Vec<Issue>> {
        let mut params = vec![
            ("count", count.to_string()),
            ("offset", offset.to_string()),
            ("projectId[]", query.project_id.to_string()),
        ];
        if let Some(status_id) = &query.status_id {
            params.push(("statusId[]", status_id.clone()));
        }

        info!("Fetching issues (offset: {}, count: {})", offset, count);
        self.get_json("issues", &params).await
    }

    /// Every issue matching `query`, paged by offset.
    ///
    /// Any failed page aborts the whole fetch.
    pub async fn fetch_all_issues(
        &self,
        query: &IssueQuery,
        paginator: &Paginator,
    ) -> Result<Vec<Issue>> {
        paginator
            .fetch_all(Cursor::Offset(0), |cursor, count| async move {
                let offset = match cursor {
                    Cursor::Offset(offset) => offset,
                    Cursor::MinId(_) => 0,
                };
                self.list_issues(query, offset, count).await
            })
            .await
            .map_err(|partial| partial.error)
            .with_context(|| format!("Failed to fetch issues for project {}", query.project_id))
    }

    /// One page of comments in ascending id order
    pub async fn list_comments(
        &self,
        issue_key: &str,
        min_id: Option<u64>,
        count: usize,
    ) -> Result<Vec<Comment>> {
        let mut params = vec![("count", count.to_string())];
        if let Some(min_id) = min_id {
            params.push(("minId", min_id.to_string()));
        }

        self.get_json(&format!("issues/{}/comments", issue_key), &params)
            .await
    }

    /// Every comment on an issue, paged by minimum id
    pub async fn fetch_all_comments(
        &self,
        issue_key: &str,
    ) -> std::result::Result<Vec<Comment>, PartialPages<Comment>> {
        Paginator::new(MAX_PAGE_SIZE)
            .fetch_all(Cursor::MinId(None), |cursor, count| async move {
                let min_id = match cursor {
                    Cursor::MinId(min_id) => min_id,
                    Cursor::Offset(_) => None,
                };
                self.list_comments(issue_key, min_id, count).await
            })
            .await
    }

    /// All wiki pages of a project (bodies omitted)
    pub async fn list_wikis(&self, project_id_or_key: &str) -> Result<Vec<WikiSummary>> {
        self.get_json("wikis", &[("projectIdOrKey", project_id_or_key.to_string())])
            .await
            .with_context(|| format!("Failed to list wiki pages for project {}", project_id_or_key))
    }

    /// Full wiki page including its body
    pub async fn get_wiki(&self, wiki_id: u64, project_id_or_key: &str) -> Result<WikiPage> {
        self.get_json(
            &format!("wikis/{}", wiki_id),
            &[("projectIdOrKey", project_id_or_key.to_string())],
        )
        .await
        .with_context(|| format!("Failed to fetch wiki page {}", wiki_id))
    }
}
