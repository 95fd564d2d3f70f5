//! Markdown rendering and filename derivation for downloaded items

use chrono::{DateTime, Local};
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::backlog::{Comment, Issue, WikiPage, WikiSummary};

/// Longest file stem (and wiki path segment) written, in characters
pub const MAX_NAME_CHARS: usize = 200;

const INVALID_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

fn whitespace() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"))
}

/// File name for an issue artifact, derived from its summary
pub fn issue_file_name(summary: &str) -> String {
    let replaced: String = summary
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let stem: String = whitespace()
        .replace_all(&replaced, "_")
        .replace('.', "_")
        .chars()
        .take(MAX_NAME_CHARS)
        .collect();

    format!("{}.md", stem)
}

/// Relative path for a wiki artifact.
///
/// `/` in the page name is kept so pages nest into directories. Segments that
/// would point outside the output directory are neutralized.
pub fn wiki_file_path(name: &str) -> PathBuf {
    let mut path = PathBuf::new();
    let mut segments = name.split('/').filter(|s| !s.is_empty()).peekable();

    if segments.peek().is_none() {
        return PathBuf::from("_.md");
    }

    while let Some(segment) = segments.next() {
        let mut cleaned: String = segment
            .chars()
            .map(|c| if c != '/' && INVALID_CHARS.contains(&c) { '_' } else { c })
            .take(MAX_NAME_CHARS)
            .collect();
        if cleaned == "." || cleaned == ".." {
            cleaned = "_".repeat(cleaned.len());
        }

        if segments.peek().is_none() {
            path.push(format!("{}.md", cleaned));
        } else {
            path.push(cleaned);
        }
    }

    path
}

/// Format an ISO 8601 timestamp in local time as `YYYY/M/D H:MM:SS`.
///
/// Unparsable input is returned unchanged.
pub fn localize_timestamp(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(timestamp) => timestamp
            .with_timezone(&Local)
            .format("%Y/%-m/%-d %-H:%M:%S")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}

fn render_comments(comments: &[Comment]) -> String {
    if comments.is_empty() {
        return String::new();
    }

    let blocks: Vec<String> = comments
        .iter()
        .enumerate()
        .map(|(index, comment)| {
            let body = comment
                .content
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or("(内容なし)");
            format!(
                "\n### コメント {}\n- **投稿者**: {}\n- **日時**: {}\n\n{}\n",
                index + 1,
                comment.created_user.name,
                localize_timestamp(&comment.created),
                body
            )
        })
        .collect();

    format!("\n\n## コメント\n{}", blocks.join("\n---\n"))
}

/// Markdown document for one issue and its comments
pub fn render_issue(issue: &Issue, comments: &[Comment], issue_url: &str) -> String {
    let assignee = issue
        .assignee
        .as_ref()
        .map(|a| a.name.as_str())
        .unwrap_or("未割り当て");
    let description = issue
        .description
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or("詳細情報なし");

    format!(
        "# {summary}\n\n\
         ## 基本情報\n\
         - 課題キー: {key}\n\
         - ステータス: {status}\n\
         - 優先度: {priority}\n\
         - 担当者: {assignee}\n\
         - 作成日時: {created}\n\
         - 更新日時: {updated}\n\
         - [Backlog Issue Link]({url})\n\n\
         ## 詳細\n\
         {description}{comments}",
        summary = issue.summary,
        key = issue.issue_key,
        status = issue.status.name,
        priority = issue.priority.name,
        assignee = assignee,
        created = localize_timestamp(&issue.created),
        updated = localize_timestamp(&issue.updated),
        url = issue_url,
        description = description,
        comments = render_comments(comments),
    )
}

/// Markdown document for one wiki page
pub fn render_wiki(summary: &WikiSummary, page: &WikiPage, wiki_url: &str) -> String {
    format!(
        "# {}\n\n[Backlog Wiki Link]({})\n\n{}",
        summary.name,
        wiki_url,
        page.content.as_deref().unwrap_or("")
    )
}
