//! Per-directory sidecar settings
//!
//! Every output directory may hold a `backlog-settings.json` recording where
//! its content came from and when it was last synchronized. The file is read
//! permissively and written back with a shallow merge, so keys unknown to
//! this tool survive an update.

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::sync::EntityKind;

pub const SETTINGS_FILE_NAME: &str = "backlog-settings.json";
pub const UPDATE_LOG_FILE_NAME: &str = "backlog-update.log";

const API_KEY: &str = "apiKey";
const DOMAIN: &str = "domain";
const FOLDER_TYPE: &str = "folderType";
const LAST_UPDATED: &str = "lastUpdated";
const OUTPUT_DIR: &str = "outputDir";
const PROJECT_ID_OR_KEY: &str = "projectIdOrKey";

/// Contents of a settings sidecar; `None` fields are absent from the file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_type: Option<EntityKind>,

    /// ISO 8601 start time of the last successful sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id_or_key: Option<String>,

    /// Keys written by other tools, and known keys whose values could not be read
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    /// Read settings out of a JSON object without rejecting it.
    ///
    /// Numbers are accepted where strings are expected. A value that still
    /// does not fit stays in `extra` under its original key.
    pub fn from_json(mut map: Map<String, Value>) -> Settings {
        let folder_type = match map.remove(FOLDER_TYPE) {
            Some(Value::Null) | None => None,
            Some(raw) => match serde_json::from_value::<EntityKind>(raw.clone()) {
                Ok(kind) => Some(kind),
                Err(_) => {
                    warn!("Ignoring unknown folder type {}", raw);
                    map.insert(FOLDER_TYPE.to_string(), raw);
                    None
                }
            },
        };

        Settings {
            api_key: take_string(&mut map, API_KEY),
            domain: take_string(&mut map, DOMAIN),
            folder_type,
            last_updated: take_string(&mut map, LAST_UPDATED),
            output_dir: take_string(&mut map, OUTPUT_DIR),
            project_id_or_key: take_string(&mut map, PROJECT_ID_OR_KEY),
            extra: map,
        }
    }

    /// Overlay every field set in `partial` onto `self`
    pub fn merge(mut self, partial: Settings) -> Settings {
        fn overlay<T>(current: &mut Option<T>, incoming: Option<T>) {
            if incoming.is_some() {
                *current = incoming;
            }
        }

        overlay(&mut self.api_key, partial.api_key);
        overlay(&mut self.domain, partial.domain);
        overlay(&mut self.folder_type, partial.folder_type);
        overlay(&mut self.last_updated, partial.last_updated);
        overlay(&mut self.output_dir, partial.output_dir);
        overlay(&mut self.project_id_or_key, partial.project_id_or_key);
        self.extra.extend(partial.extra);

        // A known field that is now set replaces any unreadable value kept aside
        let set_keys = [
            (API_KEY, self.api_key.is_some()),
            (DOMAIN, self.domain.is_some()),
            (FOLDER_TYPE, self.folder_type.is_some()),
            (LAST_UPDATED, self.last_updated.is_some()),
            (OUTPUT_DIR, self.output_dir.is_some()),
            (PROJECT_ID_OR_KEY, self.project_id_or_key.is_some()),
        ];
        for (key, is_set) in set_keys {
            if is_set {
                self.extra.remove(key);
            }
        }
        self
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::Null => None,
        Value::String(value) => Some(value),
        Value::Number(value) => Some(value.to_string()),
        other => {
            warn!("Ignoring non-string value for {}: {}", key, other);
            map.insert(key.to_string(), other);
            None
        }
    }
}

/// Location of the sidecar for `dir`
pub fn settings_path(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_FILE_NAME)
}

/// Whether `dir` holds a sidecar file
pub fn has_settings(dir: &Path) -> bool {
    settings_path(dir).is_file()
}

/// Read the sidecar for `dir`; a missing or unparsable file yields empty settings
pub async fn load(dir: &Path) -> Settings {
    let path = settings_path(dir);

    let content = match fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            debug!("No readable settings at {}: {}", path.display(), e);
            return Settings::default();
        }
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Settings::from_json(map),
        Ok(_) => {
            warn!("Ignoring settings file {}: not a JSON object", path.display());
            Settings::default()
        }
        Err(e) => {
            warn!("Ignoring unparsable settings file {}: {}", path.display(), e);
            Settings::default()
        }
    }
}

/// Write `settings` as pretty-printed JSON, creating `dir` if needed
pub async fn save(dir: &Path, settings: &Settings) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let path = settings_path(dir);
    let content = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;

    fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write settings file: {}", path.display()))
}

/// Read-modify-write: merge `partial` over the stored settings and persist
pub async fn merge_and_save(dir: &Path, partial: Settings) -> Result<Settings> {
    let merged = load(dir).await.merge(partial);
    save(dir, &merged).await?;
    Ok(merged)
}

/// Append a timestamped line to the directory's update log.
///
/// Failures are logged and otherwise ignored.
pub async fn append_update_log(dir: &Path, message: &str) {
    let path = dir.join(UPDATE_LOG_FILE_NAME);
    let line = format!("[{}] {}\n", Local::now().format("%Y/%-m/%-d %-H:%M:%S"), message);

    let result: std::io::Result<()> = async {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        warn!("Failed to append to update log {}: {}", path.display(), e);
    }
}
