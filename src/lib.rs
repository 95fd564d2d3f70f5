//! backlog-exporter - Backlog issues and wiki pages as local Markdown
//!
//! Downloads issues (with comments) and wiki pages from the Backlog REST API
//! into Markdown files, and records a small settings sidecar per output
//! directory so later runs only refresh what changed.
//!
//! ## Modules
//!
//! - [`config`]: Tool configuration and API key resolution
//! - [`rate_limit`]: Shared request counter with periodic cool-down
//! - [`pagination`]: Cursor-based collection fetching
//! - [`backlog`]: REST client, wire models and project resolution
//! - [`render`]: Markdown templates and filename derivation
//! - [`settings`]: Per-directory settings sidecar
//! - [`sync`]: Incremental download of one entity kind
//! - [`update`]: Directory walker and batch updater

pub mod backlog;
pub mod config;
pub mod pagination;
pub mod rate_limit;
pub mod render;
pub mod settings;
pub mod sync;
pub mod update;

pub use backlog::{BacklogClient, ProjectRef};
pub use config::Config;
pub use rate_limit::RateLimiter;
pub use settings::Settings;
pub use sync::{EntityKind, ItemOutcome, ItemSynchronizer, SyncReport};
pub use update::{BatchSummary, BatchUpdater, DirectoryOutcome, UpdateOverrides};
