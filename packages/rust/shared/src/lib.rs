//! Shared types, error model, and configuration for redline.
//!
//! This crate is the foundation depended on by all other redline crates.
//! It provides:
//! - [`RedlineError`] — the unified error type
//! - Domain types ([`Document`], [`Span`], [`CorpusEntry`], [`Corpus`],
//!   [`ExecutionLogEntry`], [`RunId`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BridgeConfig, DOCUMENTS_PATH_ENV, DocumentsConfig, OutputConfig, RetryConfig,
    StrikeConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{RedlineError, Result};
pub use types::{
    Corpus, CorpusEntry, Document, EventKind, ExecutionLogEntry, RunId, SYSTEM_STAGE, Span,
};
