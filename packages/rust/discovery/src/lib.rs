//! Source document discovery.
//!
//! Lists the documents a run will process: every regular file in the
//! configured root directory whose extension matches (case-insensitively).
//! A missing or unreadable root is not an error for callers of [`DocumentStore::list`];
//! it yields an empty listing, and the orchestrator decides what an empty run means.

use std::path::{Path, PathBuf};

use redline_shared::{AppConfig, Document, RedlineError, Result};
use tracing::{debug, info, instrument, warn};

// ---------------------------------------------------------------------------
// Store options
// ---------------------------------------------------------------------------

/// Runtime discovery configuration, derived from the `[documents]` section.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Directory scanned for documents.
    pub root: PathBuf,
    /// Accepted extension without the leading dot.
    pub extension: String,
    /// Create `root` on first use when it does not exist.
    pub create_if_missing: bool,
    /// Sort by file name instead of keeping filesystem order.
    pub sort: bool,
}

impl StoreOptions {
    /// Options for `root` with the default `.pdf` filter and no side effects.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "pdf".into(),
            create_if_missing: false,
            sort: false,
        }
    }
}

impl From<&AppConfig> for StoreOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            root: PathBuf::from(&config.documents.root),
            extension: config.documents.extension.trim_start_matches('.').to_string(),
            create_if_missing: config.documents.create_if_missing,
            sort: config.documents.sort,
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

/// Locates source documents in a single root directory.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    opts: StoreOptions,
}

impl DocumentStore {
    pub fn new(opts: StoreOptions) -> Self {
        Self { opts }
    }

    pub fn root(&self) -> &Path {
        &self.opts.root
    }

    /// Create the root directory if configured to. A no-op when it exists.
    pub fn ensure_root(&self) -> Result<()> {
        if !self.opts.create_if_missing || self.opts.root.is_dir() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.opts.root)
            .map_err(|e| RedlineError::io(&self.opts.root, e))?;
        info!(root = %self.opts.root.display(), "created documents directory");
        Ok(())
    }

    /// List matching documents, failing with `StorageUnavailable` when the
    /// root cannot be read.
    #[instrument(skip_all, fields(root = %self.opts.root.display()))]
    pub fn try_list(&self) -> Result<Vec<Document>> {
        let root = &self.opts.root;
        let unavailable = |reason: String| RedlineError::StorageUnavailable {
            path: root.clone(),
            reason,
        };

        if !root.is_dir() {
            return Err(unavailable("directory does not exist".into()));
        }

        let entries = std::fs::read_dir(root).map_err(|e| unavailable(e.to_string()))?;

        let mut documents = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| unavailable(e.to_string()))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(String::from) else {
                debug!(path = ?entry.path(), "skipping non UTF-8 file name");
                continue;
            };

            if has_extension(&name, &self.opts.extension) {
                documents.push(Document::new(name, entry.path()));
            }
        }

        if self.opts.sort {
            documents.sort_by(|a, b| a.name.cmp(&b.name));
        }

        debug!(count = documents.len(), "documents listed");
        Ok(documents)
    }

    /// List matching documents. An unavailable root yields an empty list.
    pub fn list(&self) -> Vec<Document> {
        if let Err(e) = self.ensure_root() {
            warn!(error = %e, "could not create documents directory");
        }

        match self.try_list() {
            Ok(documents) => documents,
            Err(e) => {
                warn!(error = %e, "document listing unavailable");
                Vec::new()
            }
        }
    }
}

/// Case-insensitive extension check (`"Report.PDF"` matches `"pdf"`).
fn has_extension(name: &str, extension: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && ext.eq_ignore_ascii_case(extension),
        None => false,
    }
}
