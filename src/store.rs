//! File-backed label store.
//!
//! Keeps every item's labels in one versioned JSON document so label
//! operations can be driven from a shell without a live tracker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::PROJECT_DIR_NAME;
use crate::testing::LabelStore;

/// Current schema version of the label document.
pub const LABELS_VERSION: u32 = 1;

/// Default filename of the label document.
pub const LABELS_FILENAME: &str = "labels.json";

/// On-disk label document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDocument {
    /// Schema version
    pub version: u32,
    /// Labels per item id
    #[serde(default)]
    pub items: BTreeMap<String, Vec<String>>,
    /// When the document was last written
    pub last_updated: DateTime<Utc>,
}

impl Default for LabelDocument {
    fn default() -> Self {
        Self {
            version: LABELS_VERSION,
            items: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

/// [`LabelStore`] persisted as a JSON file.
///
/// Writes go through a temp file and a rename. A process-local lock
/// serializes read-modify-write cycles; concurrent processes are not
/// coordinated.
#[derive(Debug)]
pub struct JsonLabelStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLabelStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `<project>/.specloop/labels.json`.
    pub fn in_project(project_dir: impl AsRef<Path>) -> Self {
        Self::new(project_dir.as_ref().join(PROJECT_DIR_NAME).join(LABELS_FILENAME))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. A missing file is an empty document.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or has
    /// an unsupported version.
    pub async fn load(&self) -> Result<LabelDocument> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LabelDocument::default())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        let doc: LabelDocument = serde_json::from_str(&content)
            .with_context(|| format!("Label file {} is corrupted", self.path.display()))?;

        if doc.version != LABELS_VERSION {
            bail!(
                "Label file {} has unsupported version {} (expected {})",
                self.path.display(),
                doc.version,
                LABELS_VERSION
            );
        }
        Ok(doc)
    }

    /// Write the document atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, doc: &LabelDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(doc)?;
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Item ids present in the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be loaded.
    pub async fn item_ids(&self) -> Result<Vec<String>> {
        Ok(self.load().await?.items.into_keys().collect())
    }

    async fn update<F>(&self, item_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<String>),
    {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        let entry = doc.items.entry(item_id.to_string()).or_default();
        f(entry);
        doc.last_updated = Utc::now();
        self.save(&doc).await?;
        debug!(item = item_id, path = %self.path.display(), "Label file updated");
        Ok(())
    }
}

#[async_trait]
impl LabelStore for JsonLabelStore {
    async fn get_labels(&self, item_id: &str) -> Result<Vec<String>> {
        Ok(self
            .load()
            .await?
            .items
            .get(item_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_labels(&self, item_id: &str, labels: &[String]) -> Result<()> {
        self.update(item_id, |entry| {
            for label in labels {
                if !entry.contains(label) {
                    entry.push(label.clone());
                }
            }
        })
        .await
    }

    async fn remove_labels(&self, item_id: &str, labels: &[String]) -> Result<()> {
        self.update(item_id, |entry| entry.retain(|l| !labels.contains(l)))
            .await
    }
}
