//! Persistent vector store: upsert by id, nearest-neighbor by cosine.
//!
//! Brute-force cosine over a single JSON-backed collection. At skill-store
//! scale (hundreds to low thousands of documents) a linear scan is fast
//! enough and avoids heavy native ANN dependencies. Writes are atomic from
//! the caller's perspective: serialize to a temp file, then rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One stored `(id, vector, document, metadata)` tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub vector: Vec<f32>,
    pub document: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A query hit with its cosine similarity score.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub document: StoredDocument,
    pub score: f32,
}

/// A durable, single-collection vector store.
#[derive(Debug)]
pub struct VectorStore {
    path: PathBuf,
    documents: Vec<StoredDocument>,
}

impl VectorStore {
    /// Open the store at `path`. A missing file yields an empty store; a
    /// corrupt one is logged and reinitialized empty rather than aborting
    /// the process.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let documents = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt vector store — reinitializing");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self { path, documents }
    }

    /// Insert or replace the document with the same id, then persist.
    pub fn upsert(&mut self, document: StoredDocument) -> Result<()> {
        match self.documents.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => self.documents.push(document),
        }
        self.save()
    }

    /// Up to `k` documents ranked by descending cosine similarity.
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<QueryMatch> {
        let mut scored: Vec<QueryMatch> = self
            .documents
            .iter()
            .map(|doc| QueryMatch {
                score: cosine_similarity(vector, &doc.vector),
                document: doc.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Write to a temp file and rename into place.
    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&self.documents)?;
        std::fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }
}

/// Cosine similarity; zero for mismatched lengths or zero-norm vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
