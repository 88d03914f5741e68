//! Skill Memory: semantically indexed storage for verified solutions.
//!
//! Storage is upsert-by-name over the vector store, with the embedding
//! computed from `docstring ⊕ code`. Retrieval is two-stage: cosine
//! candidates from the store, then an optional model-driven re-rank when
//! the candidate pool is larger than the request.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::embeddings::Embedder;
use crate::rerank::ReRanker;
use crate::types::Skill;
use crate::vector_store::{StoredDocument, VectorStore};

/// Minimum candidate pool fetched for re-rank headroom.
const RERANK_POOL_MIN: usize = 10;

/// Long-term memory boundary used by the Actor and the orchestrator.
#[async_trait]
pub trait SkillMemory: Send + Sync {
    /// Upsert by `skill.name`; storing the same name twice replaces it.
    async fn store_skill(&self, skill: Skill) -> Result<()>;

    /// Up to `limit` skills relevant to `query`, best first.
    async fn retrieve_relevant_skills(&self, query: &str, limit: usize) -> Result<Vec<Skill>>;
}

/// Production memory backed by the persistent vector store.
pub struct VectorSkillMemory {
    store: Mutex<VectorStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<ReRanker>,
    env_tag: String,
}

impl VectorSkillMemory {
    pub fn new(
        store: VectorStore,
        embedder: Arc<dyn Embedder>,
        reranker: Option<ReRanker>,
        env_tag: impl Into<String>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            embedder,
            reranker,
            env_tag: env_tag.into(),
        }
    }

    fn skill_from_document(doc: &StoredDocument) -> Skill {
        let tags = doc
            .metadata
            .get("tags")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        Skill {
            name: doc
                .metadata
                .get("name")
                .cloned()
                .unwrap_or_else(|| doc.id.clone()),
            code: doc.document.clone(),
            docstring: doc.metadata.get("docstring").cloned().unwrap_or_default(),
            tags,
            embedding: None,
        }
    }
}

#[async_trait]
impl SkillMemory for VectorSkillMemory {
    async fn store_skill(&self, skill: Skill) -> Result<()> {
        info!(name = %skill.name, "learning new skill");

        // Docstring captures intent, code captures implementation; embed both.
        let text_to_embed = format!("{}\n{}", skill.docstring, skill.code);
        let vector = self.embedder.embed(&text_to_embed).await?;

        let mut metadata = HashMap::new();
        metadata.insert("name".to_string(), skill.name.clone());
        metadata.insert("docstring".to_string(), skill.docstring.clone());
        metadata.insert("tags".to_string(), serde_json::to_string(&skill.tags)?);
        metadata.insert("env".to_string(), self.env_tag.clone());

        self.store.lock().await.upsert(StoredDocument {
            id: skill.name,
            vector,
            document: skill.code,
            metadata,
        })
    }

    async fn retrieve_relevant_skills(&self, query: &str, limit: usize) -> Result<Vec<Skill>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        {
            let store = self.store.lock().await;
            if store.is_empty() {
                debug!("skill store is empty — nothing to retrieve");
                return Ok(Vec::new());
            }
        }

        let query_vector = self.embedder.embed(query).await?;
        let pool = limit.max(RERANK_POOL_MIN);
        let candidates: Vec<Skill> = {
            let store = self.store.lock().await;
            store
                .query(&query_vector, pool)
                .iter()
                .map(|hit| Self::skill_from_document(&hit.document))
                .collect()
        };

        let skills = match (&self.reranker, candidates.len() > limit) {
            (Some(reranker), true) => reranker.rerank(query, candidates, limit).await,
            _ => candidates.into_iter().take(limit).collect(),
        };

        let preview: String = query.chars().take(50).collect();
        info!(count = skills.len(), query = %preview, "retrieved skills");
        Ok(skills)
    }
}
