//! Story cache collaborator
//!
//! Keyed by story id, holding fully retrieved stories only. The
//! retriever consults the cache before touching the ledger and writes to
//! it exclusively on complete, verified retrieval. Persistent storage
//! mechanics live behind the trait; [`MemoryCache`] is the reference
//! implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::manifest::ManifestRoot;

/// A completed retrieval: the manifest plus the reconstructed text.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedStory {
    pub manifest: ManifestRoot,
    pub content: String,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub total_stories: usize,
    pub total_size_bytes: usize,
}

#[async_trait]
pub trait StoryCache: Send + Sync {
    /// Look up a fully cached story.
    async fn get(&self, story_id: &str) -> Option<CachedStory>;

    /// Store a completed retrieval.
    async fn put(&self, story_id: &str, manifest: ManifestRoot, content: String);

    async fn contains(&self, story_id: &str) -> bool;

    async fn stats(&self) -> CacheStats;
}

/// In-memory [`StoryCache`] backed by a `RwLock<HashMap>`.
pub struct MemoryCache {
    stories: RwLock<HashMap<String, CachedStory>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            stories: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoryCache for MemoryCache {
    async fn get(&self, story_id: &str) -> Option<CachedStory> {
        self.stories.read().unwrap().get(story_id).cloned()
    }

    async fn put(&self, story_id: &str, manifest: ManifestRoot, content: String) {
        debug!(story_id, size = content.len(), "caching completed story");
        self.stories
            .write()
            .unwrap()
            .insert(story_id.to_string(), CachedStory { manifest, content });
    }

    async fn contains(&self, story_id: &str) -> bool {
        self.stories.read().unwrap().contains_key(story_id)
    }

    async fn stats(&self) -> CacheStats {
        let stories = self.stories.read().unwrap();
        CacheStats {
            total_stories: stories.len(),
            total_size_bytes: stories.values().map(|s| s.content.len()).sum(),
        }
    }
}
