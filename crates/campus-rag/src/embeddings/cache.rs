use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use super::EmbeddingModel;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Mode {
    Query,
    Document,
}

/// LRU cache in front of a deterministic embedding model. Knowledge-base
/// candidates recur across questions, so re-embedding them for diversity
/// selection is mostly served from here.
pub struct CachedEmbeddings<E> {
    inner: E,
    cache: Mutex<lru::LruCache<(Mode, String), Vec<f32>>>,
}

impl<E: EmbeddingModel> CachedEmbeddings<E> {
    pub fn new(inner: E, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(lru::LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, mode: Mode, text: &str) -> Option<Vec<f32>> {
        self.cache.lock().get(&(mode, text.to_string())).cloned()
    }

    fn store(&self, mode: Mode, text: &str, vector: &[f32]) {
        self.cache.lock().put((mode, text.to_string()), vector.to_vec());
    }
}

#[async_trait]
impl<E: EmbeddingModel> EmbeddingModel for CachedEmbeddings<E> {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.lookup(Mode::Query, text) {
            return Ok(hit);
        }
        let vector = self.inner.embed_query(text).await?;
        self.store(Mode::Query, text, &vector);
        Ok(vector)
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.lookup(Mode::Document, text) {
            return Ok(hit);
        }
        let vector = self.inner.embed_document(text).await?;
        self.store(Mode::Document, text, &vector);
        Ok(vector)
    }

    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> =
            texts.iter().map(|t| self.lookup(Mode::Document, t)).collect();
        let missing: Vec<&str> = texts
            .iter()
            .zip(&out)
            .filter(|(_, hit)| hit.is_none())
            .map(|(t, _)| *t)
            .collect();

        if !missing.is_empty() {
            let fresh = self.inner.embed_documents(&missing).await?;
            let mut fresh = fresh.into_iter();
            for (slot, text) in out.iter_mut().zip(texts) {
                if slot.is_none() {
                    if let Some(vector) = fresh.next() {
                        self.store(Mode::Document, text, &vector);
                        *slot = Some(vector);
                    }
                }
            }
        }

        out.into_iter()
            .map(|v| v.ok_or_else(|| anyhow::anyhow!("Embedding model returned too few vectors")))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
