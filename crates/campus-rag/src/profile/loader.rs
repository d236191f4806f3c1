use futures::stream::{self, StreamExt};
use std::sync::Arc;

use super::ProfileStore;
use crate::processing::TextExtractor;
use crate::types::{UserDocument, UserDocumentRef};

/// Downloads a user's stored documents and extracts their text.
///
/// Individual failures (download, conversion, unsupported type) drop that
/// document with a warning; the rest are still returned.
pub struct UserDocumentLoader {
    store: Arc<dyn ProfileStore>,
    extractor: TextExtractor,
    concurrency: usize,
}

impl UserDocumentLoader {
    pub fn new(store: Arc<dyn ProfileStore>, extractor: TextExtractor, concurrency: usize) -> Self {
        Self {
            store,
            extractor,
            concurrency: concurrency.max(1),
        }
    }

    /// Text of every readable document, ordered by type then file name.
    pub async fn load(&self, user_id: &str) -> Vec<UserDocument> {
        let refs = match self.store.get_documents(user_id).await {
            Ok(refs) => refs,
            Err(e) => {
                tracing::warn!(error = %e, "Listing user documents failed, continuing without them");
                return Vec::new();
            }
        };
        if refs.is_empty() {
            return Vec::new();
        }
        let listed = refs.len();

        let mut documents: Vec<UserDocument> = stream::iter(refs)
            .map(|doc| self.load_one(doc))
            .buffer_unordered(self.concurrency)
            .filter_map(|loaded| async move { loaded })
            .collect()
            .await;

        documents.sort_by(|a, b| a.doc_type.cmp(&b.doc_type).then_with(|| a.filename.cmp(&b.filename)));
        tracing::info!(listed = listed, loaded = documents.len(), "Loaded user documents");
        documents
    }

    async fn load_one(&self, doc: UserDocumentRef) -> Option<UserDocument> {
        let bytes = match self.store.fetch_document(&doc).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %doc.storage_path, error = %e, "Document download failed, skipping");
                return None;
            }
        };

        let filename = doc.filename().to_string();
        let extractor = self.extractor.clone();
        let mime_type = doc.mime_type.clone();
        let name = filename.clone();
        // PDF extraction is CPU-bound
        let text = match tokio::task::spawn_blocking(move || extractor.extract(&bytes, &name, &mime_type)).await {
            Ok(text) => text?,
            Err(e) => {
                tracing::warn!(path = %doc.storage_path, error = %e, "Document conversion panicked, skipping");
                return None;
            }
        };

        Some(UserDocument {
            doc_type: doc.doc_type,
            filename,
            text,
        })
    }
}
