//! Applicant profile and uploaded-document access.
//!
//! The profile/document store is an external collaborator reached through
//! [`ProfileStore`]. [`UserDocumentLoader`] turns the stored files into text.

pub mod loader;
pub mod rest_store;

pub use loader::UserDocumentLoader;
pub use rest_store::RestProfileStore;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::types::{UserDocumentRef, UserProfile};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `None` when the user has no profile yet.
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;

    async fn get_documents(&self, user_id: &str) -> Result<Vec<UserDocumentRef>>;

    /// Raw bytes of one stored document.
    async fn fetch_document(&self, document: &UserDocumentRef) -> Result<Bytes>;
}
