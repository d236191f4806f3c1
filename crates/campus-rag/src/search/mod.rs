pub mod hybrid;
pub mod retriever;
pub mod text_search;
pub mod user_index;

pub use hybrid::{apply_threshold, hybrid_score, normalize_by_max};
pub use retriever::HybridRetriever;
pub use text_search::TextSearch;
pub use user_index::{FlatL2Index, UserDocumentIndex};
