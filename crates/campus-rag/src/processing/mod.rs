pub mod chunker;
pub mod parser;

pub use chunker::{ProgramChunker, ProgramRecord, TextSplitter};
pub use parser::{DocumentConverter, DocumentFormat, PdfTextConverter, TextExtractor};
