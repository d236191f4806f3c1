use anyhow::{Context, Result};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{self, Schema, Value as TantivyValue, STORED, TEXT};
use tantivy::{doc, Index, IndexReader, ReloadPolicy, TantivyDocument};

/// In-memory BM25 index over chunk texts, addressed by chunk ordinal.
///
/// Built once from an immutable chunk set; there is no incremental update, so
/// the writer is dropped after the initial commit.
pub struct TextSearch {
    index: Index,
    reader: IndexReader,
    ord_field: schema::Field,
    text_field: schema::Field,
    heading_field: schema::Field,
    count: usize,
}

impl TextSearch {
    fn build_schema() -> (Schema, schema::Field, schema::Field, schema::Field) {
        let mut sb = Schema::builder();
        let ord_field = sb.add_u64_field("ord", STORED);
        let text_field = sb.add_text_field("text", TEXT);
        let heading_field = sb.add_text_field("heading", TEXT);
        (sb.build(), ord_field, text_field, heading_field)
    }

    /// Index `(text, heading)` pairs; the position in the slice becomes the ordinal.
    pub fn build(docs: &[(&str, &str)]) -> Result<Self> {
        let (schema, ord_field, text_field, heading_field) = Self::build_schema();
        let index = Index::create_in_ram(schema);

        {
            let mut writer = index
                .writer_with_num_threads(1, 50_000_000)
                .context("Failed to create Tantivy writer")?;
            for (ord, (text, heading)) in docs.iter().enumerate() {
                writer.add_document(doc!(
                    ord_field => ord as u64,
                    text_field => *text,
                    heading_field => *heading,
                ))?;
            }
            writer.commit().context("Tantivy commit failed")?;
        }

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create Tantivy reader")?;

        Ok(Self {
            index,
            reader,
            ord_field,
            text_field,
            heading_field,
            count: docs.len(),
        })
    }

    /// Top `k` ordinals with raw BM25 scores, best first.
    ///
    /// Query syntax characters are stripped so free-form questions ("What's
    /// the deadline?") never fail to parse; terms are OR-ed.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<(usize, f32)>> {
        let sanitized: String = query
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        if sanitized.trim().is_empty() || k == 0 || self.count == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser =
            QueryParser::for_index(&self.index, vec![self.text_field, self.heading_field]);
        let parsed_query = query_parser
            .parse_query(&sanitized)
            .context("Failed to parse keyword query")?;

        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(k))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc = searcher.doc::<TantivyDocument>(doc_address)?;
            if let Some(ord) = doc.get_first(self.ord_field).and_then(|v| v.as_u64()) {
                results.push((ord as usize, score));
            }
        }
        Ok(results)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
