//! Source chunks and the chunk-store contract
//!
//! A chunk is an immutable, addressable excerpt of source text. The
//! verifier's correctness depends on chunk ids never dangling, so the store
//! contract guarantees stable ids for the lifetime of a project and the
//! reference implementation is append-only.

use crate::ChunkId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

// ============================================================================
// Chunk
// ============================================================================

/// Where a chunk came from in the source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceLocator {
    /// Page + character offset in a PDF
    Pdf { page: u32, offset: usize },
    /// URL + optional CSS selector for a scraped page
    Url { url: String, selector: Option<String> },
}

/// An immutable source passage with a stable identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: String,
    pub text: String,
    pub source_locator: SourceLocator,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, doc_id: &str, text: &str, locator: SourceLocator) -> Self {
        Self {
            id: id.into(),
            doc_id: doc_id.to_string(),
            text: text.to_string(),
            source_locator: locator,
        }
    }
}

/// Derive a stable chunk id from its locator and position.
///
/// PDF chunks follow the `pdf-p<page>-c<index>` convention; URL chunks embed
/// a short digest of the URL so re-scraping the same page reproduces the
/// same ids (idempotent re-fetch).
pub fn derive_chunk_id(locator: &SourceLocator, index: usize) -> ChunkId {
    match locator {
        SourceLocator::Pdf { page, .. } => format!("pdf-p{page}-c{index}"),
        SourceLocator::Url { url, .. } => {
            let digest = Sha256::digest(url.as_bytes());
            format!("url-{:02x}{:02x}{:02x}{:02x}-c{index}", digest[0], digest[1], digest[2], digest[3])
        }
    }
}

// ============================================================================
// Chunk Store Contract
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChunkStoreError {
    #[error("chunk id {0:?} already exists with different content")]
    ConflictingId(ChunkId),
}

/// Read contract the verifier and generators depend on.
///
/// Implementations must keep ids stable for the lifetime of the project;
/// chunk text is never mutated after insertion.
pub trait ChunkStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Chunk>;

    fn exists(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All chunks for one document, in insertion order
    fn chunks_for(&self, doc_id: &str) -> Vec<Chunk>;

    /// Rank one document's chunks against a set of retrieval queries.
    ///
    /// The default is keyword overlap — it stands in for the vector store
    /// behind the same contract. Generators only need "some relevant
    /// chunks, ranked"; ranking quality is out of scope and real
    /// deployments override this with similarity search.
    fn retrieve(&self, doc_id: &str, queries: &[&str], limit: usize) -> Vec<Chunk> {
        let mut terms: HashSet<String> = HashSet::new();
        for q in queries {
            terms.extend(keyword_terms(q));
        }

        let mut scored: Vec<(usize, Chunk)> = self
            .chunks_for(doc_id)
            .into_iter()
            .map(|c| {
                let chunk_terms = keyword_terms(&c.text);
                let score = chunk_terms.iter().filter(|t| terms.contains(*t)).count();
                (score, c)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(limit);
        scored.into_iter().map(|(_, c)| c).collect()
    }
}

// ============================================================================
// In-Memory Reference Store
// ============================================================================

/// Append-only in-memory store. Safe for concurrent readers; inserting the
/// same chunk twice is a no-op (idempotent re-fetch), inserting a different
/// chunk under an existing id is an error.
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: DashMap<ChunkId, Chunk>,
    // Insertion order per doc, so extraction sees chunks as the document reads
    order: DashMap<String, Vec<ChunkId>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chunk: Chunk) -> Result<(), ChunkStoreError> {
        if let Some(existing) = self.chunks.get(&chunk.id) {
            if *existing == chunk {
                return Ok(());
            }
            return Err(ChunkStoreError::ConflictingId(chunk.id.clone()));
        }
        self.order
            .entry(chunk.doc_id.clone())
            .or_default()
            .push(chunk.id.clone());
        self.chunks.insert(chunk.id.clone(), chunk);
        Ok(())
    }

    pub fn insert_all(&self, chunks: Vec<Chunk>) -> Result<usize, ChunkStoreError> {
        let mut added = 0;
        for chunk in chunks {
            self.insert(chunk)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn get(&self, id: &str) -> Option<Chunk> {
        self.chunks.get(id).map(|c| c.clone())
    }

    fn exists(&self, id: &str) -> bool {
        self.chunks.contains_key(id)
    }

    fn chunks_for(&self, doc_id: &str) -> Vec<Chunk> {
        let Some(ids) = self.order.get(doc_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.chunks.get(id).map(|c| c.clone()))
            .collect()
    }
}

/// Lowercased content words of a text, stopwords removed
pub fn keyword_terms(text: &str) -> Vec<String> {
    let stopwords: HashSet<&str> = [
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has",
        "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "must",
        "shall", "can", "what", "when", "where", "which", "who", "whom", "whose", "why", "how",
        "this", "that", "these", "those", "it", "its", "and", "or", "but", "if", "then", "than",
        "so", "as", "for", "with", "about", "to", "from", "in", "on", "at", "by", "of", "up",
        "out", "into", "onto", "not", "no",
    ]
    .into_iter()
    .collect();

    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !stopwords.contains(w))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_chunk(id: &str, text: &str) -> Chunk {
        Chunk::new(id, "doc-1", text, SourceLocator::Pdf { page: 1, offset: 0 })
    }

    #[test]
    fn insert_is_idempotent_for_identical_chunks() {
        let store = InMemoryChunkStore::new();
        let chunk = pdf_chunk("pdf-p1-c0", "Operating range -40 to 85 C");
        store.insert(chunk.clone()).unwrap();
        store.insert(chunk).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn insert_rejects_conflicting_id() {
        let store = InMemoryChunkStore::new();
        store.insert(pdf_chunk("pdf-p1-c0", "first text")).unwrap();
        let err = store.insert(pdf_chunk("pdf-p1-c0", "different text"));
        assert!(matches!(err, Err(ChunkStoreError::ConflictingId(_))));
    }

    #[test]
    fn chunks_for_preserves_insertion_order() {
        let store = InMemoryChunkStore::new();
        store.insert(pdf_chunk("pdf-p1-c0", "alpha")).unwrap();
        store.insert(pdf_chunk("pdf-p1-c1", "beta")).unwrap();
        store.insert(pdf_chunk("pdf-p2-c0", "gamma")).unwrap();

        let ids: Vec<_> = store.chunks_for("doc-1").into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["pdf-p1-c0", "pdf-p1-c1", "pdf-p2-c0"]);
    }

    #[test]
    fn retrieve_ranks_by_term_overlap() {
        let store = InMemoryChunkStore::new();
        store
            .insert(pdf_chunk("pdf-p1-c0", "accuracy 0.5 percent full scale"))
            .unwrap();
        store
            .insert(pdf_chunk("pdf-p1-c1", "warranty and support contact details"))
            .unwrap();

        let hits = store.retrieve("doc-1", &["accuracy specifications"], 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "pdf-p1-c0");
    }

    #[test]
    fn derived_ids_are_stable() {
        let loc = SourceLocator::Url {
            url: "https://example.com/product".to_string(),
            selector: None,
        };
        assert_eq!(derive_chunk_id(&loc, 2), derive_chunk_id(&loc, 2));
        assert_eq!(
            derive_chunk_id(&SourceLocator::Pdf { page: 3, offset: 10 }, 2),
            "pdf-p3-c2"
        );
    }
}
