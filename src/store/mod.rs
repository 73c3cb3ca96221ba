//! Storage gateway for the document database.
//!
//! The [`Store`] trait carries every operation the harvesting and
//! ranking pipeline depends on, so the engine and workers run
//! unchanged against MongoDB in production and the in-memory backend
//! in tests. Ranking pipelines cross this boundary as
//! [`Stage`](crate::pipeline::Stage) values, not query strings.

pub mod memory;
pub mod mongo;

use anyhow::Result;
use async_trait::async_trait;
use bson::Document;
use futures::stream::BoxStream;

use crate::pipeline::Stage;

pub const OWNERS: &str = "owners";
pub const REPOSITORIES: &str = "repositories";
pub const RANKS: &str = "ranks";

/// A stream of documents read from a collection. Dropping it releases
/// the underlying cursor on every exit path.
pub type DocStream = BoxStream<'static, Result<Document>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertReport {
    pub modified: u64,
    pub upserted: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// For each `(pk, doc)`: `$set` the whole document if the key
    /// exists, insert it otherwise. Never duplicates a key.
    async fn bulk_upsert(&self, coll: &str, docs: Vec<(String, Document)>)
        -> Result<UpsertReport>;

    /// Append-only batch insert.
    async fn bulk_insert(&self, coll: &str, docs: Vec<Document>) -> Result<()>;

    /// Partial `$set` update of one document by primary key.
    async fn update_one(&self, coll: &str, pk: &str, patch: Document) -> Result<()>;

    /// Stream every document in natural order.
    async fn find_all(&self, coll: &str) -> Result<DocStream>;

    /// The most recently stored document, if any.
    async fn find_last(&self, coll: &str) -> Result<Option<Document>>;

    /// Execute a ranking pipeline and stream its result in order.
    async fn aggregate(&self, coll: &str, stages: &[Stage]) -> Result<DocStream>;

    /// Remove matching documents, returning how many were removed.
    async fn delete_many(&self, coll: &str, filter: Document) -> Result<u64>;

    /// Idempotently ensure single-key ascending indexes.
    async fn create_indexes(&self, coll: &str, keys: &[&str]) -> Result<()>;
}
