//! Ranking engine: executes a family of pipelines against the entity
//! collections and materializes one rank snapshot per invocation.
//!
//! All rows of one invocation share a single `created_at`. Once every
//! pipeline has completed, the snapshot timestamp is sealed into the
//! persisted record and older rows of the same kinds are pruned, so
//! readers switch snapshots atomically per entity kind.

use anyhow::{Context, Result};
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use futures::TryStreamExt;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::TimestampStore;
use crate::models::{tag, Rank};
use crate::pipeline::RankPipeline;
use crate::store::{Store, RANKS};

/// Rank rows are flushed to the store in chunks of this size.
const INSERT_CHUNK: usize = 500;

pub struct Engine {
    store: Arc<dyn Store>,
    timestamps: Arc<TimestampStore>,
    /// Pipelines in flight at once.
    fan_out: usize,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, timestamps: Arc<TimestampStore>, fan_out: usize) -> Self {
        Self {
            store,
            timestamps,
            fan_out,
        }
    }

    /// Execute every pipeline of one entity kind's family, then seal
    /// the snapshot under `keys` and prune superseded rows carrying
    /// any of `kinds`' type tags.
    pub async fn run(
        &self,
        coll: &'static str,
        pipelines: Vec<RankPipeline>,
        keys: &[&str],
        kinds: &[&str],
    ) -> Result<()> {
        // bson datetimes carry millisecond precision; truncate so the
        // sealed timestamp stays comparable after a round-trip
        let snapshot_at = truncate_to_millis(Utc::now());
        let total = pipelines.len();

        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let results: Vec<Result<usize>> = stream::iter(pipelines.into_iter().map(|pipeline| {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("Ranking semaphore closed")?;
                push_ranks(&*store, coll, &pipeline, snapshot_at).await
            }
        }))
        .buffer_unordered(8)
        .collect()
        .await;

        let mut rows = 0usize;
        let mut failed = 0usize;
        for result in results {
            match result {
                Ok(written) => rows += written,
                Err(e) => {
                    failed += 1;
                    eprintln!("\x1b[33m[rank]\x1b[0m \x1b[31mPipeline failed: {:#}\x1b[0m", e);
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{} of {} rank pipelines failed", failed, total);
        }

        for key in keys {
            self.timestamps
                .seal(key, snapshot_at)
                .with_context(|| format!("Failed to seal {}", key))?;
        }

        let kind_tags: Vec<String> = kinds.iter().map(|kind| tag("type", kind)).collect();
        let removed = self
            .store
            .delete_many(
                RANKS,
                doc! {
                    "tags": {"$in": kind_tags},
                    "created_at": {"$lt": Bson::DateTime(snapshot_at.into())},
                },
            )
            .await
            .context("Failed to prune superseded ranks")?;

        eprintln!(
            "\x1b[33m[rank]\x1b[0m Executed {} pipelines, wrote {} rows, pruned {}",
            total, rows, removed
        );
        Ok(())
    }
}

/// Stream one pipeline's cursor in order, emitting 1-based rank rows
/// and flushing them in chunks. Returns how many rows were written.
async fn push_ranks(
    store: &dyn Store,
    coll: &str,
    pipeline: &RankPipeline,
    snapshot_at: DateTime<Utc>,
) -> Result<usize> {
    let rank_count = leaderboard_len(store, coll, pipeline).await?;
    if rank_count == 0 {
        return Ok(0);
    }

    let mut cursor = store.aggregate(coll, &pipeline.stages).await?;
    let mut batch: Vec<Document> = Vec::with_capacity(INSERT_CHUNK);
    let mut position = 0i64;

    while let Some(row) = cursor.try_next().await? {
        let item_count = count_field(&row, "total_count");
        // The cursor is sorted descending, so the first non-positive
        // total marks the end of the leaderboard
        if item_count <= 0 {
            break;
        }
        position += 1;
        let rank = Rank {
            name: id_string(&row),
            image_url: row.get_str("image_url").unwrap_or_default().to_string(),
            rank: position,
            rank_count,
            item_count,
            tags: pipeline.tags.clone(),
            created_at: snapshot_at,
        };
        batch.push(bson::to_document(&rank).context("Rank row failed to serialize")?);
        if batch.len() >= INSERT_CHUNK {
            store.bulk_insert(RANKS, std::mem::take(&mut batch)).await?;
        }
    }
    if !batch.is_empty() {
        store.bulk_insert(RANKS, batch).await?;
    }
    Ok(position as usize)
}

/// The leaderboard's logical length: entities with a positive total,
/// fixed before any row is written so every row agrees on it.
async fn leaderboard_len(store: &dyn Store, coll: &str, pipeline: &RankPipeline) -> Result<i64> {
    let mut cursor = store.aggregate(coll, &pipeline.count_stages()).await?;
    let mut count = 0;
    while let Some(doc) = cursor.try_next().await? {
        count = count_field(&doc, "count");
    }
    Ok(count)
}

fn count_field(doc: &Document, key: &str) -> i64 {
    match doc.get(key) {
        Some(Bson::Int32(n)) => *n as i64,
        Some(Bson::Int64(n)) => *n,
        Some(Bson::Double(n)) => *n as i64,
        _ => 0,
    }
}

fn id_string(doc: &Document) -> String {
    match doc.get("_id") {
        Some(Bson::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TIMESTAMP_OWNER_RANKS, TIMESTAMP_ORGANIZATION_RANKS};
    use crate::models::{TYPE_ORGANIZATION, TYPE_USER};
    use crate::pipeline::owners_by_field;
    use crate::store::memory::MemoryStore;
    use crate::store::OWNERS;

    fn owner(login: &str, followers: i64) -> (String, Document) {
        (
            login.to_string(),
            doc! {
                "_id": login,
                "avatar_url": format!("https://avatars.example/{}", login),
                "followers": {"total_count": followers},
                "tags": ["type:user"],
            },
        )
    }

    async fn seeded_store() -> Arc<dyn Store> {
        let store = MemoryStore::new();
        store
            .bulk_upsert(
                OWNERS,
                vec![owner("A", 10), owner("B", 30), owner("C", 20)],
            )
            .await
            .unwrap();
        Arc::new(store)
    }

    async fn all_ranks(store: &Arc<dyn Store>) -> Vec<Rank> {
        store
            .find_all(RANKS)
            .await
            .unwrap()
            .try_collect::<Vec<Document>>()
            .await
            .unwrap()
            .into_iter()
            .map(|doc| bson::from_document(doc).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_ranking_correctness() {
        let store = seeded_store().await;
        let timestamps = Arc::new(TimestampStore::ephemeral());
        let engine = Engine::new(Arc::clone(&store), Arc::clone(&timestamps), 2);

        engine
            .run(
                OWNERS,
                vec![owners_by_field(TYPE_USER, "followers")],
                &[TIMESTAMP_OWNER_RANKS],
                &[TYPE_USER],
            )
            .await
            .unwrap();

        let mut ranks = all_ranks(&store).await;
        ranks.sort_by_key(|r| r.rank);
        assert_eq!(ranks.len(), 3);

        let names: Vec<&str> = ranks.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C", "A"]);
        let positions: Vec<i64> = ranks.iter().map(|r| r.rank).collect();
        assert_eq!(positions, vec![1, 2, 3]);

        // One snapshot timestamp, shared by every row
        let sealed = timestamps.get(TIMESTAMP_OWNER_RANKS);
        assert!(ranks.iter().all(|r| r.created_at == sealed));
        assert!(ranks.iter().all(|r| r.rank_count == 3));
        assert!(ranks
            .iter()
            .all(|r| r.tags == vec!["type:user", "field:followers"]));
    }

    #[tokio::test]
    async fn test_descending_totals_and_density() {
        let store = seeded_store().await;
        let timestamps = Arc::new(TimestampStore::ephemeral());
        let engine = Engine::new(Arc::clone(&store), timestamps, 2);

        engine
            .run(
                OWNERS,
                vec![owners_by_field(TYPE_USER, "followers")],
                &[TIMESTAMP_OWNER_RANKS],
                &[TYPE_USER],
            )
            .await
            .unwrap();

        let mut ranks = all_ranks(&store).await;
        ranks.sort_by_key(|r| r.rank);
        // Dense 1..N and monotonic item counts
        for (i, row) in ranks.iter().enumerate() {
            assert_eq!(row.rank, i as i64 + 1);
            assert!(row.item_count > 0);
            if i > 0 {
                assert!(ranks[i - 1].item_count >= row.item_count);
            }
        }
    }

    #[tokio::test]
    async fn test_zero_total_rows_are_not_written() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store
            .bulk_upsert(OWNERS, vec![owner("A", 5), owner("Z", 0)])
            .await
            .unwrap();
        let engine = Engine::new(Arc::clone(&store), Arc::new(TimestampStore::ephemeral()), 2);

        engine
            .run(
                OWNERS,
                vec![owners_by_field(TYPE_USER, "followers")],
                &[TIMESTAMP_OWNER_RANKS],
                &[TYPE_USER],
            )
            .await
            .unwrap();

        let ranks = all_ranks(&store).await;
        assert_eq!(ranks.len(), 1);
        assert_eq!(ranks[0].name, "A");
        assert_eq!(ranks[0].rank_count, 1);
    }

    #[tokio::test]
    async fn test_empty_pipeline_writes_nothing() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let engine = Engine::new(Arc::clone(&store), Arc::new(TimestampStore::ephemeral()), 2);

        engine
            .run(
                OWNERS,
                vec![owners_by_field(TYPE_ORGANIZATION, "repositories.stargazers")],
                &[TIMESTAMP_ORGANIZATION_RANKS],
                &[TYPE_ORGANIZATION],
            )
            .await
            .unwrap();

        assert!(all_ranks(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_supersession_prunes_older_snapshot() {
        let store = seeded_store().await;
        let timestamps = Arc::new(TimestampStore::ephemeral());
        let engine = Engine::new(Arc::clone(&store), Arc::clone(&timestamps), 2);

        engine
            .run(
                OWNERS,
                vec![owners_by_field(TYPE_USER, "followers")],
                &[TIMESTAMP_OWNER_RANKS],
                &[TYPE_USER],
            )
            .await
            .unwrap();
        let first = timestamps.get(TIMESTAMP_OWNER_RANKS);

        // Guarantee a strictly newer snapshot instant
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        engine
            .run(
                OWNERS,
                vec![owners_by_field(TYPE_USER, "followers")],
                &[TIMESTAMP_OWNER_RANKS],
                &[TYPE_USER],
            )
            .await
            .unwrap();
        let second = timestamps.get(TIMESTAMP_OWNER_RANKS);
        assert!(second > first);

        let ranks = all_ranks(&store).await;
        assert_eq!(ranks.len(), 3);
        assert!(ranks.iter().all(|r| r.created_at == second));
    }
}
