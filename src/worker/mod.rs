//! Worker supervisors: one per entity kind, each owning its weekly
//! Collect → Rank cycle, plus the traveller/paginator plumbing they
//! share.

pub mod owner;
pub mod repository;

use anyhow::Result;
use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, TimeZone, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::client::Client;
use crate::config::TimestampStore;
use crate::limiter::Limiter;
use crate::response::Connection;
use crate::store::Store;

/// Interval between harvest cycles.
pub const TICK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Everything a worker needs, shared across supervisors. The limiter
/// is shared so all workers pace against the one credential budget.
pub struct Context {
    pub store: Arc<dyn Store>,
    pub client: Client,
    pub limiter: Limiter,
    pub timestamps: Arc<TimestampStore>,
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-time setup (index creation).
    async fn init(&self) -> Result<()>;

    /// Harvest entities from the upstream into the store.
    async fn collect(&self) -> Result<()>;

    /// Materialize a fresh rank snapshot from the stored entities.
    async fn rank(&self) -> Result<()>;
}

/// Drive one worker until shutdown. A collect failure still falls
/// through to rank (yesterday's entities are better than none); a
/// rank failure waits for the next tick.
pub async fn run(worker: Arc<dyn Worker>, shutdown: Arc<AtomicBool>) {
    let name = worker.name();
    eprintln!("\x1b[36m[{}]\x1b[0m Worker started", name);
    if let Err(e) = worker.init().await {
        eprintln!("\x1b[36m[{}]\x1b[0m \x1b[31mInit failed: {:#}\x1b[0m", name, e);
        return;
    }
    while !shutdown.load(Ordering::SeqCst) {
        if let Err(e) = worker.collect().await {
            eprintln!("\x1b[36m[{}]\x1b[0m \x1b[31mCollect failed: {:#}\x1b[0m", name, e);
        }
        if let Err(e) = worker.rank().await {
            eprintln!("\x1b[36m[{}]\x1b[0m \x1b[31mRank failed: {:#}\x1b[0m", name, e);
        }
        if !idle(TICK, &shutdown).await {
            break;
        }
    }
    eprintln!("\x1b[36m[{}]\x1b[0m Shutting down", name);
}

/// Sleep in one-second slices so shutdown stays responsive. Returns
/// false once shutdown is requested.
async fn idle(total: Duration, shutdown: &AtomicBool) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(Duration::from_secs(1));
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    !shutdown.load(Ordering::SeqCst)
}

/// Width of one traveller window on the creation-time axis.
pub fn window() -> chrono::Duration {
    chrono::Duration::days(7)
}

/// The first instant worth scanning; the upstream has no earlier
/// accounts.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2007, 10, 1, 0, 0, 0).unwrap()
}

/// Where the traveller starts: the latest stored entity's creation
/// instant backed off one window and truncated to the day, so an
/// interrupted window is re-scanned; the epoch when nothing is stored.
pub fn resume_from(last_created_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last_created_at {
        Some(at) => {
            let backed = (at - window()).date_naive();
            let day = backed.and_hms_opt(0, 0, 0).unwrap().and_utc();
            day.max(epoch())
        }
        None => epoch(),
    }
}

/// Creation instant of a stored entity document.
pub fn created_at_of(doc: &Document) -> Option<DateTime<Utc>> {
    doc.get_datetime("created_at").ok().map(|dt| dt.to_chrono())
}

/// Drain a cursor-paginated result set: invoke `page` with no cursor
/// first, then with each `endCursor`, accumulating nodes until the
/// upstream reports no next page. Pacing against the rate budget
/// happens inside the closure, right after each response.
pub async fn collect_pages<T, F, Fut>(mut page: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Connection<T>>>,
{
    let mut nodes = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let connection = page(cursor.take()).await?;
        let has_next = connection.page_info.has_next_page;
        let end_cursor = connection.page_info.end_cursor.clone();
        nodes.extend(connection.nodes());
        if !has_next {
            break;
        }
        cursor = end_cursor;
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{Edge, PageInfo};
    use std::sync::Mutex;

    fn page<T>(nodes: Vec<T>, end_cursor: Option<&str>, has_next: bool) -> Connection<T> {
        Connection {
            edges: nodes
                .into_iter()
                .map(|node| Edge {
                    cursor: String::new(),
                    node,
                })
                .collect(),
            page_info: PageInfo {
                end_cursor: end_cursor.map(String::from),
                has_next_page: has_next,
            },
        }
    }

    #[tokio::test]
    async fn test_single_page_no_continuation() {
        let calls = Mutex::new(Vec::new());
        let nodes = collect_pages(|after| {
            calls.lock().unwrap().push(after);
            async { Ok(page((0..42).collect::<Vec<i32>>(), Some("c1"), false)) }
        })
        .await
        .unwrap();

        assert_eq!(nodes.len(), 42);
        assert_eq!(*calls.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_multi_page_threads_cursors() {
        let calls = Mutex::new(Vec::new());
        let nodes = collect_pages(|after| {
            let call = {
                let mut calls = calls.lock().unwrap();
                calls.push(after);
                calls.len()
            };
            async move {
                Ok(match call {
                    1 => page((0..100).collect::<Vec<i32>>(), Some("c1"), true),
                    2 => page((0..100).collect(), Some("c2"), true),
                    _ => page((0..100).collect(), Some("c3"), false),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(nodes.len(), 300);
        // Each call's `after` is the previous call's endCursor
        assert_eq!(
            *calls.lock().unwrap(),
            vec![None, Some("c1".to_string()), Some("c2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_empty_page_yields_no_nodes() {
        let nodes: Vec<i32> = collect_pages(|_| async { Ok(page(Vec::new(), None, false)) })
            .await
            .unwrap();
        assert!(nodes.is_empty());
    }

    #[tokio::test]
    async fn test_page_error_propagates() {
        let result: Result<Vec<i32>> =
            collect_pages(|_| async { anyhow::bail!("decode failure") }).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_resume_from_nothing_is_the_epoch() {
        assert_eq!(resume_from(None), epoch());
    }

    #[test]
    fn test_resume_backs_off_one_window_and_truncates() {
        let last = Utc.with_ymd_and_hms(2020, 6, 19, 13, 45, 59).unwrap();
        let resumed = resume_from(Some(last));
        assert_eq!(resumed, Utc.with_ymd_and_hms(2020, 6, 12, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_resume_never_precedes_the_epoch() {
        let last = Utc.with_ymd_and_hms(2007, 10, 2, 3, 4, 5).unwrap();
        assert_eq!(resume_from(Some(last)), epoch());
    }
}
