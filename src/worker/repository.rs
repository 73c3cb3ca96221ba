//! Repository worker: harvests starred fork-network repositories and
//! ranks them, plain and per language.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::config::TIMESTAMP_REPOSITORY_RANKS;
use crate::models::{tag, Repository, TYPE_REPOSITORY};
use crate::pipeline::{repositories_by_field, repositories_by_language, RankPipeline};
use crate::query::{quote, repository_search_filter, Query};
use crate::rank::Engine;
use crate::resource::LANGUAGES;
use crate::response::{RepositoryNode, SearchData};
use crate::store::{RANKS, REPOSITORIES};
use crate::worker::{collect_pages, created_at_of, epoch, resume_from, window, Context, Worker};

const FIELDS: [&str; 3] = ["forks", "stargazers", "watchers"];

pub struct RepositoryWorker {
    ctx: Arc<Context>,
}

impl RepositoryWorker {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn travel(&self) -> Result<()> {
        let mut from = if self.ctx.timestamps.is_unset(TIMESTAMP_REPOSITORY_RANKS) {
            let last = self.ctx.store.find_last(REPOSITORIES).await?;
            resume_from(last.as_ref().and_then(created_at_of))
        } else {
            epoch()
        };

        let until = Utc::now();
        while from <= until {
            let to = from + window();
            let filter = repository_search_filter(from, to);
            let repositories = self.fetch_repositories(&filter).await?;
            self.store_repositories(repositories).await?;
            from = to;
        }
        Ok(())
    }

    async fn fetch_repositories(&self, filter: &str) -> Result<Vec<Repository>> {
        let ctx = Arc::clone(&self.ctx);
        let filter = filter.to_string();
        let nodes = collect_pages(move |after| {
            let ctx = Arc::clone(&ctx);
            let mut query = Query::repositories();
            query.search.query = quote(&filter);
            if let Some(after) = after {
                query.search.after = quote(&after);
            }
            async move {
                let res = ctx
                    .client
                    .search::<SearchData<RepositoryNode>>(&query.render())
                    .await?;
                let data = res.data.context("Repository search carried no data")?;
                ctx.limiter
                    .pace(&data.rate_limit, data.rate_limit.cost)
                    .await;
                Ok(data.search)
            }
        })
        .await?;

        Ok(nodes
            .into_iter()
            .filter(|node| !node.name_with_owner.is_empty())
            .map(|node| {
                let mut repository = Repository::from(node);
                repository.tags = vec![tag("type", TYPE_REPOSITORY)];
                repository
            })
            .collect())
    }

    async fn store_repositories(&self, repositories: Vec<Repository>) -> Result<()> {
        if repositories.is_empty() {
            return Ok(());
        }
        let docs = repositories
            .iter()
            .map(|repository| {
                Ok((
                    repository.name_with_owner.clone(),
                    bson::to_document(repository)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let report = self.ctx.store.bulk_upsert(REPOSITORIES, docs).await?;
        if report.upserted > 0 {
            eprintln!(
                "\x1b[35m[repository]\x1b[0m Discovered {} repositories",
                report.upserted
            );
        }
        if report.modified > 0 {
            eprintln!(
                "\x1b[35m[repository]\x1b[0m Refreshed {} repositories",
                report.modified
            );
        }
        Ok(())
    }
}

/// The repository pipeline family: each counter, plain and per
/// supported language.
pub fn pipelines() -> Vec<RankPipeline> {
    let mut family = Vec::new();
    for field in FIELDS {
        family.push(repositories_by_field(field));
    }
    for field in FIELDS {
        for language in LANGUAGES {
            family.push(repositories_by_language(field, language.name));
        }
    }
    family
}

#[async_trait]
impl Worker for RepositoryWorker {
    fn name(&self) -> &'static str {
        "repository"
    }

    async fn init(&self) -> Result<()> {
        self.ctx
            .store
            .create_indexes(REPOSITORIES, &["created_at", "name"])
            .await?;
        self.ctx
            .store
            .create_indexes(RANKS, &["tags", "name", "created_at"])
            .await?;
        Ok(())
    }

    async fn collect(&self) -> Result<()> {
        eprintln!("\x1b[35m[repository]\x1b[0m Collecting repositories...");
        self.travel().await
    }

    async fn rank(&self) -> Result<()> {
        let family = pipelines();
        eprintln!(
            "\x1b[35m[repository]\x1b[0m Executing {} rank pipelines...",
            family.len()
        );
        let engine = Engine::new(
            Arc::clone(&self.ctx.store),
            Arc::clone(&self.ctx.timestamps),
            2,
        );
        engine
            .run(
                REPOSITORIES,
                family,
                &[TIMESTAMP_REPOSITORY_RANKS],
                &[TYPE_REPOSITORY],
            )
            .await
    }
}
