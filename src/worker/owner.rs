//! Owner worker: harvests users and organizations (the upstream's
//! USER search surfaces both), enriches them with their gists and
//! repositories, and ranks both kinds.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bson::doc;
use chrono::Utc;
use futures::TryStreamExt;
use std::sync::Arc;

use crate::config::{TIMESTAMP_ORGANIZATION_RANKS, TIMESTAMP_OWNER_RANKS};
use crate::models::{Gist, Owner, Repository, TYPE_ORGANIZATION, TYPE_USER};
use crate::pipeline::{owners_by_field, owners_by_language, owners_by_location, RankPipeline};
use crate::query::{owner_search_filter, quote, Query};
use crate::rank::Engine;
use crate::resource::{LANGUAGES, LOCATIONS};
use crate::response::{OwnerData, OwnerNode, SearchData};
use crate::store::{OWNERS, RANKS};
use crate::worker::{collect_pages, created_at_of, epoch, resume_from, window, Context, Worker};

/// Counter paths users are ranked by.
const USER_FIELDS: [&str; 6] = [
    "followers",
    "gists.forks",
    "gists.stargazers",
    "repositories.forks",
    "repositories.stargazers",
    "repositories.watchers",
];

/// Counter paths organizations are ranked by (no followers, no gists).
const ORGANIZATION_FIELDS: [&str; 3] = [
    "repositories.forks",
    "repositories.stargazers",
    "repositories.watchers",
];

/// Repository counters used for the per-language dimensions.
const REPOSITORY_FIELDS: [&str; 3] = ["forks", "stargazers", "watchers"];

pub struct OwnerWorker {
    ctx: Arc<Context>,
}

impl OwnerWorker {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn travel(&self) -> Result<()> {
        let mut from = if self.ctx.timestamps.is_unset(TIMESTAMP_OWNER_RANKS) {
            let last = self.ctx.store.find_last(OWNERS).await?;
            resume_from(last.as_ref().and_then(created_at_of))
        } else {
            epoch()
        };

        let until = Utc::now();
        while from <= until {
            let to = from + window();
            let filter = owner_search_filter(from, to);
            let owners = self.fetch_owners(&filter).await?;
            self.store_owners(owners).await?;
            from = to;
        }
        Ok(())
    }

    async fn fetch_owners(&self, filter: &str) -> Result<Vec<Owner>> {
        let ctx = Arc::clone(&self.ctx);
        let filter = filter.to_string();
        let nodes = collect_pages(move |after| {
            let ctx = Arc::clone(&ctx);
            let mut query = Query::owners();
            query.search.query = quote(&filter);
            if let Some(after) = after {
                query.search.after = quote(&after);
            }
            async move {
                let res = ctx
                    .client
                    .search::<SearchData<OwnerNode>>(&query.render())
                    .await?;
                let data = res.data.context("Owner search carried no data")?;
                ctx.limiter
                    .pace(&data.rate_limit, data.rate_limit.cost)
                    .await;
                Ok(data.search)
            }
        })
        .await?;

        Ok(nodes
            .into_iter()
            // The search occasionally surfaces node types outside the
            // query fragments; those arrive as empty objects
            .filter(|node| !node.login.is_empty())
            .map(OwnerNode::into_owner)
            .collect())
    }

    async fn store_owners(&self, owners: Vec<Owner>) -> Result<()> {
        if owners.is_empty() {
            return Ok(());
        }
        let docs = owners
            .iter()
            .map(|owner| Ok((owner.login.clone(), bson::to_document(owner)?)))
            .collect::<Result<Vec<_>>>()?;
        let report = self.ctx.store.bulk_upsert(OWNERS, docs).await?;
        if report.upserted > 0 {
            eprintln!("\x1b[36m[owner]\x1b[0m Discovered {} owners", report.upserted);
        }
        if report.modified > 0 {
            eprintln!("\x1b[36m[owner]\x1b[0m Refreshed {} owners", report.modified);
        }
        Ok(())
    }

    /// Second pass: walk the stored owners and replace their embedded
    /// gists (users only) and repositories wholesale.
    async fn update_connections(&self) -> Result<()> {
        let mut cursor = self.ctx.store.find_all(OWNERS).await?;
        while let Some(document) = cursor.try_next().await? {
            let owner: Owner =
                bson::from_document(document).context("Stored owner changed shape")?;

            if owner.is_user() {
                let gists = self.fetch_gists(&owner.login).await?;
                if !gists.is_empty() {
                    eprintln!(
                        "\x1b[36m[owner]\x1b[0m Updated {} gists of {}",
                        gists.len(),
                        owner.login
                    );
                }
                self.ctx
                    .store
                    .update_one(OWNERS, &owner.login, doc! {"gists": bson::to_bson(&gists)?})
                    .await?;
            }

            let field = owner.kind().as_str();
            let repositories = self.fetch_owner_repositories(field, &owner.login).await?;
            if !repositories.is_empty() {
                eprintln!(
                    "\x1b[36m[owner]\x1b[0m Updated {} repositories of {}",
                    repositories.len(),
                    owner.login
                );
            }
            self.ctx
                .store
                .update_one(
                    OWNERS,
                    &owner.login,
                    doc! {"repositories": bson::to_bson(&repositories)?},
                )
                .await?;
        }
        Ok(())
    }

    async fn fetch_gists(&self, login: &str) -> Result<Vec<Gist>> {
        let ctx = Arc::clone(&self.ctx);
        let login = login.to_string();
        let nodes = collect_pages(move |after| {
            let ctx = Arc::clone(&ctx);
            let mut query = Query::owner_gists(&login);
            if let Some(after) = after {
                query.gists.after = quote(&after);
            }
            async move {
                let res = ctx.client.search::<OwnerData>(&query.render()).await?;
                let data = res.data.context("Gists response carried no data")?;
                ctx.limiter
                    .pace(&data.rate_limit, data.rate_limit.cost)
                    .await;
                // A deleted account yields a null owner; treat it as
                // an exhausted connection
                Ok(data.owner.and_then(|o| o.gists).unwrap_or_default())
            }
        })
        .await?;
        Ok(nodes.into_iter().map(Gist::from).collect())
    }

    async fn fetch_owner_repositories(
        &self,
        field: &'static str,
        login: &str,
    ) -> Result<Vec<Repository>> {
        let ctx = Arc::clone(&self.ctx);
        let login = login.to_string();
        let nodes = collect_pages(move |after| {
            let ctx = Arc::clone(&ctx);
            let mut query = Query::owner_repositories(field, &login);
            if let Some(after) = after {
                query.repositories.after = quote(&after);
            }
            async move {
                let res = ctx.client.search::<OwnerData>(&query.render()).await?;
                let data = res.data.context("Repositories response carried no data")?;
                ctx.limiter
                    .pace(&data.rate_limit, data.rate_limit.cost)
                    .await;
                Ok(data.owner.and_then(|o| o.repositories).unwrap_or_default())
            }
        })
        .await?;
        Ok(nodes.into_iter().map(Repository::from).collect())
    }
}

/// The full owner pipeline family: plain fields, repository counters
/// per language, and every field per location, for both kinds.
pub fn pipelines() -> Vec<RankPipeline> {
    let mut family = Vec::new();
    for field in USER_FIELDS {
        family.push(owners_by_field(TYPE_USER, field));
    }
    for field in ORGANIZATION_FIELDS {
        family.push(owners_by_field(TYPE_ORGANIZATION, field));
    }
    for kind in [TYPE_USER, TYPE_ORGANIZATION] {
        for field in REPOSITORY_FIELDS {
            for language in LANGUAGES {
                family.push(owners_by_language(kind, field, language.name));
            }
        }
    }
    for (kind, fields) in [
        (TYPE_USER, &USER_FIELDS[..]),
        (TYPE_ORGANIZATION, &ORGANIZATION_FIELDS[..]),
    ] {
        for &field in fields {
            for location in LOCATIONS {
                family.push(owners_by_location(kind, field, location.name));
                for city in location.cities {
                    let place = format!("{}, {}", city, location.name);
                    family.push(owners_by_location(kind, field, &place));
                }
            }
        }
    }
    family
}

#[async_trait]
impl Worker for OwnerWorker {
    fn name(&self) -> &'static str {
        "owner"
    }

    async fn init(&self) -> Result<()> {
        self.ctx
            .store
            .create_indexes(OWNERS, &["created_at", "name"])
            .await?;
        self.ctx
            .store
            .create_indexes(RANKS, &["tags", "name", "created_at"])
            .await?;
        Ok(())
    }

    async fn collect(&self) -> Result<()> {
        eprintln!("\x1b[36m[owner]\x1b[0m Collecting owners...");
        self.travel().await?;
        eprintln!("\x1b[36m[owner]\x1b[0m Updating owner connections...");
        self.update_connections().await
    }

    async fn rank(&self) -> Result<()> {
        let family = pipelines();
        eprintln!(
            "\x1b[36m[owner]\x1b[0m Executing {} rank pipelines...",
            family.len()
        );
        let engine = Engine::new(
            Arc::clone(&self.ctx.store),
            Arc::clone(&self.ctx.timestamps),
            4,
        );
        engine
            .run(
                OWNERS,
                family,
                &[TIMESTAMP_OWNER_RANKS, TIMESTAMP_ORGANIZATION_RANKS],
                &[TYPE_USER, TYPE_ORGANIZATION],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_family_covers_every_dimension_once() {
        let family = pipelines();
        let mut seen = HashSet::new();
        for pipeline in &family {
            assert!(
                seen.insert(pipeline.tags.clone()),
                "duplicate dimension: {:?}",
                pipeline.tags
            );
        }

        // Spot-check the three dimension shapes
        assert!(seen.contains(&vec![
            "type:user".to_string(),
            "field:followers".to_string()
        ]));
        assert!(seen.contains(&vec![
            "type:organization".to_string(),
            "field:repositories.stargazers".to_string(),
            "language:Rust".to_string(),
        ]));
        assert!(seen.contains(&vec![
            "type:user".to_string(),
            "field:followers".to_string(),
            "location:Taipei, Taiwan".to_string(),
        ]));
    }

    #[test]
    fn test_organizations_never_rank_user_only_fields() {
        for pipeline in pipelines() {
            if pipeline.tags[0] == "type:organization" {
                assert_ne!(pipeline.tags[1], "field:followers");
                assert!(!pipeline.tags[1].starts_with("field:gists"));
            }
        }
    }
}
