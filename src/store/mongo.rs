//! MongoDB-backed [`Store`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use bson::{doc, Document};
use futures::{StreamExt, TryStreamExt};
use mongodb::options::{ClientOptions, FindOneOptions, UpdateOptions};
use mongodb::{Client, Database, IndexModel};
use std::time::Duration;

use crate::pipeline::Stage;

use super::{DocStream, Store, UpsertReport};

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(url: &str, database: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(url)
            .await
            .context("Malformed MONGO_URL")?;
        options.app_name = Some("gh-ranks".to_string());
        options.server_selection_timeout = Some(Duration::from_secs(5));
        options.connect_timeout = Some(Duration::from_secs(5));
        let client = Client::with_options(options).context("Failed to create MongoDB client")?;
        Ok(Self {
            db: client.database(database),
        })
    }

    fn coll(&self, name: &str) -> mongodb::Collection<Document> {
        self.db.collection(name)
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn bulk_upsert(
        &self,
        coll: &str,
        docs: Vec<(String, Document)>,
    ) -> Result<UpsertReport> {
        let coll = self.coll(coll);
        let options = UpdateOptions::builder().upsert(true).build();
        let mut report = UpsertReport::default();
        for (pk, doc) in docs {
            let result = coll
                .update_one(doc! {"_id": &pk}, doc! {"$set": doc}, options.clone())
                .await
                .with_context(|| format!("Upsert failed for {}", pk))?;
            if result.upserted_id.is_some() {
                report.upserted += 1;
            } else {
                report.modified += result.modified_count;
            }
        }
        Ok(report)
    }

    async fn bulk_insert(&self, coll: &str, docs: Vec<Document>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.coll(coll)
            .insert_many(docs, None)
            .await
            .context("Bulk insert failed")?;
        Ok(())
    }

    async fn update_one(&self, coll: &str, pk: &str, patch: Document) -> Result<()> {
        self.coll(coll)
            .update_one(doc! {"_id": pk}, doc! {"$set": patch}, None)
            .await
            .with_context(|| format!("Update failed for {}", pk))?;
        Ok(())
    }

    async fn find_all(&self, coll: &str) -> Result<DocStream> {
        let cursor = self.coll(coll).find(None, None).await?;
        Ok(cursor.map_err(anyhow::Error::from).boxed())
    }

    async fn find_last(&self, coll: &str) -> Result<Option<Document>> {
        let options = FindOneOptions::builder()
            .sort(doc! {"$natural": -1})
            .build();
        Ok(self.coll(coll).find_one(None, options).await?)
    }

    async fn aggregate(&self, coll: &str, stages: &[Stage]) -> Result<DocStream> {
        let pipeline: Vec<Document> = stages.iter().map(Stage::to_document).collect();
        let cursor = self.coll(coll).aggregate(pipeline, None).await?;
        Ok(cursor.map_err(anyhow::Error::from).boxed())
    }

    async fn delete_many(&self, coll: &str, filter: Document) -> Result<u64> {
        let result = self.coll(coll).delete_many(filter, None).await?;
        Ok(result.deleted_count)
    }

    async fn create_indexes(&self, coll: &str, keys: &[&str]) -> Result<()> {
        let coll = self.coll(coll);
        for key in keys {
            let mut index_keys = Document::new();
            index_keys.insert(key.to_string(), 1);
            coll.create_index(IndexModel::builder().keys(index_keys).build(), None)
                .await
                .with_context(|| format!("Failed to create index on {}", key))?;
        }
        Ok(())
    }
}
