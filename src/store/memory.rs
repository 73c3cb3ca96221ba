//! In-memory [`Store`] for tests.
//!
//! Collections are plain document vectors behind a `RwLock`, kept in
//! insertion order so natural-order reads behave like the real store.
//! Ranking pipelines are interpreted structurally, stage by stage,
//! with the operator subset the engine and read API actually use.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::{stream, StreamExt};

use crate::pipeline::Stage;

use super::{DocStream, Store, UpsertReport};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_coll<R>(&self, name: &str, f: impl FnOnce(&mut Vec<Document>) -> R) -> R {
        let mut collections = self.collections.write().unwrap();
        f(collections.entry(name.to_string()).or_default())
    }

    fn snapshot(&self, name: &str) -> Vec<Document> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn bulk_upsert(
        &self,
        coll: &str,
        docs: Vec<(String, Document)>,
    ) -> Result<UpsertReport> {
        self.with_coll(coll, |stored| {
            let mut report = UpsertReport::default();
            for (pk, patch) in docs {
                let key = Bson::String(pk.clone());
                match stored.iter_mut().find(|d| d.get("_id") == Some(&key)) {
                    Some(existing) => {
                        existing.extend(patch);
                        report.modified += 1;
                    }
                    None => {
                        let mut fresh = doc! {"_id": pk};
                        fresh.extend(patch);
                        stored.push(fresh);
                        report.upserted += 1;
                    }
                }
            }
            Ok(report)
        })
    }

    async fn bulk_insert(&self, coll: &str, docs: Vec<Document>) -> Result<()> {
        self.with_coll(coll, |stored| {
            for mut doc in docs {
                if !doc.contains_key("_id") {
                    let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
                    doc.insert("_id", id);
                }
                stored.push(doc);
            }
            Ok(())
        })
    }

    async fn update_one(&self, coll: &str, pk: &str, patch: Document) -> Result<()> {
        self.with_coll(coll, |stored| {
            let key = Bson::String(pk.to_string());
            if let Some(existing) = stored.iter_mut().find(|d| d.get("_id") == Some(&key)) {
                existing.extend(patch);
            }
            Ok(())
        })
    }

    async fn find_all(&self, coll: &str) -> Result<DocStream> {
        let docs = self.snapshot(coll);
        Ok(stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn find_last(&self, coll: &str) -> Result<Option<Document>> {
        Ok(self.snapshot(coll).last().cloned())
    }

    async fn aggregate(&self, coll: &str, stages: &[Stage]) -> Result<DocStream> {
        let docs = execute(stages, self.snapshot(coll));
        Ok(stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn delete_many(&self, coll: &str, filter: Document) -> Result<u64> {
        self.with_coll(coll, |stored| {
            let before = stored.len();
            stored.retain(|doc| !matches_filter(doc, &filter));
            Ok((before - stored.len()) as u64)
        })
    }

    async fn create_indexes(&self, _coll: &str, _keys: &[&str]) -> Result<()> {
        Ok(())
    }
}

fn execute(stages: &[Stage], mut docs: Vec<Document>) -> Vec<Document> {
    for stage in stages {
        docs = match stage {
            Stage::Match(filter) => docs
                .into_iter()
                .filter(|doc| matches_filter(doc, filter))
                .collect(),
            Stage::Unwind(path) => unwind(docs, path),
            Stage::Group {
                total_of,
                image_from,
            } => group(docs, total_of, image_from),
            Stage::Project {
                total_of,
                image_from,
            } => docs
                .into_iter()
                .map(|doc| project(&doc, total_of, image_from))
                .collect(),
            Stage::SortByTotal => {
                docs.sort_by(|a, b| {
                    let by_total = total_count(b).cmp(&total_count(a));
                    by_total.then_with(|| {
                        compare(
                            a.get("_id").unwrap_or(&Bson::Null),
                            b.get("_id").unwrap_or(&Bson::Null),
                        )
                    })
                });
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(*n as usize).collect(),
            Stage::Limit(n) => {
                docs.truncate(*n as usize);
                docs
            }
            // An empty input yields no count document at all
            Stage::Count => {
                if docs.is_empty() {
                    Vec::new()
                } else {
                    vec![doc! {"count": docs.len() as i64}]
                }
            }
        };
    }
    docs
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, cond)| {
        if key == "$and" {
            match cond.as_array() {
                Some(clauses) => clauses.iter().all(|clause| match clause.as_document() {
                    Some(sub) => matches_filter(doc, sub),
                    None => false,
                }),
                None => false,
            }
        } else {
            matches_condition(doc, key, cond)
        }
    })
}

fn matches_condition(doc: &Document, path: &str, cond: &Bson) -> bool {
    let raw = resolve(doc, path);
    match cond.as_document() {
        Some(ops) if is_operator(ops) => ops.iter().all(|(op, arg)| {
            let values = flatten(&raw);
            match op.as_str() {
                "$gt" => values
                    .iter()
                    .any(|v| compare(v, arg) == Ordering::Greater),
                "$lt" => values.iter().any(|v| compare(v, arg) == Ordering::Less),
                "$in" => match arg.as_array() {
                    Some(choices) => values.iter().any(|v| choices.contains(v)),
                    None => false,
                },
                "$all" => match arg.as_array() {
                    Some(required) => required.iter().all(|r| values.contains(r)),
                    None => false,
                },
                _ => false,
            }
        }),
        // Plain equality: the raw value itself, or membership when
        // the field is an array
        _ => raw.iter().any(|v| v == cond) || flatten(&raw).iter().any(|v| v == cond),
    }
}

fn is_operator(ops: &Document) -> bool {
    ops.keys().any(|k| k.starts_with('$'))
}

/// Values at a dotted path, descending through embedded documents and
/// intermediate arrays. The terminal value is kept raw.
fn resolve(doc: &Document, path: &str) -> Vec<Bson> {
    let mut current = vec![Bson::Document(doc.clone())];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in &current {
            match value {
                Bson::Document(d) => {
                    if let Some(v) = d.get(segment) {
                        next.push(v.clone());
                    }
                }
                Bson::Array(items) => {
                    for item in items {
                        if let Bson::Document(d) = item {
                            if let Some(v) = d.get(segment) {
                                next.push(v.clone());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

fn flatten(values: &[Bson]) -> Vec<Bson> {
    let mut flat = Vec::new();
    for value in values {
        match value {
            Bson::Array(items) => flat.extend(items.iter().cloned()),
            other => flat.push(other.clone()),
        }
    }
    flat
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) => Some(*n as i64),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Ordering {
    if let (Some(x), Some(y)) = (as_i64(a), as_i64(b)) {
        return x.cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn sum_path(doc: &Document, total_of: &str) -> i64 {
    let path = format!("{}.total_count", total_of);
    flatten(&resolve(doc, &path))
        .iter()
        .filter_map(as_i64)
        .sum()
}

fn total_count(doc: &Document) -> i64 {
    doc.get("total_count").and_then(as_i64).unwrap_or(0)
}

fn first_value(doc: &Document, path: &str) -> Bson {
    flatten(&resolve(doc, path))
        .into_iter()
        .next()
        .unwrap_or(Bson::String(String::new()))
}

fn unwind(docs: Vec<Document>, path: &str) -> Vec<Document> {
    let mut out = Vec::new();
    for doc in docs {
        // A missing or non-array field drops the document
        if let Ok(items) = doc.get_array(path) {
            for item in items.clone() {
                let mut copy = doc.clone();
                copy.insert(path, item);
                out.push(copy);
            }
        }
    }
    out
}

fn group(docs: Vec<Document>, total_of: &str, image_from: &str) -> Vec<Document> {
    let mut groups: Vec<(Bson, Bson, i64)> = Vec::new();
    for doc in docs {
        let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
        let total = sum_path(&doc, total_of);
        match groups.iter_mut().find(|(gid, _, _)| *gid == id) {
            Some((_, _, sum)) => *sum += total,
            None => {
                let image = first_value(&doc, image_from);
                groups.push((id, image, total));
            }
        }
    }
    groups
        .into_iter()
        .map(|(id, image, total)| doc! {"_id": id, "image_url": image, "total_count": total})
        .collect()
}

fn project(doc: &Document, total_of: &str, image_from: &str) -> Document {
    doc! {
        "_id": doc.get("_id").cloned().unwrap_or(Bson::Null),
        "image_url": first_value(doc, image_from),
        "total_count": sum_path(doc, total_of),
    }
}
