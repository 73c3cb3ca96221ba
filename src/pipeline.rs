//! Ranking pipelines as data.
//!
//! A pipeline is a sequence of [`Stage`]s handed to the store, which
//! either lowers them to native aggregation documents (MongoDB) or
//! interprets them structurally (the in-memory store). Builders here
//! enumerate the leaderboard family for each entity kind.

use bson::{doc, Document};

use crate::models::{tag, TYPE_REPOSITORY};

#[derive(Debug, Clone)]
pub enum Stage {
    /// Filter documents. Scalar conditions on array fields test
    /// membership; `$and`, `$all`, `$in`, `$gt`, and `$lt` cover the
    /// operator forms used by the engine and the read API.
    Match(Document),
    /// Duplicate a document per element of an embedded array field.
    Unwind(&'static str),
    /// Group by `_id`, keeping the first image and summing the given
    /// counter path across the group.
    Group {
        total_of: String,
        image_from: &'static str,
    },
    /// Reshape to `{_id, image_url, total_count}`, summing the given
    /// counter path within the document.
    Project {
        total_of: String,
        image_from: &'static str,
    },
    /// Order by `total_count` descending, ties broken by `_id`
    /// ascending so snapshots are stable under equal counts.
    SortByTotal,
    Skip(i64),
    Limit(i64),
    /// Collapse the stream to a single `{count: N}` document.
    Count,
}

impl Stage {
    /// Lower to a native aggregation stage document.
    pub fn to_document(&self) -> Document {
        match self {
            Stage::Match(filter) => doc! {"$match": filter.clone()},
            Stage::Unwind(path) => doc! {"$unwind": format!("${}", path)},
            Stage::Group {
                total_of,
                image_from,
            } => doc! {"$group": {
                "_id": "$_id",
                "image_url": {"$first": format!("${}", image_from)},
                "total_count": {"$sum": format!("${}.total_count", total_of)},
            }},
            Stage::Project {
                total_of,
                image_from,
            } => doc! {"$project": {
                "_id": "$_id",
                "image_url": format!("${}", image_from),
                "total_count": {"$sum": format!("${}.total_count", total_of)},
            }},
            Stage::SortByTotal => doc! {"$sort": {"total_count": -1, "_id": 1}},
            Stage::Skip(n) => doc! {"$skip": *n},
            Stage::Limit(n) => doc! {"$limit": *n},
            Stage::Count => doc! {"$count": "count"},
        }
    }
}

/// One leaderboard dimension: the stages that produce it and the tags
/// its rank rows carry.
#[derive(Debug, Clone)]
pub struct RankPipeline {
    pub stages: Vec<Stage>,
    pub tags: Vec<String>,
}

impl RankPipeline {
    /// The same pipeline, suffixed to yield the leaderboard's logical
    /// length: entities with a positive total, collapsed to a count.
    pub fn count_stages(&self) -> Vec<Stage> {
        let mut stages = self.stages.clone();
        stages.push(Stage::Match(doc! {"total_count": {"$gt": 0}}));
        stages.push(Stage::Count);
        stages
    }
}

/// Tag set identifying one dimension, in the canonical order shared
/// by the engine's emission and the read API's filter.
pub fn canonical_tags(
    kind: &str,
    field: &str,
    language: Option<&str>,
    location: Option<&str>,
) -> Vec<String> {
    let mut tags = vec![tag("type", kind), tag("field", field)];
    if let Some(language) = language {
        tags.push(tag("language", language));
    }
    if let Some(location) = location {
        tags.push(tag("location", location));
    }
    tags
}

/// Rank owners of one kind by a counter path, scalar (`followers`) or
/// embedded (`repositories.stargazers`, summed across the array).
pub fn owners_by_field(kind: &str, field: &str) -> RankPipeline {
    RankPipeline {
        stages: vec![
            Stage::Match(doc! {"tags": tag("type", kind)}),
            Stage::Project {
                total_of: field.to_string(),
                image_from: "avatar_url",
            },
            Stage::SortByTotal,
        ],
        tags: canonical_tags(kind, field, None, None),
    }
}

/// Rank owners of one kind by a repository counter restricted to one
/// primary language: unwind the embedded array, keep the language,
/// and re-group per owner.
pub fn owners_by_language(kind: &str, field: &str, language: &str) -> RankPipeline {
    let total_of = format!("repositories.{}", field);
    RankPipeline {
        stages: vec![
            Stage::Match(doc! {"tags": tag("type", kind)}),
            Stage::Unwind("repositories"),
            Stage::Match(doc! {"repositories.primary_language.name": language}),
            Stage::Group {
                total_of: total_of.clone(),
                image_from: "avatar_url",
            },
            Stage::SortByTotal,
        ],
        tags: canonical_tags(kind, &total_of, Some(language), None),
    }
}

/// Rank owners of one kind by a counter path within one location
/// (country or `City, Country` granularity).
pub fn owners_by_location(kind: &str, field: &str, location: &str) -> RankPipeline {
    RankPipeline {
        stages: vec![
            Stage::Match(doc! {"tags": {"$all": [tag("type", kind), tag("location", location)]}}),
            Stage::Project {
                total_of: field.to_string(),
                image_from: "avatar_url",
            },
            Stage::SortByTotal,
        ],
        tags: canonical_tags(kind, field, None, Some(location)),
    }
}

/// Rank repositories by a counter field.
pub fn repositories_by_field(field: &str) -> RankPipeline {
    RankPipeline {
        stages: vec![
            Stage::Match(doc! {"tags": tag("type", TYPE_REPOSITORY)}),
            Stage::Project {
                total_of: field.to_string(),
                image_from: "open_graph_image_url",
            },
            Stage::SortByTotal,
        ],
        tags: canonical_tags(TYPE_REPOSITORY, field, None, None),
    }
}

/// Rank repositories by a counter field restricted to one primary
/// language.
pub fn repositories_by_language(field: &str, language: &str) -> RankPipeline {
    RankPipeline {
        stages: vec![
            Stage::Match(doc! {
                "tags": tag("type", TYPE_REPOSITORY),
                "primary_language.name": language,
            }),
            Stage::Project {
                total_of: field.to_string(),
                image_from: "open_graph_image_url",
            },
            Stage::SortByTotal,
        ],
        tags: canonical_tags(TYPE_REPOSITORY, field, Some(language), None),
    }
}
