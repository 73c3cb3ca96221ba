//! Read API: paginated, filtered slices of the latest rank snapshot.
//!
//! One endpoint, `GET /ranks`, takes the filter tuple
//! `(name?, type, field, language?, location?, page, limit)`, rebuilds
//! the engine's canonical tag array, and pages through the snapshot
//! sealed for that entity kind. Invalid parameters are a 422; a
//! filter with neither name nor type is a 400.

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bson::{doc, Bson, Document};
use chrono::SecondsFormat;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{
    TimestampStore, TIMESTAMP_ORGANIZATION_RANKS, TIMESTAMP_OWNER_RANKS,
    TIMESTAMP_REPOSITORY_RANKS,
};
use crate::models::{Rank, TYPE_ORGANIZATION, TYPE_REPOSITORY, TYPE_USER};
use crate::pipeline::{canonical_tags, Stage};
use crate::store::{Store, RANKS};

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 100;

const USER_FIELDS: [&str; 6] = [
    "followers",
    "gists.forks",
    "gists.stargazers",
    "repositories.forks",
    "repositories.stargazers",
    "repositories.watchers",
];
const ORGANIZATION_FIELDS: [&str; 3] = [
    "repositories.forks",
    "repositories.stargazers",
    "repositories.watchers",
];
const REPOSITORY_FIELDS: [&str; 3] = ["forks", "stargazers", "watchers"];

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub timestamps: Arc<TimestampStore>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ranks", get(list_ranks))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    eprintln!("\x1b[32mok\x1b[0m Read API listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Raw query-string parameters; everything arrives as text so that a
/// malformed number is a validation error, not a routing rejection.
#[derive(Debug, Default, Deserialize)]
struct RankParams {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    page: Option<String>,
    #[serde(default)]
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Vec<RankView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Payload {
    fn data(data: Vec<RankView>) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
        }
    }
}

/// JSON projection of a rank row.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RankView {
    name: String,
    image_url: String,
    rank: i64,
    rank_count: i64,
    item_count: i64,
    tags: Vec<String>,
    created_at: String,
}

impl From<Rank> for RankView {
    fn from(rank: Rank) -> Self {
        Self {
            name: rank.name,
            image_url: rank.image_url,
            rank: rank.rank,
            rank_count: rank.rank_count,
            item_count: rank.item_count,
            tags: rank.tags,
            created_at: rank.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Validated filter tuple.
struct RankRequest {
    name: String,
    kind: String,
    field: String,
    language: Option<String>,
    location: Option<String>,
    page: i64,
    limit: i64,
}

fn validate(params: RankParams) -> Result<RankRequest, String> {
    let name = params.name.unwrap_or_default();
    let kind = params.kind.unwrap_or_default();
    let field = params.field.unwrap_or_default();

    let page = match params.page.as_deref() {
        None | Some("") => 1,
        Some(raw) => raw.parse::<i64>().map_err(|_| "page must be a number")?,
    };
    if page < 1 {
        return Err("page must be positive".to_string());
    }

    let limit = match params.limit.as_deref() {
        None | Some("") => DEFAULT_LIMIT,
        Some(raw) => raw.parse::<i64>().map_err(|_| "limit must be a number")?,
    };
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(format!("limit must be between 1 and {}", MAX_LIMIT));
    }

    if !kind.is_empty() {
        let allowed: &[&str] = match kind.as_str() {
            TYPE_USER => &USER_FIELDS,
            TYPE_ORGANIZATION => &ORGANIZATION_FIELDS,
            TYPE_REPOSITORY => &REPOSITORY_FIELDS,
            _ => return Err(format!("unknown type: {}", kind)),
        };
        // Every snapshot row carries a field tag, so a typed filter
        // without one can never match
        if field.is_empty() {
            return Err("field is required with type".to_string());
        }
        if !allowed.contains(&field.as_str()) {
            return Err(format!("unknown field for {}: {}", kind, field));
        }
    }

    Ok(RankRequest {
        name,
        kind,
        field,
        language: params.language.filter(|l| !l.is_empty()),
        location: params.location.filter(|l| !l.is_empty()),
        page,
        limit,
    })
}

async fn list_ranks(
    State(state): State<AppState>,
    Query(params): Query<RankParams>,
) -> impl IntoResponse {
    let request = match validate(params) {
        Ok(request) => request,
        Err(message) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(Payload::error(message)),
            )
        }
    };
    if request.name.is_empty() && request.kind.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(Payload::error("name or type is required")),
        );
    }

    let snapshots: Vec<Bson> = snapshot_keys(&request.kind)
        .iter()
        .map(|key| Bson::DateTime(state.timestamps.get(key).into()))
        .collect();

    let mut clauses = vec![doc! {"created_at": {"$in": snapshots}}];
    if !request.name.is_empty() {
        clauses.push(doc! {"name": &request.name});
    }
    if !request.kind.is_empty() {
        let tags = canonical_tags(
            &request.kind,
            &request.field,
            request.language.as_deref(),
            request.location.as_deref(),
        );
        clauses.push(doc! {"tags": tags});
    }

    let stages = [
        Stage::Match(doc! {"$and": clauses}),
        Stage::Skip((request.page - 1) * request.limit),
        Stage::Limit(request.limit),
    ];

    let rows = match fetch_rows(&state, &stages).await {
        Ok(rows) => rows,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Payload::error(e.to_string())),
            )
        }
    };
    (StatusCode::OK, Json(Payload::data(rows)))
}

fn snapshot_keys(kind: &str) -> Vec<&'static str> {
    match kind {
        TYPE_USER => vec![TIMESTAMP_OWNER_RANKS],
        TYPE_ORGANIZATION => vec![TIMESTAMP_ORGANIZATION_RANKS],
        TYPE_REPOSITORY => vec![TIMESTAMP_REPOSITORY_RANKS],
        // Name-only lookups span every kind's latest snapshot
        _ => vec![
            TIMESTAMP_OWNER_RANKS,
            TIMESTAMP_ORGANIZATION_RANKS,
            TIMESTAMP_REPOSITORY_RANKS,
        ],
    }
}

async fn fetch_rows(state: &AppState, stages: &[Stage]) -> Result<Vec<RankView>> {
    let documents: Vec<Document> = state
        .store
        .aggregate(RANKS, stages)
        .await?
        .try_collect()
        .await?;
    documents
        .into_iter()
        .map(|doc| Ok(RankView::from(bson::from_document::<Rank>(doc)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    async fn seeded_state() -> AppState {
        let store = MemoryStore::new();
        let timestamps = TimestampStore::ephemeral();
        let sealed = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        timestamps.seal(TIMESTAMP_OWNER_RANKS, sealed).unwrap();

        let stale = Utc.with_ymd_and_hms(2021, 5, 1, 0, 0, 0).unwrap();
        let tags = canonical_tags(TYPE_USER, "followers", None, None);
        let mut docs = Vec::new();
        for (i, name) in ["B", "C", "A"].iter().enumerate() {
            docs.push(
                bson::to_document(&Rank {
                    name: name.to_string(),
                    image_url: String::new(),
                    rank: i as i64 + 1,
                    rank_count: 3,
                    item_count: 30 - 10 * i as i64,
                    tags: tags.clone(),
                    created_at: sealed,
                })
                .unwrap(),
            );
        }
        // A superseded row that must never be served
        docs.push(
            bson::to_document(&Rank {
                name: "stale".to_string(),
                image_url: String::new(),
                rank: 1,
                rank_count: 1,
                item_count: 99,
                tags: tags.clone(),
                created_at: stale,
            })
            .unwrap(),
        );
        store.bulk_insert(RANKS, docs).await.unwrap();

        AppState {
            store: Arc::new(store),
            timestamps: Arc::new(timestamps),
        }
    }

    async fn get(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_empty_filter_is_bad_request() {
        let (status, _) = get(seeded_state().await, "/ranks").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_type_is_unprocessable() {
        let (status, body) = get(seeded_state().await, "/ranks?type=robot&field=followers").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("unknown type"));
    }

    #[tokio::test]
    async fn test_limit_out_of_range_is_unprocessable() {
        let (status, _) = get(
            seeded_state().await,
            "/ranks?type=user&field=followers&limit=500",
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = get(
            seeded_state().await,
            "/ranks?type=user&field=followers&page=zero",
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_lists_latest_snapshot_in_rank_order() {
        let (status, body) = get(seeded_state().await, "/ranks?type=user&field=followers").await;
        assert_eq!(status, StatusCode::OK);

        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        let names: Vec<&str> = data.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["B", "C", "A"]);
        assert!(data
            .iter()
            .all(|r| r["createdAt"] != serde_json::Value::Null));
    }

    #[tokio::test]
    async fn test_pagination_skips_and_limits() {
        let (status, body) = get(
            seeded_state().await,
            "/ranks?type=user&field=followers&page=2&limit=2",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["name"], "A");
    }

    #[tokio::test]
    async fn test_name_only_lookup() {
        let (status, body) = get(seeded_state().await, "/ranks?name=C").await;
        assert_eq!(status, StatusCode::OK);
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["rank"], 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_matches_nothing() {
        let (status, body) = get(
            seeded_state().await,
            "/ranks?type=user&field=repositories.stargazers",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
    }
}
