//! Persisted document types for the `owners`, `repositories`, and
//! `ranks` collections.
//!
//! Counter fields are connection projections carrying only the
//! upstream `totalCount`, so every ranked dimension sums the same
//! `<field>.total_count` path regardless of where it lives.

use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TYPE_USER: &str = "user";
pub const TYPE_ORGANIZATION: &str = "organization";
pub const TYPE_REPOSITORY: &str = "repository";

/// Render a `name:value` facet tag.
pub fn tag(name: &str, value: &str) -> String {
    format!("{}:{}", name, value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    User,
    Organization,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::User => TYPE_USER,
            OwnerKind::Organization => TYPE_ORGANIZATION,
        }
    }
}

/// Connection projection: the `totalCount` of an upstream connection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Items {
    #[serde(default)]
    pub total_count: i64,
}

impl Items {
    pub fn new(total_count: i64) -> Self {
        Self { total_count }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gist {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub forks: Items,
    #[serde(default)]
    pub stargazers: Items,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoOwner {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryLanguage {
    pub name: String,
}

/// A repository document, also embedded by value on its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    #[serde(rename = "_id")]
    pub name_with_owner: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: RepoOwner,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub open_graph_image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_language: Option<PrimaryLanguage>,
    #[serde(default)]
    pub forks: Items,
    #[serde(default)]
    pub stargazers: Items,
    #[serde(default)]
    pub watchers: Items,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A user or organization. The kind is decided once, when the search
/// node is converted, and persisted as a `type:` tag; reads never
/// re-derive it from field presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    #[serde(rename = "_id")]
    pub login: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub location: String,
    /// Present on users only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<Items>,
    /// Users only; replaced wholesale by the follow-up pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gists: Vec<Gist>,
    /// Replaced wholesale by the follow-up pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Owner {
    pub fn kind(&self) -> OwnerKind {
        let org = tag("type", TYPE_ORGANIZATION);
        if self.tags.iter().any(|t| *t == org) {
            OwnerKind::Organization
        } else {
            OwnerKind::User
        }
    }

    pub fn is_user(&self) -> bool {
        self.kind() == OwnerKind::User
    }
}

/// One leaderboard row of a rank snapshot. All rows written by one
/// engine invocation for one entity kind share `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rank {
    pub name: String,
    #[serde(default)]
    pub image_url: String,
    pub rank: i64,
    pub rank_count: i64,
    pub item_count: i64,
    pub tags: Vec<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}
