//! Typed shells for upstream GraphQL responses, and the conversion of
//! raw search nodes into persisted documents.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::limiter::RateBudget;
use crate::models::{tag, Gist, Items, Owner, OwnerKind, PrimaryLanguage, RepoOwner, Repository};
use crate::resource;

/// Top-level response envelope. `message` is set on upstream soft
/// failures delivered with a 200 status.
#[derive(Debug, Deserialize)]
pub struct Response<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphError>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphError {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub locations: Vec<ErrorLocation>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ErrorLocation {
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub column: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
pub struct Edge<T> {
    #[serde(default)]
    pub cursor: String,
    pub node: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Connection<T> {
    #[serde(default)]
    pub edges: Vec<Edge<T>>,
    #[serde(default)]
    pub page_info: PageInfo,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self {
            edges: Vec::new(),
            page_info: PageInfo::default(),
        }
    }
}

impl<T> Connection<T> {
    pub fn nodes(self) -> Vec<T> {
        self.edges.into_iter().map(|edge| edge.node).collect()
    }
}

/// `data` payload of a search query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchData<T> {
    pub search: Connection<T>,
    #[serde(default)]
    pub rate_limit: RateBudget,
}

/// `data` payload of the per-owner follow-up queries. `owner` is null
/// when the account has been deleted since it was stored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerData {
    pub owner: Option<OwnerConnections>,
    #[serde(default)]
    pub rate_limit: RateBudget,
}

#[derive(Debug, Default, Deserialize)]
pub struct OwnerConnections {
    #[serde(default)]
    pub gists: Option<Connection<GistNode>>,
    #[serde(default)]
    pub repositories: Option<Connection<RepositoryNode>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemsNode {
    pub total_count: i64,
}

impl From<ItemsNode> for Items {
    fn from(node: ItemsNode) -> Self {
        Items::new(node.total_count)
    }
}

/// Raw node of the owner search. The `USER` search surfaces both
/// users and organizations; only users carry the follower counter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerNode {
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub followers: Option<ItemsNode>,
}

impl OwnerNode {
    /// The follower counter is only present on users; deciding the
    /// kind happens here, once, and is persisted as a `type:` tag.
    pub fn kind(&self) -> OwnerKind {
        if self.followers.is_some() {
            OwnerKind::User
        } else {
            OwnerKind::Organization
        }
    }

    pub fn into_owner(self) -> Owner {
        let kind = self.kind();
        let mut tags = vec![tag("type", kind.as_str())];
        if let Some(location) = self.location.as_deref() {
            for place in resource::locate(location) {
                tags.push(tag("location", &place));
            }
        }
        Owner {
            login: self.login,
            name: self.name.unwrap_or_default(),
            avatar_url: self.avatar_url,
            created_at: self.created_at.unwrap_or(DateTime::UNIX_EPOCH),
            location: self.location.unwrap_or_default(),
            followers: self.followers.map(Items::from),
            gists: Vec::new(),
            repositories: Vec::new(),
            tags,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GistNode {
    pub name: String,
    pub forks: ItemsNode,
    pub stargazers: ItemsNode,
}

impl From<GistNode> for Gist {
    fn from(node: GistNode) -> Self {
        Gist {
            name: node.name,
            forks: node.forks.into(),
            stargazers: node.stargazers.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepositoryNode {
    pub name_with_owner: String,
    pub name: String,
    pub owner: RepoOwnerNode,
    pub created_at: Option<DateTime<Utc>>,
    pub open_graph_image_url: String,
    pub primary_language: Option<LanguageNode>,
    pub forks: ItemsNode,
    pub stargazers: ItemsNode,
    pub watchers: ItemsNode,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoOwnerNode {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguageNode {
    #[serde(default)]
    pub name: String,
}

impl From<RepositoryNode> for Repository {
    fn from(node: RepositoryNode) -> Self {
        Repository {
            name_with_owner: node.name_with_owner,
            name: node.name,
            owner: RepoOwner {
                login: node.owner.login,
            },
            created_at: node.created_at.unwrap_or(DateTime::UNIX_EPOCH),
            open_graph_image_url: node.open_graph_image_url,
            primary_language: node.primary_language.map(|l| PrimaryLanguage { name: l.name }),
            forks: node.forks.into(),
            stargazers: node.stargazers.into(),
            watchers: node.watchers.into(),
            tags: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TYPE_ORGANIZATION, TYPE_USER};

    const USER_SEARCH_PAGE: &str = r#"{
      "data": {
        "search": {
          "edges": [
            {
              "cursor": "Y3Vyc29yOjE=",
              "node": {
                "avatarUrl": "https://avatars.example/u/1",
                "createdAt": "2008-01-14T04:33:35Z",
                "followers": { "totalCount": 21 },
                "location": "Taipei, Taiwan",
                "login": "mojombo",
                "name": "Tom"
              }
            },
            {
              "cursor": "Y3Vyc29yOjI=",
              "node": {
                "avatarUrl": "https://avatars.example/o/2",
                "createdAt": "2008-05-11T04:37:31Z",
                "location": "San Francisco",
                "login": "github",
                "name": "GitHub"
              }
            }
          ],
          "pageInfo": { "endCursor": "Y3Vyc29yOjI=", "hasNextPage": true }
        },
        "rateLimit": {
          "cost": 1,
          "limit": 5000,
          "nodeCount": 100,
          "remaining": 4999,
          "resetAt": "2021-01-01T00:00:00Z",
          "used": 1
        }
      }
    }"#;

    #[test]
    fn test_decode_owner_search_page() {
        let res: Response<SearchData<OwnerNode>> =
            serde_json::from_str(USER_SEARCH_PAGE).unwrap();
        assert!(res.errors.is_empty());
        assert!(res.message.is_empty());

        let data = res.data.unwrap();
        assert_eq!(data.rate_limit.remaining, 4999);
        assert_eq!(data.search.page_info.end_cursor.as_deref(), Some("Y3Vyc29yOjI="));
        assert!(data.search.page_info.has_next_page);

        let nodes = data.search.nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].kind(), OwnerKind::User);
        assert_eq!(nodes[1].kind(), OwnerKind::Organization);
    }

    #[test]
    fn test_owner_conversion_tags_kind_and_location() {
        let res: Response<SearchData<OwnerNode>> =
            serde_json::from_str(USER_SEARCH_PAGE).unwrap();
        let nodes = res.data.unwrap().search.nodes();

        let user = nodes[0].clone().into_owner();
        assert_eq!(user.login, "mojombo");
        assert!(user.tags.contains(&tag("type", TYPE_USER)));
        assert!(user.tags.contains(&tag("location", "Taiwan")));
        assert!(user.tags.contains(&tag("location", "Taipei, Taiwan")));
        assert_eq!(user.followers, Some(Items::new(21)));

        let org = nodes[1].clone().into_owner();
        assert!(org.tags.contains(&tag("type", TYPE_ORGANIZATION)));
        assert!(org.followers.is_none());
        assert!(org.tags.contains(&tag("location", "United States")));
        assert!(org
            .tags
            .contains(&tag("location", "San Francisco, United States")));
    }

    #[test]
    fn test_decode_upstream_soft_failure() {
        let body = r#"{"data": null, "message": "Something went wrong"}"#;
        let res: Response<SearchData<OwnerNode>> = serde_json::from_str(body).unwrap();
        assert!(res.data.is_none());
        assert_eq!(res.message, "Something went wrong");
    }

    #[test]
    fn test_decode_graphql_errors() {
        let body = r#"{
          "data": null,
          "errors": [
            {"type": "RATE_LIMITED", "message": "API rate limit exceeded",
             "locations": [{"line": 2, "column": 3}]}
          ]
        }"#;
        let res: Response<SearchData<OwnerNode>> = serde_json::from_str(body).unwrap();
        assert_eq!(res.errors.len(), 1);
        assert_eq!(res.errors[0].kind, "RATE_LIMITED");
        assert_eq!(res.errors[0].locations[0].line, 2);
    }

    #[test]
    fn test_repository_node_conversion() {
        let body = r#"{
          "nameWithOwner": "golang/go",
          "name": "go",
          "owner": {"login": "golang"},
          "createdAt": "2014-08-19T04:33:40Z",
          "openGraphImageUrl": "https://images.example/golang",
          "primaryLanguage": {"name": "Go"},
          "forks": {"totalCount": 16000},
          "stargazers": {"totalCount": 110000},
          "watchers": {"totalCount": 3400}
        }"#;
        let node: RepositoryNode = serde_json::from_str(body).unwrap();
        let repo = Repository::from(node);
        assert_eq!(repo.name_with_owner, "golang/go");
        assert_eq!(repo.owner.login, "golang");
        assert_eq!(repo.primary_language.as_ref().unwrap().name, "Go");
        assert_eq!(repo.stargazers.total_count, 110_000);
    }
}
