//! GraphQL query documents and their argument rendering.
//!
//! Templates carry `<SearchArguments>`-style placeholders that are
//! substituted with rendered argument lists before the document is
//! posted. Arguments render as `name:value` pairs, empty values
//! omitted, so the same template serves the first page and every
//! cursor continuation.

use chrono::{DateTime, SecondsFormat, Utc};

/// Hard per-page cap imposed by the upstream search API.
pub const PER_PAGE: i64 = 100;

/// A renderable query: a template plus the argument sets it needs.
#[derive(Debug, Clone, Default)]
pub struct Query {
    schema: &'static str,
    /// Substituted for `<Field>`: `user` or `organization`.
    pub field: &'static str,
    pub search: SearchArguments,
    pub owner: OwnerArguments,
    pub gists: GistsArguments,
    pub repositories: RepositoriesArguments,
}

impl Query {
    /// Search for users and organizations created inside a window.
    pub fn owners() -> Self {
        Self {
            schema: OWNERS_SCHEMA,
            search: SearchArguments {
                first: PER_PAGE,
                kind: "USER",
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Search for repositories created inside a window.
    pub fn repositories() -> Self {
        Self {
            schema: REPOSITORIES_SCHEMA,
            search: SearchArguments {
                first: PER_PAGE,
                kind: "REPOSITORY",
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// A user's gists, oldest first.
    pub fn owner_gists(login: &str) -> Self {
        Self {
            schema: OWNER_GISTS_SCHEMA,
            owner: OwnerArguments {
                login: quote(login),
            },
            gists: GistsArguments {
                first: PER_PAGE,
                order_by: "{field:CREATED_AT,direction:ASC}",
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// An owner's repositories, oldest first. `field` picks the
    /// `user` or `organization` root.
    pub fn owner_repositories(field: &'static str, login: &str) -> Self {
        Self {
            schema: OWNER_REPOSITORIES_SCHEMA,
            field,
            owner: OwnerArguments {
                login: quote(login),
            },
            repositories: RepositoriesArguments {
                first: PER_PAGE,
                order_by: "{field:CREATED_AT,direction:ASC}",
                owner_affiliations: "OWNER",
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn render(&self) -> String {
        self.schema
            .replace("<Field>", self.field)
            .replace("<SearchArguments>", &self.search.render())
            .replace("<OwnerArguments>", &self.owner.render())
            .replace("<GistsArguments>", &self.gists.render())
            .replace("<RepositoriesArguments>", &self.repositories.render())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchArguments {
    pub after: String,
    pub first: i64,
    pub query: String,
    pub kind: &'static str,
}

impl SearchArguments {
    fn render(&self) -> String {
        join(&[
            ("after", self.after.clone()),
            ("first", render_int(self.first)),
            ("query", self.query.clone()),
            ("type", self.kind.to_string()),
        ])
    }
}

#[derive(Debug, Clone, Default)]
pub struct OwnerArguments {
    pub login: String,
}

impl OwnerArguments {
    fn render(&self) -> String {
        join(&[("login", self.login.clone())])
    }
}

#[derive(Debug, Clone, Default)]
pub struct GistsArguments {
    pub after: String,
    pub first: i64,
    pub order_by: &'static str,
}

impl GistsArguments {
    fn render(&self) -> String {
        join(&[
            ("after", self.after.clone()),
            ("first", render_int(self.first)),
            ("orderBy", self.order_by.to_string()),
        ])
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepositoriesArguments {
    pub after: String,
    pub first: i64,
    pub order_by: &'static str,
    pub owner_affiliations: &'static str,
}

impl RepositoriesArguments {
    fn render(&self) -> String {
        join(&[
            ("after", self.after.clone()),
            ("first", render_int(self.first)),
            ("orderBy", self.order_by.to_string()),
            ("ownerAffiliations", self.owner_affiliations.to_string()),
        ])
    }
}

/// Search filter for the owner traveller:
/// `created:<from>..<to> repos:>=5 sort:joined-asc`.
pub fn owner_search_filter(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!(
        "created:{}..{} repos:>=5 sort:joined-asc",
        rfc3339(from),
        rfc3339(to)
    )
}

/// Search filter for the repository traveller:
/// `created:<from>..<to> fork:true stars:>=100 sort:stars`.
pub fn repository_search_filter(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!(
        "created:{}..{} fork:true stars:>=100 sort:stars",
        rfc3339(from),
        rfc3339(to)
    )
}

/// Quote a string value for interpolation into a query document.
pub fn quote(value: &str) -> String {
    format!("{:?}", value)
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn render_int(value: i64) -> String {
    if value == 0 {
        String::new()
    } else {
        value.to_string()
    }
}

fn join(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| format!("{}:{}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

const OWNERS_SCHEMA: &str = "query {
  search(<SearchArguments>) {
    edges {
      cursor
      node {
        ... on User {
          avatarUrl
          createdAt
          followers {
            totalCount
          }
          location
          login
          name
        }
        ... on Organization {
          avatarUrl
          createdAt
          location
          login
          name
        }
      }
    }
    pageInfo {
      endCursor
      hasNextPage
    }
  }
  rateLimit {
    cost
    limit
    nodeCount
    remaining
    resetAt
    used
  }
}";

const REPOSITORIES_SCHEMA: &str = "query {
  search(<SearchArguments>) {
    edges {
      cursor
      node {
        ... on Repository {
          createdAt
          forks {
            totalCount
          }
          name
          nameWithOwner
          openGraphImageUrl
          owner {
            login
          }
          primaryLanguage {
            name
          }
          stargazers {
            totalCount
          }
          watchers {
            totalCount
          }
        }
      }
    }
    pageInfo {
      endCursor
      hasNextPage
    }
  }
  rateLimit {
    cost
    limit
    nodeCount
    remaining
    resetAt
    used
  }
}";

const OWNER_GISTS_SCHEMA: &str = "query {
  owner: user(<OwnerArguments>) {
    gists(<GistsArguments>) {
      edges {
        cursor
        node {
          forks {
            totalCount
          }
          name
          stargazers {
            totalCount
          }
        }
      }
      pageInfo {
        endCursor
        hasNextPage
      }
    }
  }
  rateLimit {
    cost
    limit
    nodeCount
    remaining
    resetAt
    used
  }
}";

const OWNER_REPOSITORIES_SCHEMA: &str = "query {
  owner: <Field>(<OwnerArguments>) {
    repositories(<RepositoriesArguments>) {
      edges {
        cursor
        node {
          createdAt
          forks {
            totalCount
          }
          name
          nameWithOwner
          openGraphImageUrl
          owner {
            login
          }
          primaryLanguage {
            name
          }
          stargazers {
            totalCount
          }
          watchers {
            totalCount
          }
        }
      }
      pageInfo {
        endCursor
        hasNextPage
      }
    }
  }
  rateLimit {
    cost
    limit
    nodeCount
    remaining
    resetAt
    used
  }
}";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_owner_search_filter() {
        let from = Utc.with_ymd_and_hms(2007, 10, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2007, 10, 8, 0, 0, 0).unwrap();
        assert_eq!(
            owner_search_filter(from, to),
            "created:2007-10-01T00:00:00Z..2007-10-08T00:00:00Z repos:>=5 sort:joined-asc"
        );
    }

    #[test]
    fn test_repository_search_filter() {
        let from = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2020, 1, 8, 0, 0, 0).unwrap();
        assert_eq!(
            repository_search_filter(from, to),
            "created:2020-01-01T00:00:00Z..2020-01-08T00:00:00Z fork:true stars:>=100 sort:stars"
        );
    }

    #[test]
    fn test_search_arguments_render_omits_empty() {
        let mut q = Query::owners();
        q.search.query = quote("created:2020-01-01..2020-01-08 repos:>=5");
        let rendered = q.render();
        assert!(rendered.contains(
            r#"search(first:100, query:"created:2020-01-01..2020-01-08 repos:>=5", type:USER)"#
        ));
        assert!(!rendered.contains("after:"));
    }

    #[test]
    fn test_search_arguments_render_with_cursor() {
        let mut q = Query::repositories();
        q.search.query = quote("stars:>=100");
        q.search.after = quote("Y3Vyc29yOjEwMA==");
        let rendered = q.render();
        assert!(rendered
            .contains(r#"search(after:"Y3Vyc29yOjEwMA==", first:100, query:"stars:>=100", type:REPOSITORY)"#));
    }

    #[test]
    fn test_owner_repositories_aliases_root_field() {
        let q = Query::owner_repositories("organization", "github");
        let rendered = q.render();
        assert!(rendered.contains(r#"owner: organization(login:"github")"#));
        assert!(rendered.contains(
            "repositories(first:100, orderBy:{field:CREATED_AT,direction:ASC}, ownerAffiliations:OWNER)"
        ));
    }

    #[test]
    fn test_owner_gists_query() {
        let q = Query::owner_gists("octocat");
        let rendered = q.render();
        assert!(rendered.contains(r#"owner: user(login:"octocat")"#));
        assert!(rendered.contains("gists(first:100, orderBy:{field:CREATED_AT,direction:ASC})"));
        assert!(rendered.contains("rateLimit"));
    }
}
