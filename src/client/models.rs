//! Wire types of the Bitbucket Cloud 2.0 API, limited to the fields the
//! collectors aggregate.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Envelope shared by every paginated endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct PaginatedResponse<T> {
    #[serde(default)]
    pub pagelen: u64,

    /// Absolute URL of the next page, absent or null on the last page.
    #[serde(default)]
    pub next: Option<String>,

    #[serde(default = "Vec::new")]
    pub values: Vec<T>,

    /// Total number of items across all pages, as reported by the API.
    #[serde(default)]
    pub size: u64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Repository {
    pub uuid: String,
    pub slug: String,
    pub name: String,
    pub full_name: String,
    pub language: String,
    pub workspace: Workspace,
    pub project: Option<Project>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    pub size: u64,
    pub has_issues: bool,
    pub has_wiki: bool,
    pub is_private: bool,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Workspace {
    pub uuid: String,
    pub slug: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Project {
    pub uuid: String,
    pub key: String,
    pub name: String,
}

impl Repository {
    /// `workspace/slug`, the form used by the inclusion lists.
    pub fn qualified_slug(&self) -> String {
        format!("{}/{}", self.workspace.slug, self.slug)
    }

    /// Identity used to key accumulated state; the uuid, or the full name for
    /// payloads that carry none.
    pub fn key(&self) -> &str {
        if self.uuid.is_empty() { &self.full_name } else { &self.uuid }
    }

    /// Key of the owning project, empty for repositories outside a project.
    pub fn project_key(&self) -> &str {
        self.project.as_ref().map_or("", |p| p.key.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    Branch,
    Tag,
}

impl RefKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::Tag => "tag",
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Commit {
    pub hash: String,
    pub author: Author,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Author {
    /// `Name <email>` as recorded in the commit.
    pub raw: String,
    /// Present only when the author is linked to a Bitbucket account.
    pub user: Option<User>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct User {
    pub uuid: String,
    pub display_name: String,
    pub nickname: String,
}

impl Author {
    /// Stable identity and display name of the author. Unlinked authors are
    /// identified by their raw signature.
    pub fn identity(&self) -> (&str, &str) {
        match &self.user {
            Some(user) if !user.uuid.is_empty() => (user.uuid.as_str(), user.display_name.as_str()),
            _ => (self.raw.as_str(), self.raw.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_repository_page() {
        let body = r#"{
            "pagelen": 10,
            "size": 1,
            "next": null,
            "values": [{
                "uuid": "{r-1}",
                "slug": "api",
                "name": "API",
                "full_name": "acme/api",
                "language": "rust",
                "workspace": {"uuid": "{w-1}", "slug": "acme", "name": "Acme"},
                "project": {"uuid": "{p-1}", "key": "CORE", "name": "Core"},
                "created_on": "2021-03-04T10:11:12.123456+00:00",
                "updated_on": "2024-01-02T03:04:05+00:00",
                "size": 2048,
                "has_issues": true,
                "has_wiki": false,
                "is_private": true,
                "mainbranch": {"name": "main"}
            }]
        }"#;

        let page: PaginatedResponse<Repository> = serde_json::from_str(body).unwrap();
        assert_eq!(page.pagelen, 10);
        assert!(page.next.is_none());

        let repo = &page.values[0];
        assert_eq!(repo.qualified_slug(), "acme/api");
        assert_eq!(repo.project_key(), "CORE");
        assert_eq!(repo.created_on.timestamp(), 1_614_852_672);
        assert_eq!(repo.size, 2048);
        assert!(repo.is_private);
    }

    #[test]
    fn test_repository_without_project() {
        let repo: Repository =
            serde_json::from_str(r#"{"uuid": "{r}", "slug": "dotfiles", "project": null}"#).unwrap();
        assert_eq!(repo.project_key(), "");
    }

    #[test]
    fn test_envelope_defaults() {
        let page: PaginatedResponse<serde_json::Value> = serde_json::from_str("{}").unwrap();
        assert_eq!(page.size, 0);
        assert!(page.values.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn test_author_identity() {
        let linked: Author = serde_json::from_str(
            r#"{"raw": "Ann <ann@x>", "user": {"uuid": "{u-1}", "display_name": "Ann", "nickname": "ann"}}"#,
        )
        .unwrap();
        assert_eq!(linked.identity(), ("{u-1}", "Ann"));

        let unlinked: Author = serde_json::from_str(r#"{"raw": "Bot <bot@x>"}"#).unwrap();
        assert_eq!(unlinked.identity(), ("Bot <bot@x>", "Bot <bot@x>"));
    }
}
