//! Page, title, and index record types shared by the checker and remediators.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Authoritative store identifier of a page.
pub type PageId = u64;

/// Namespace of the main (article) space.
pub const NS_MAIN: i64 = 0;

/// Namespace of generated special pages. Never stored, never indexed.
pub const NS_SPECIAL: i64 = -1;

/// Longest title text accepted, in bytes.
const MAX_TITLE_BYTES: usize = 255;

/// Characters that may never appear in a title.
const ILLEGAL_TITLE_CHARS: &[char] = &['#', '<', '>', '[', ']', '|', '{', '}'];

/// Canonical namespace names used when rendering prefixed titles.
const NAMESPACE_NAMES: &[(i64, &str)] = &[
    (-2, "Media"),
    (NS_SPECIAL, "Special"),
    (1, "Talk"),
    (2, "User"),
    (3, "User talk"),
    (4, "Project"),
    (5, "Project talk"),
    (6, "File"),
    (7, "File talk"),
    (8, "MediaWiki"),
    (9, "MediaWiki talk"),
    (10, "Template"),
    (11, "Template talk"),
    (12, "Help"),
    (13, "Help talk"),
    (14, "Category"),
    (15, "Category talk"),
];

/// A namespaced page title.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Title {
    pub namespace: i64,
    pub text: String,
}

impl Title {
    /// Build a title without validating it.
    pub fn new(namespace: i64, text: impl Into<String>) -> Self {
        Self {
            namespace,
            text: text.into(),
        }
    }

    /// Build a title, returning `None` if the text is not a valid title.
    pub fn new_safe(namespace: i64, text: &str) -> Option<Self> {
        let title = Self::new(namespace, text);
        title.is_valid().then_some(title)
    }

    /// Placeholder used for index documents whose title cannot be rebuilt.
    pub fn bad_title() -> Self {
        Self::new(NS_SPECIAL, "Badtitle/InvalidInDBOrElastic")
    }

    pub fn is_valid(&self) -> bool {
        let text = self.text.as_str();
        !text.is_empty()
            && text.len() <= MAX_TITLE_BYTES
            && !text.starts_with(':')
            && text.trim() == text
            && !text.chars().any(|c| c.is_control() || ILLEGAL_TITLE_CHARS.contains(&c))
    }

    /// Title text with its namespace prefix, e.g. `Talk:Foo`.
    pub fn prefixed_text(&self) -> String {
        if self.namespace == NS_MAIN {
            return self.text.clone();
        }
        match NAMESPACE_NAMES.iter().find(|(ns, _)| *ns == self.namespace) {
            Some((_, name)) => format!("{name}:{}", self.text),
            None => format!("Ns{}:{}", self.namespace, self.text),
        }
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixed_text())
    }
}

/// A page as read from the authoritative store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub title: Title,
    /// Revision id of the latest revision.
    pub latest_revision: u64,
    /// Redirect flag from the page table.
    #[serde(default)]
    pub is_redirect: bool,
    /// Redirect flag of the loaded content, `None` when content is unavailable.
    #[serde(default)]
    pub content_redirect: Option<bool>,
}

impl Page {
    pub fn new(id: PageId, title: Title, latest_revision: u64) -> Self {
        Self {
            id,
            title,
            latest_revision,
            is_redirect: false,
            content_redirect: Some(false),
        }
    }

    /// Mark the page as a redirect in both the page table and its content.
    #[must_use]
    pub fn into_redirect(mut self) -> Self {
        self.is_redirect = true;
        self.content_redirect = Some(true);
        self
    }
}

/// Minimal view of one index document, as returned by an index lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub doc_id: String,
    /// Concrete index name the document lives in, e.g. `enwiki_content_1700000000`.
    pub index: String,
    pub namespace: i64,
    pub title: String,
    /// Revision id the document was built from.
    #[serde(default)]
    pub version: Option<u64>,
}

/// Outcome of classifying one page against one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    Sane,
    RedirectInIndex,
    PageNotInIndex,
    GhostPageInIndex,
    PageInWrongIndex,
    OldVersionInIndex,
    OldDocument,
}

impl DriftKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sane => "sane",
            Self::RedirectInIndex => "redirect_in_index",
            Self::PageNotInIndex => "page_not_in_index",
            Self::GhostPageInIndex => "ghost_page_in_index",
            Self::PageInWrongIndex => "page_in_wrong_index",
            Self::OldVersionInIndex => "old_version_in_index",
            Self::OldDocument => "old_document",
        }
    }

    pub fn is_sane(self) -> bool {
        self == Self::Sane
    }
}

impl fmt::Display for DriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
