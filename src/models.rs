use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// What the caller knows about the book they want. At least one field must
/// be populated; a valid ISBN takes precedence over the text fields and
/// routes the lookup straight to the product page, bypassing ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub isbn: Option<String>,
}

impl SearchQuery {
    pub fn from_title(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            ..Self::default()
        }
    }

    pub fn has_text(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self.authors.iter().any(|a| !a.trim().is_empty())
    }
}

/// One entry scraped off a search results page. Ephemeral: consumed by the
/// ranker immediately after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    /// Absolute URL of the product page; doubles as the catalog id.
    pub product_url: String,
    pub title: String,
    pub author: String,
    pub thumbnail_url: Option<String>,
    /// Position in the parsed result sequence, used as the stable tie-break
    /// when two candidates score identically.
    pub position: usize,
}

/// A candidate with its similarity score against the query, in [0, 1].
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: RawCandidate,
    pub score: f64,
}

/// Series membership parsed from a product page, e.g. "Book 2 - Dune".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub index: Option<f64>,
}

/// Fully-populated metadata record for one matched book. Fields the store
/// did not publish stay `None` rather than defaulting to empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub synopsis: Option<String>,
    pub publisher: Option<String>,
    pub published: Option<NaiveDate>,
    pub language: Option<String>,
    pub isbn: Option<String>,
    pub series: Option<Series>,
    pub tags: Vec<String>,
    pub cover_url: Option<String>,
    pub product_url: String,
}
