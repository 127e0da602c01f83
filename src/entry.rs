use serde::{Deserialize, Serialize};

use crate::identity::identify;

/// A link discovered on the source page, in page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub id: String,
    pub link: String,
}

impl SourceItem {
    pub fn new(link: impl Into<String>) -> Self {
        let link = link.into();
        Self { id: identify(&link), link }
    }
}

/// Metadata returned by the remote API. All-empty means the fetch failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Details {
    pub title: String,
    pub abstract_text: String,
    pub authors: String,
    pub pubdate: Option<String>,
}

/// One paper. Empty strings mean "not yet known".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub link: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub pubdate: Option<String>,
}

impl Entry {
    /// Full replacement of the content fields for a source item.
    pub fn from_details(item: &SourceItem, details: Details) -> Self {
        Self {
            id: item.id.clone(),
            link: item.link.clone(),
            title: details.title,
            abstract_text: details.abstract_text,
            authors: details.authors,
            pubdate: details.pubdate,
        }
    }

    pub fn is_complete(&self) -> bool {
        is_complete(self)
    }
}

fn filled(s: &str) -> bool {
    !s.trim().is_empty()
}

/// True iff title, abstract, authors and pubdate are all present and non-blank.
///
/// This is the only place completeness is decided: reconciliation uses it to
/// pick entries for refetching and the HTML page uses it to pick what to show.
pub fn is_complete(entry: &Entry) -> bool {
    filled(&entry.title)
        && filled(&entry.abstract_text)
        && filled(&entry.authors)
        && entry.pubdate.as_deref().is_some_and(filled)
}
