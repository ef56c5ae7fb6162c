//! Page extraction
//!
//! The pipeline treats extraction as a pure, synchronous step: raw content
//! goes in, links or detail attributes come out, and a miss is a value, not an
//! error. [`SelectorExtractor`] implements it with configurable CSS selectors.

mod selectors;

pub use selectors::SelectorExtractor;

use crate::model::Attributes;
use url::Url;

/// The role of a page within a catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    /// Landing page listing the top-level categories
    Landing,
    /// Category page listing its subcategories
    Category,
    /// One page of a paginated item listing
    Listing,
    /// Detail page of a single item
    Detail,
}

/// A labelled absolute link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub label: String,
    pub url: Url,
}

/// Outcome of extracting one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Links found on a landing, category or listing page
    Links(Vec<Link>),
    /// Attributes found on a detail page
    Detail(Attributes),
    /// Nothing the extractor looks for is present
    NotFound,
}

impl Extraction {
    /// Returns the extracted links, or an empty list for any other outcome
    pub fn into_links(self) -> Vec<Link> {
        match self {
            Self::Links(links) => links,
            _ => Vec::new(),
        }
    }
}

/// Turns raw page content into structured data
///
/// Implementations must not perform I/O and must signal misses through
/// [`Extraction::NotFound`] instead of failing.
pub trait PageExtractor: Send + Sync {
    fn extract(&self, content: &str, page_url: &Url, kind: PageKind) -> Extraction;

    /// Names of the attributes every detail record carries
    fn detail_fields(&self) -> &[String];
}
