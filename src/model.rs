//! Work items and records flowing through the pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Value stored for any attribute that could not be obtained
pub const UNAVAILABLE: &str = "unavailable";

/// Attribute key holding the detail page URL of every record
pub const SOURCE_URL_KEY: &str = "source_url";

/// Extracted attribute map, ordered by key
pub type Attributes = BTreeMap<String, String>;

/// A discovered reference to one detail page awaiting enrichment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Natural key of the item (detail URL without query or fragment)
    pub identifier: String,

    /// Detail page to fetch
    pub source_url: String,

    /// Category grouping the item was discovered under
    pub group_label: String,
}

impl WorkItem {
    /// Creates a work item from a discovered detail link
    pub fn from_url(url: &Url, group_label: impl Into<String>) -> Self {
        Self {
            identifier: natural_key_for(url),
            source_url: url.to_string(),
            group_label: group_label.into(),
        }
    }
}

/// Derives the natural key of a detail URL
///
/// Query strings and fragments are dropped so that the same item reached
/// through different listing pages maps to one key.
pub fn natural_key_for(url: &Url) -> String {
    let mut key = url.clone();
    key.set_query(None);
    key.set_fragment(None);
    key.to_string()
}

/// A fully enriched, storage-ready result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub natural_key: String,
    pub attributes: Attributes,
    pub group_label: String,
}

impl Record {
    /// Builds a record from a work item and the attributes extracted from its
    /// detail page
    ///
    /// Every name in `fields` is present in the result; fields the extractor
    /// did not produce hold [`UNAVAILABLE`]. Extra extracted attributes are
    /// kept as they are.
    pub fn from_item(item: &WorkItem, fields: &[String], extracted: Option<Attributes>) -> Self {
        let mut attributes = extracted.unwrap_or_default();

        for field in fields {
            attributes
                .entry(field.clone())
                .or_insert_with(|| UNAVAILABLE.to_string());
        }

        attributes.insert(SOURCE_URL_KEY.to_string(), item.source_url.clone());

        Self {
            natural_key: item.identifier.clone(),
            attributes,
            group_label: item.group_label.clone(),
        }
    }

    /// Builds a record whose detail fields are all unavailable
    pub fn unavailable(item: &WorkItem, fields: &[String]) -> Self {
        Self::from_item(item, fields, None)
    }

    /// Returns true if any attribute holds the unavailable sentinel
    pub fn has_unavailable(&self) -> bool {
        self.attributes.values().any(|v| v == UNAVAILABLE)
    }

    /// The detail page URL this record was built from
    pub fn source_url(&self) -> Option<&str> {
        self.attributes.get(SOURCE_URL_KEY).map(String::as_str)
    }
}
