//! CSS-selector page extractor
//!
//! # Link Extraction Rules
//!
//! **Include:** elements matched by the configured selector carrying an
//! `href`, resolved against the page URL.
//!
//! **Exclude:**
//! - `javascript:`, `mailto:`, `tel:` links
//! - Data URIs and fragment-only links
//! - Non-HTTP(S) URLs after resolution
//! - Duplicates within one page

use crate::config::{FieldConfig, SelectorConfig};
use crate::extract::{Extraction, Link, PageExtractor, PageKind};
use crate::model::Attributes;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

struct FieldRule {
    name: String,
    selector: Selector,
    attr: Option<String>,
    strip: Option<String>,
}

/// Extracts links and detail fields with CSS selectors
pub struct SelectorExtractor {
    category: Selector,
    subcategory: Selector,
    item: Selector,
    table_rows: Option<Selector>,
    fields: Vec<FieldRule>,
    field_names: Vec<String>,
    header_cell: Selector,
    value_cell: Selector,
}

impl SelectorExtractor {
    /// Compiles every selector of the configuration
    pub fn from_config(config: &SelectorConfig) -> Result<Self, ConfigError> {
        let fields = config
            .fields
            .iter()
            .map(compile_field)
            .collect::<Result<Vec<_>, _>>()?;
        let field_names = config.fields.iter().map(|f| f.name.clone()).collect();

        Ok(Self {
            category: compile("category", &config.category)?,
            subcategory: compile("subcategory", &config.subcategory)?,
            item: compile("item", &config.item)?,
            table_rows: config
                .table_rows
                .as_deref()
                .map(|rows| compile("table_rows", rows))
                .transpose()?,
            fields,
            field_names,
            header_cell: compile("header cell", "th")?,
            value_cell: compile("value cell", "td")?,
        })
    }

    fn links(&self, document: &Html, selector: &Selector, base_url: &Url) -> Extraction {
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for element in document.select(selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Some(url) = resolve_link(href, base_url) else {
                continue;
            };
            if !seen.insert(url.to_string()) {
                continue;
            }

            links.push(Link {
                label: link_label(&element, &url),
                url,
            });
        }

        if links.is_empty() {
            Extraction::NotFound
        } else {
            Extraction::Links(links)
        }
    }

    fn detail(&self, document: &Html, base_url: &Url) -> Extraction {
        let mut attributes = Attributes::new();

        if let Some(rows) = &self.table_rows {
            for row in document.select(rows) {
                let key = row.select(&self.header_cell).next().map(|c| element_text(&c));
                let value = row.select(&self.value_cell).next().map(|c| element_text(&c));
                if let (Some(key), Some(value)) = (key, value) {
                    if !key.is_empty() {
                        attributes.insert(key, value);
                    }
                }
            }
        }

        // Named fields win over table rows with the same key
        for rule in &self.fields {
            if let Some(value) = extract_field(document, rule, base_url) {
                attributes.insert(rule.name.clone(), value);
            }
        }

        if attributes.is_empty() {
            Extraction::NotFound
        } else {
            Extraction::Detail(attributes)
        }
    }
}

impl PageExtractor for SelectorExtractor {
    fn extract(&self, content: &str, page_url: &Url, kind: PageKind) -> Extraction {
        let document = Html::parse_document(content);

        match kind {
            PageKind::Landing => self.links(&document, &self.category, page_url),
            PageKind::Category => self.links(&document, &self.subcategory, page_url),
            PageKind::Listing => self.links(&document, &self.item, page_url),
            PageKind::Detail => self.detail(&document, page_url),
        }
    }

    fn detail_fields(&self) -> &[String] {
        &self.field_names
    }
}

fn compile(name: &str, selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|e| ConfigError::InvalidSelector(format!("{} '{}': {:?}", name, selector, e)))
}

fn compile_field(field: &FieldConfig) -> Result<FieldRule, ConfigError> {
    Ok(FieldRule {
        name: field.name.clone(),
        selector: compile(&field.name, &field.selector)?,
        attr: field.attr.clone(),
        strip: field.strip.clone().filter(|s| !s.is_empty()),
    })
}

/// Reads a field from its first matching element
///
/// `href` and `src` attributes are resolved to absolute URLs.
fn extract_field(document: &Html, rule: &FieldRule, base_url: &Url) -> Option<String> {
    let element = document.select(&rule.selector).next()?;

    let value = match rule.attr.as_deref() {
        Some(attr @ ("href" | "src")) => {
            let raw = element.value().attr(attr)?;
            base_url
                .join(raw.trim())
                .map(|u| u.to_string())
                .unwrap_or_else(|_| raw.trim().to_string())
        }
        Some(attr) => element.value().attr(attr)?.trim().to_string(),
        None => element_text(&element),
    };

    let value = match rule.strip.as_deref() {
        Some(strip) => value.replace(strip, "").trim().to_string(),
        None => value,
    };

    Some(value).filter(|v| !v.is_empty())
}

/// Collapses the text content of an element into single-spaced text
fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prefers visible text, then the `title` attribute, then the URL path
fn link_label(element: &ElementRef<'_>, url: &Url) -> String {
    let text = element_text(element);
    if !text.is_empty() {
        return text;
    }

    element
        .value()
        .attr("title")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.path().to_string())
}

/// Resolves a link href to an absolute URL and validates it
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    match absolute_url.scheme() {
        "http" | "https" => Some(absolute_url),
        _ => None,
    }
}
