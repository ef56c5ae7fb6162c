use crate::fetch::Backoff;
use serde::Deserialize;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub selectors: SelectorConfig,
}

/// Where to harvest from and how to paginate
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Landing page listing the top-level categories
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Query parameter carrying the page number on listing pages
    #[serde(rename = "page-param", default = "default_page_param")]
    pub page_param: String,

    /// Relative page URL template with a `{page}` placeholder
    ///
    /// When set it takes precedence over `page-param`.
    #[serde(rename = "page-template", default)]
    pub page_template: Option<String>,

    /// Hard cap on listing pages fetched per subcategory
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_max_pages() -> u32 {
    1000
}

/// Fetch client and retry policy configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Total attempts per URL, including the first one
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Seconds to wait between attempts
    #[serde(rename = "retry-delay-secs")]
    pub retry_delay_secs: u64,

    /// Fixed or exponential delay growth
    pub backoff: Backoff,

    /// Per-request timeout in seconds
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// User agent sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 5,
            backoff: Backoff::Fixed,
            timeout_secs: 30,
            user_agent: format!("catalog-harvester/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Parallelism and queue sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent category/subcategory discovery tasks
    pub discovery: usize,

    /// Detail workers; 0 selects twice the available parallelism
    pub detail: usize,

    /// Worker processes used by the fan-out mode
    pub fanout: usize,

    #[serde(rename = "work-queue-capacity")]
    pub work_queue_capacity: usize,

    #[serde(rename = "persist-queue-capacity")]
    pub persist_queue_capacity: usize,

    /// Lower bound of the pause between detail fetches (milliseconds)
    #[serde(rename = "politeness-min-ms")]
    pub politeness_min_ms: u64,

    /// Upper bound of the pause between detail fetches (milliseconds)
    #[serde(rename = "politeness-max-ms")]
    pub politeness_max_ms: u64,

    /// How long fan-out workers may linger after their end marker
    #[serde(rename = "join-grace-secs")]
    pub join_grace_secs: u64,
}

impl WorkerConfig {
    /// Resolves the detail worker count
    pub fn detail_workers(&self) -> usize {
        if self.detail > 0 {
            return self.detail;
        }

        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(2)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            discovery: 3,
            detail: 0,
            fanout: 4,
            work_queue_capacity: 256,
            persist_queue_capacity: 256,
            politeness_min_ms: 0,
            politeness_max_ms: 0,
            join_grace_secs: 10,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path of the JSON export written by the fan-out mode
    #[serde(rename = "export-path")]
    pub export_path: String,
}

/// CSS selectors driving the page extractor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Category links on the landing page
    pub category: String,

    /// Subcategory links on a category page
    pub subcategory: String,

    /// Detail links on a listing page
    pub item: String,

    /// Rows of a key/value table on detail pages (`th` is the key, `td` the value)
    #[serde(rename = "table-rows")]
    pub table_rows: Option<String>,

    /// Named detail fields
    #[serde(rename = "field")]
    pub fields: Vec<FieldConfig>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            category: "div.side_categories ul li ul li a".to_string(),
            subcategory: "div.subcategories a".to_string(),
            item: "article.product_pod h3 a".to_string(),
            table_rows: Some("table.table.table-striped tr".to_string()),
            fields: vec![
                FieldConfig::text("title", "div.product_main h1"),
                FieldConfig::text("price", "p.price_color"),
                FieldConfig::text("stock", "p.instock.availability"),
                FieldConfig::attr("rating", "p.star-rating", "class").with_strip("star-rating"),
                FieldConfig::attr("image_url", "div.item.active img", "src"),
                FieldConfig::text("description", "#product_description ~ p"),
                FieldConfig::text("category", "ul.breadcrumb li:nth-child(3) a"),
            ],
        }
    }
}

/// A single named detail field
#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub selector: String,

    /// Read this attribute instead of the element text
    #[serde(default)]
    pub attr: Option<String>,

    /// Text removed from the extracted value before it is trimmed
    #[serde(default)]
    pub strip: Option<String>,
}

impl FieldConfig {
    pub fn text(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            attr: None,
            strip: None,
        }
    }

    pub fn attr(name: &str, selector: &str, attr: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            attr: Some(attr.to_string()),
            strip: None,
        }
    }

    pub fn with_strip(mut self, strip: &str) -> Self {
        self.strip = Some(strip.to_string());
        self
    }
}
