//! Shared fixtures: a two-tier mock catalog and a matching configuration

#![allow(dead_code)]

use catalog_harvester::config::{load_config, Config};
use std::path::{Path, PathBuf};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Category slugs on the landing page
pub const CATEGORIES: [&str; 2] = ["a", "b"];

/// Items on the single non-empty listing page of every subcategory
pub const ITEMS_PER_LISTING: usize = 3;

fn html(status: u16, body: String) -> ResponseTemplate {
    ResponseTemplate::new(status)
        .set_body_string(body)
        .insert_header("content-type", "text/html")
}

/// Path of item `n` in category `category`
pub fn item_path(category: &str, n: usize) -> String {
    format!("/item/{}-{}.html", category, n)
}

/// Every item path of the catalog
pub fn item_paths() -> Vec<String> {
    CATEGORIES
        .iter()
        .flat_map(|c| (1..=ITEMS_PER_LISTING).map(move |n| item_path(c, n)))
        .collect()
}

pub fn detail_page(category: &str, n: usize) -> String {
    format!(
        r#"<html><body>
        <h1>Item {c}-{n}</h1>
        <p class="price">£{n}.00</p>
        <table><tr><th>UPC</th><td>{c}{n}</td></tr></table>
        </body></html>"#,
        c = category,
        n = n
    )
}

/// Mounts landing, category, listing and detail pages, except the detail
/// pages of `skip_details`
pub async fn mount_catalog_with(server: &MockServer, skip_details: &[String]) {
    let categories: String = CATEGORIES
        .iter()
        .map(|c| {
            format!(
                r#"<li><a href="catalogue/{c}/index.html">{}</a></li>"#,
                c.to_uppercase(),
                c = c
            )
        })
        .collect();

    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(html(
            200,
            format!(r#"<html><body><ul class="categories">{}</ul></body></html>"#, categories),
        ))
        .mount(server)
        .await;

    for category in CATEGORIES {
        Mock::given(method("GET"))
            .and(path(format!("/catalogue/{}/index.html", category)))
            .respond_with(html(
                200,
                format!(
                    r#"<html><body><ul class="subcategories">
                    <li><a href="sub/index.html">Sub {}</a></li>
                    </ul></body></html>"#,
                    category.to_uppercase()
                ),
            ))
            .mount(server)
            .await;

        let items: String = (1..=ITEMS_PER_LISTING)
            .map(|n| {
                format!(
                    r#"<article><h3><a href="{}">Item {}</a></h3></article>"#,
                    item_path(category, n),
                    n
                )
            })
            .collect();

        Mock::given(method("GET"))
            .and(path(format!("/catalogue/{}/sub/page-1.html", category)))
            .respond_with(html(200, format!("<html><body>{}</body></html>", items)))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/catalogue/{}/sub/page-2.html", category)))
            .respond_with(html(200, "<html><body></body></html>".to_string()))
            .mount(server)
            .await;

        for n in 1..=ITEMS_PER_LISTING {
            let item = item_path(category, n);
            if skip_details.contains(&item) {
                continue;
            }
            Mock::given(method("GET"))
                .and(path(item))
                .respond_with(html(200, detail_page(category, n)))
                .mount(server)
                .await;
        }
    }
}

pub async fn mount_catalog(server: &MockServer) {
    mount_catalog_with(server, &[]).await;
}

/// Writes a configuration pointing at `server_uri` into `dir`
pub fn write_config(dir: &Path, server_uri: &str) -> PathBuf {
    let config = format!(
        r#"
[source]
base-url = "{uri}/index.html"
page-template = "page-{{page}}.html"
max-pages = 10

[fetch]
max-attempts = 3
retry-delay-secs = 0
timeout-secs = 5

[workers]
discovery = 2
detail = 3
fanout = 3
work-queue-capacity = 2
persist-queue-capacity = 2
join-grace-secs = 5

[output]
database-path = '{db}'
export-path = '{export}'

[selectors]
category = "ul.categories a"
subcategory = "ul.subcategories a"
item = "article h3 a"
table-rows = "table tr"

[[selectors.field]]
name = "title"
selector = "h1"

[[selectors.field]]
name = "price"
selector = "p.price"
"#,
        uri = server_uri,
        db = dir.join("records.db").display(),
        export = dir.join("records.json").display(),
    );

    let path = dir.join("harvest.toml");
    std::fs::write(&path, config).expect("write config");
    path
}

pub fn test_config(dir: &Path, server_uri: &str) -> Config {
    load_config(&write_config(dir, server_uri)).expect("load config")
}
