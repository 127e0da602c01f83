//! Source page fetch and link extraction.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use tracing::{debug, error, info};
use url::Url;

use crate::config::HttpConfig;
use crate::entry::SourceItem;
use crate::error::{Result, SyncError};
use crate::http::get_text;

static SEL_BOLD: Lazy<Selector> = Lazy::new(|| Selector::parse("b").unwrap());
static SEL_ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Fetch the source page. Any failure here is fatal to the run.
pub fn fetch_page(client: &Client, url: &Url, cfg: &HttpConfig) -> Result<String> {
    info!(url = %url, "fetching source page");
    match get_text(
        client,
        url.as_str(),
        &[],
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        cfg.page_timeout,
    ) {
        Ok(body) => {
            info!(bytes = body.len(), "fetched source page");
            Ok(body)
        }
        Err(e) => {
            error!(url = %url, error = %e, "failed to fetch source page");
            Err(SyncError::PageFetch { url: url.to_string(), reason: e.to_string() })
        }
    }
}

/// Extract paper links from the page, top to bottom.
///
/// A link counts when it sits inside a `<b>` element and its (absolute) target
/// matches `pattern`. Repeated links keep their first position.
pub fn parse_source_page(body: &str, base: &Url, pattern: &Regex) -> Vec<SourceItem> {
    let document = Html::parse_document(body);
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    let mut bold_count = 0usize;

    for b in document.select(&SEL_BOLD) {
        bold_count += 1;
        for href in b.select(&SEL_ANCHOR).filter_map(|a| a.value().attr("href")) {
            let href = href.trim();
            let link = match Url::parse(href) {
                Ok(_) => href.to_string(),
                Err(_) => match base.join(href) {
                    Ok(u) => u.to_string(),
                    Err(_) => continue,
                },
            };
            if !pattern.is_match(&link) {
                continue;
            }
            if !seen.insert(link.clone()) {
                debug!(%link, "duplicate link on page");
                continue;
            }
            items.push(SourceItem::new(link));
        }
    }

    info!(bold_tags = bold_count, entries = items.len(), "parsed source page");
    items
}
