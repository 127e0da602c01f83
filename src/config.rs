//! Run configuration. Built once in `main` and passed by reference into every
//! component; nothing here is mutated after construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub const DEFAULT_TARGET_URL: &str = "http://quattro.phys.sci.kobe-u.ac.jp/dmrg/condmat.html";
pub const DEFAULT_USER_AGENT: &str = "dmrg-rss-fullsync/1.4";
pub const DEFAULT_API_BASE: &str = "http://export.arxiv.org/api/query";
pub const DEFAULT_ABS_PATTERN: &str = r"^https?://(?:www\.)?arxiv\.org/abs/\S+$";

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub page_timeout: Duration,
    pub api_timeout: Duration,
    pub api_base: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            page_timeout: Duration::from_secs(30),
            api_timeout: Duration::from_secs(20),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Doubles the delay after each failed attempt, never exceeding `cap`.
    Exponential { cap: Duration },
}

/// How often and how patiently a detail fetch is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_secs(2), backoff: Backoff::Fixed }
    }
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt `attempt` (0-based), or `None`
    /// when that was the last one.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts.max(1) {
            return None;
        }
        let delay = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { cap } => {
                let factor = 2u32.saturating_pow(attempt);
                self.delay.saturating_mul(factor).min(cap)
            }
        };
        Some(delay)
    }
}

/// Order of the reconciled entry list handed to the RSS renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ResultOrder {
    /// Complete cached entries in page order, then fetched entries in page order.
    #[default]
    ReuseThenFetched,
    /// Exactly the order links appear on the source page.
    Page,
    /// Newest publication date first; undated entries last.
    NewestFirst,
}

#[derive(Debug, Clone)]
pub struct FeedMeta {
    pub title: String,
    pub description: String,
    pub language: String,
    pub html_title: String,
    pub html_description: String,
}

impl Default for FeedMeta {
    fn default() -> Self {
        Self {
            title: "DMRG cond-mat".to_string(),
            description: "Aggregated feed from DMRG cond-mat page, includes abstracts and authors from arXiv"
                .to_string(),
            language: "en".to_string(),
            html_title: "DMRG cond-mat Papers".to_string(),
            html_description:
                "Condensed matter physics papers from the DMRG research group with abstracts and LaTeX rendering"
                    .to_string(),
        }
    }
}

/// Where the cache and the rendered outputs live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub rss: PathBuf,
    pub html: PathBuf,
    pub cache: PathBuf,
    /// Unversioned `(rss, html)` names pointing at the year-suffixed files.
    pub aliases: Option<(PathBuf, PathBuf)>,
}

static RE_ABS_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(DEFAULT_ABS_PATTERN).unwrap());
static RE_PAGE_STEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^/]+)\.html?$").unwrap());
static RE_TRAILING_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)$").unwrap());

impl OutputPaths {
    /// Derive year-suffixed file names from the page URL.
    ///
    /// `.../condmat24.html` gives `condmat24.xml`, `condmat24.html` and
    /// `entries24.json`; `.../condmat.html` uses `year` and also gets
    /// unversioned aliases.
    pub fn resolve(target: &Url, dir: &Path, year: i32) -> Self {
        let stem = RE_PAGE_STEM
            .captures(target.path())
            .map(|c| c[1].to_string())
            .unwrap_or_default();

        let url_year = RE_TRAILING_DIGITS
            .captures(&stem)
            .map(|c| last_two(&c[1]));
        let base = match stem.trim_end_matches(|c: char| c.is_ascii_digit()) {
            "" => "condmat".to_string(),
            b => b.to_string(),
        };
        let yy = url_year.clone().unwrap_or_else(|| last_two(&year.to_string()));

        let aliases = url_year.is_none().then(|| {
            (dir.join(format!("{base}.xml")), dir.join(format!("{base}.html")))
        });

        Self {
            rss: dir.join(format!("{base}{yy}.xml")),
            html: dir.join(format!("{base}{yy}.html")),
            cache: dir.join(format!("entries{yy}.json")),
            aliases,
        }
    }
}

fn last_two(digits: &str) -> String {
    let start = digits.len().saturating_sub(2);
    digits[start..].to_string()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: Url,
    pub abs_pattern: Regex,
    pub http: HttpConfig,
    pub retry: RetryPolicy,
    /// Pause between consecutive detail fetches in one run.
    pub request_delay: Duration,
    pub max_entries: Option<usize>,
    pub order: ResultOrder,
    pub feed: FeedMeta,
    pub paths: OutputPaths,
    pub katex: bool,
    pub katex_timeout: Duration,
    pub skip_numeric_prices: bool,
}

impl Config {
    /// Defaults for `target_url`, with outputs under `dir`.
    pub fn new(target_url: Url, dir: &Path, year: i32) -> Self {
        let paths = OutputPaths::resolve(&target_url, dir, year);
        Self {
            target_url,
            abs_pattern: RE_ABS_LINK.clone(),
            http: HttpConfig::default(),
            retry: RetryPolicy::default(),
            request_delay: Duration::from_secs(2),
            max_entries: None,
            order: ResultOrder::default(),
            feed: FeedMeta::default(),
            paths,
            katex: true,
            katex_timeout: Duration::from_secs(10),
            skip_numeric_prices: false,
        }
    }
}
