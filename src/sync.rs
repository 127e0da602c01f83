//! One full synchronisation run and the read-only status report.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::arxiv::ArxivClient;
use crate::cache::{CacheStats, JsonCache};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::formula::{FormulaRenderer, KatexCli, MathOptions, Passthrough};
use crate::fs::{stage, StagedWrite};
use crate::http::build_client;
use crate::reconcile::{reconcile, ReconcileOptions};
use crate::render::{render_html, render_rss};
use crate::source::{fetch_page, parse_source_page};

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub page_entries: usize,
    pub reused: usize,
    pub fetched: usize,
    pub failed: usize,
    pub complete: usize,
    pub rss: PathBuf,
    pub html: PathBuf,
    pub cache: PathBuf,
    pub elapsed: Duration,
}

/// Fetch the page, reconcile against the cache, then publish the cache, the
/// feed and the page.
///
/// The cache and both documents are staged as temp files first and only then
/// renamed into place, so a failed page fetch, an empty page or a failed write
/// leaves every existing file untouched.
pub fn run_sync(cfg: &Config) -> Result<SyncReport> {
    let started = Instant::now();
    let client = build_client(&cfg.http)?;

    let body = fetch_page(&client, &cfg.target_url, &cfg.http)?;
    let mut items = parse_source_page(&body, &cfg.target_url, &cfg.abs_pattern);
    if items.is_empty() {
        return Err(SyncError::NoEntries(cfg.target_url.to_string()));
    }
    if let Some(max) = cfg.max_entries {
        if items.len() > max {
            info!(max, found = items.len(), "limiting source entries");
            items.truncate(max);
        }
    }

    let cache = JsonCache::new(&cfg.paths.cache);
    let cached = cache.load();

    let fetcher = ArxivClient::new(client, &cfg.http, cfg.retry);
    let opts = ReconcileOptions { order: cfg.order, request_delay: cfg.request_delay };
    let rec = reconcile(&items, &cached, &fetcher, &opts);

    let now = Utc::now();
    let rss = render_rss(&rec.entries, &cfg.feed, &cfg.target_url, now)?;

    let renderer: Box<dyn FormulaRenderer> = if cfg.katex {
        Box::new(KatexCli::new(cfg.katex_timeout))
    } else {
        Box::new(Passthrough)
    };
    let math = MathOptions { skip_numeric_prices: cfg.skip_numeric_prices };
    let html = render_html(
        &rec.entries,
        &cfg.feed,
        &file_name(&cfg.paths.rss),
        renderer.as_ref(),
        math,
        now,
    );

    // every temp file is in place before any target is replaced
    let staged = [
        cache.stage(&rec.cache)?,
        stage_output(&cfg.paths.rss, rss.as_slice(), "rss")?,
        stage_output(&cfg.paths.html, html.as_bytes(), "html")?,
    ];
    for write in staged {
        let target = write.target().to_path_buf();
        write.commit().map_err(|e| SyncError::Render {
            format: "output",
            reason: format!("{}: {e}", target.display()),
        })?;
        info!(path = %target.display(), "published");
    }

    if let Some((rss_alias, html_alias)) = &cfg.paths.aliases {
        link_alias(&cfg.paths.rss, rss_alias);
        link_alias(&cfg.paths.html, html_alias);
    }

    let report = SyncReport {
        page_entries: items.len(),
        reused: rec.reused,
        fetched: rec.fetched,
        failed: rec.failed,
        complete: rec.entries.iter().filter(|e| e.is_complete()).count(),
        rss: cfg.paths.rss.clone(),
        html: cfg.paths.html.clone(),
        cache: cfg.paths.cache.clone(),
        elapsed: started.elapsed(),
    };
    info!(
        page_entries = report.page_entries,
        reused = report.reused,
        fetched = report.fetched,
        failed = report.failed,
        complete = report.complete,
        elapsed_secs = report.elapsed.as_secs_f64(),
        "sync finished"
    );
    Ok(report)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn stage_output(path: &Path, contents: &[u8], format: &'static str) -> Result<StagedWrite> {
    let staged = stage(path, contents).map_err(|e| SyncError::Render {
        format,
        reason: format!("{}: {e}", path.display()),
    })?;
    debug!(path = %path.display(), bytes = contents.len(), "staged {format}");
    Ok(staged)
}

/// Point `alias` at `target` (same directory). Failures only warn.
#[cfg(unix)]
fn link_alias(target: &Path, alias: &Path) {
    if let Ok(meta) = fs::symlink_metadata(alias) {
        if meta.is_dir() {
            warn!(alias = %alias.display(), "alias path is a directory, leaving it alone");
            return;
        }
        if let Err(e) = fs::remove_file(alias) {
            warn!(alias = %alias.display(), error = %e, "could not replace alias");
            return;
        }
    }
    let relative = PathBuf::from(file_name(target));
    match std::os::unix::fs::symlink(&relative, alias) {
        Ok(()) => debug!(alias = %alias.display(), target = %relative.display(), "linked alias"),
        Err(e) => warn!(alias = %alias.display(), error = %e, "could not create alias"),
    }
}

#[cfg(not(unix))]
fn link_alias(_target: &Path, alias: &Path) {
    debug!(alias = %alias.display(), "aliases are only created on unix");
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputInfo {
    pub path: PathBuf,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

impl OutputInfo {
    fn inspect(path: &Path) -> Self {
        let meta = fs::metadata(path).ok();
        Self {
            path: path.to_path_buf(),
            exists: meta.is_some(),
            size: meta.as_ref().map(|m| m.len()),
            modified: meta
                .and_then(|m| m.modified().ok())
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub target_url: String,
    pub cache: CacheStats,
    pub rss: OutputInfo,
    pub html: OutputInfo,
}

/// Describe the cache and output files without touching the network.
pub fn status(cfg: &Config) -> StatusReport {
    StatusReport {
        target_url: cfg.target_url.to_string(),
        cache: JsonCache::new(&cfg.paths.cache).stats(),
        rss: OutputInfo::inspect(&cfg.paths.rss),
        html: OutputInfo::inspect(&cfg.paths.html),
    }
}
