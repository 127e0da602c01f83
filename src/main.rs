use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, Local};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use condmat2rss::config::{
    Backoff, Config, OutputPaths, ResultOrder, DEFAULT_API_BASE, DEFAULT_TARGET_URL, DEFAULT_USER_AGENT,
};
use condmat2rss::{run_sync, status, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackoffKind {
    Fixed,
    Exponential,
}

/// condmat2rss - build an RSS feed and HTML page from the DMRG cond-mat link page
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the page listing arXiv abstract links
    #[arg(env = "CONDMAT2RSS_URL", default_value = DEFAULT_TARGET_URL)]
    url: String,

    /// Directory for the feed, the page and the cache
    #[arg(short = 'o', long, env = "CONDMAT2RSS_OUT_DIR", default_value = "docs")]
    out_dir: PathBuf,

    /// Cache file (default: <out-dir>/entries<yy>.json)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// RSS output file (default: <out-dir>/<page><yy>.xml)
    #[arg(long)]
    rss_out: Option<PathBuf>,

    /// HTML output file (default: <out-dir>/<page><yy>.html)
    #[arg(long)]
    html_out: Option<PathBuf>,

    #[arg(short = 'u', long, env = "CONDMAT2RSS_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Timeout in seconds for the source page request
    #[arg(short = 't', long = "timeout", default_value_t = 30)]
    timeout_secs: u64,

    /// Timeout in seconds for each arXiv API request
    #[arg(long = "api-timeout", default_value_t = 20)]
    api_timeout_secs: u64,

    #[arg(long, env = "CONDMAT2RSS_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Attempts per arXiv lookup
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Seconds to wait before retrying a failed lookup
    #[arg(long = "retry-delay", default_value_t = 2)]
    retry_delay_secs: u64,

    #[arg(long, value_enum, default_value_t = BackoffKind::Fixed)]
    backoff: BackoffKind,

    /// Upper bound in seconds for exponential backoff
    #[arg(long = "backoff-cap", default_value_t = 60)]
    backoff_cap_secs: u64,

    /// Seconds to pause between consecutive arXiv lookups
    #[arg(long = "request-delay", default_value_t = 2)]
    request_delay_secs: u64,

    /// Only process the first N links of the page
    #[arg(short = 'n', long, env = "CONDMAT2RSS_MAX_ENTRIES")]
    max_entries: Option<usize>,

    /// Order of the RSS items
    #[arg(long, value_enum, default_value_t = ResultOrder::ReuseThenFetched)]
    order: ResultOrder,

    /// Leave formulas as $...$ source instead of calling katex
    #[arg(long)]
    no_katex: bool,

    #[arg(long = "katex-timeout", default_value_t = 10)]
    katex_timeout_secs: u64,

    /// Do not render short numeric spans like $99.99$
    #[arg(long)]
    skip_numeric_prices: bool,

    /// Do not link unversioned file names to this year's outputs
    #[arg(long)]
    no_aliases: bool,

    /// Also write logs to this file
    #[arg(long, env = "CONDMAT2RSS_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Print cache and output status as JSON and exit
    #[arg(long)]
    status: bool,
}

fn main() {
    let args = Args::parse();
    let _guard = init_tracing(args.log_file.as_deref());

    match run(&args) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "run failed");
            eprintln!("error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let appender = log_file.map(|p| (p, file_appender(p)));
    let (file_layer, guard, failure) = match appender {
        Some((_, Ok(appender))) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard), None)
        }
        Some((path, Err(reason))) => (None, None, Some((path, reason))),
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some((path, reason)) = failure {
        warn!(path = %path.display(), error = %reason, "log file unavailable, logging to stderr only");
    }
    guard
}

fn file_appender(path: &Path) -> Result<RollingFileAppender, String> {
    let name = path
        .file_name()
        .ok_or_else(|| format!("{} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name.to_string_lossy())
        .build(dir)
        .map_err(|e| e.to_string())
}

fn build_config(args: &Args) -> Result<Config, SyncError> {
    let target = Url::parse(&args.url)?;
    let mut cfg = Config::new(target, &args.out_dir, Local::now().year());

    cfg.http.user_agent = args.user_agent.clone();
    cfg.http.page_timeout = Duration::from_secs(args.timeout_secs);
    cfg.http.api_timeout = Duration::from_secs(args.api_timeout_secs);
    cfg.http.api_base = args.api_base.clone();

    cfg.retry.max_attempts = args.retries.max(1);
    cfg.retry.delay = Duration::from_secs(args.retry_delay_secs);
    cfg.retry.backoff = match args.backoff {
        BackoffKind::Fixed => Backoff::Fixed,
        BackoffKind::Exponential => Backoff::Exponential { cap: Duration::from_secs(args.backoff_cap_secs) },
    };
    cfg.request_delay = Duration::from_secs(args.request_delay_secs);
    cfg.max_entries = args.max_entries;
    cfg.order = args.order;

    cfg.katex = !args.no_katex;
    cfg.katex_timeout = Duration::from_secs(args.katex_timeout_secs);
    cfg.skip_numeric_prices = args.skip_numeric_prices;

    cfg.paths = override_paths(cfg.paths, args);
    Ok(cfg)
}

/// Explicit file arguments win over the derived names; once any output is
/// moved the unversioned aliases no longer make sense.
fn override_paths(mut paths: OutputPaths, args: &Args) -> OutputPaths {
    if let Some(p) = &args.cache {
        paths.cache = p.clone();
    }
    if args.rss_out.is_some() || args.html_out.is_some() || args.no_aliases {
        paths.aliases = None;
    }
    if let Some(p) = &args.rss_out {
        paths.rss = p.clone();
    }
    if let Some(p) = &args.html_out {
        paths.html = p.clone();
    }
    paths
}

fn run(args: &Args) -> Result<(), SyncError> {
    let cfg = build_config(args)?;

    if args.status {
        let report = status(&cfg);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(
        url = %cfg.target_url,
        rss = %cfg.paths.rss.display(),
        html = %cfg.paths.html.display(),
        cache = %cfg.paths.cache.display(),
        "starting sync"
    );
    let report = run_sync(&cfg)?;
    println!(
        "{} entries ({} reused, {} fetched, {} incomplete) -> {}",
        report.page_entries,
        report.reused,
        report.fetched,
        report.failed,
        report.rss.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_config() {
        let args = Args::parse_from(["condmat2rss"]);
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.target_url.as_str(), DEFAULT_TARGET_URL);
        assert_eq!(cfg.http.page_timeout, Duration::from_secs(30));
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.order, ResultOrder::ReuseThenFetched);
        assert!(cfg.katex);
        assert!(cfg.paths.aliases.is_some());
        assert!(cfg.paths.cache.starts_with("docs"));
    }

    #[test]
    fn explicit_outputs_disable_aliases() {
        let args = Args::parse_from([
            "condmat2rss",
            "http://example.org/condmat.html",
            "--rss-out",
            "/tmp/feed.xml",
            "--order",
            "newest-first",
            "--backoff",
            "exponential",
        ]);
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.paths.rss, PathBuf::from("/tmp/feed.xml"));
        assert!(cfg.paths.aliases.is_none());
        assert_eq!(cfg.order, ResultOrder::NewestFirst);
        assert_eq!(cfg.retry.backoff, Backoff::Exponential { cap: Duration::from_secs(60) });
    }

    #[test]
    fn unusable_log_path_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        assert!(file_appender(&blocker.join("sync.log")).is_err());
    }

    #[test]
    fn log_file_is_created_with_its_own_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/sync.log");
        file_appender(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn bad_url_is_rejected() {
        let args = Args::parse_from(["condmat2rss", "not a url"]);
        assert!(matches!(build_config(&args), Err(SyncError::Url(_))));
    }
}
