use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};
use tracing::{info, warn};
use url::Url;

use crate::config::FeedMeta;
use crate::entry::{is_complete, Entry};
use crate::formula::{render_text, FormulaRenderer, MathOptions};
use crate::text::{arxiv_id, latex_to_unicode, parse_feed_date};

const KATEX_CSS: &str = "https://cdn.jsdelivr.net/npm/katex@0.16.8/dist/katex.min.css";

const STYLE: &str = r#"
body { font-family: "Helvetica Neue", Helvetica, Arial, sans-serif; line-height: 1.6; color: #333; background: #fff; max-width: 900px; margin: 0 auto; padding: 20px; }
h1 { color: #0066cc; border-bottom: 3px solid #0052a3; padding-bottom: 10px; font-size: 2.2em; }
h2 { color: #0052a3; border-bottom: 1px solid #ddd; padding-bottom: 5px; font-size: 1.5em; }
h3 { color: #0066cc; margin-bottom: 0.5em; font-size: 1.2em; }
a { color: #0066cc; text-decoration: none; word-break: break-word; }
a:hover { text-decoration: underline; }
hr { border: 0; border-top: 1px solid #ddd; margin: 2em 0; }
.paper-entry { margin-bottom: 2em; padding: 1em; background: #f9f9f9; border: 1px solid #ddd; border-radius: 5px; }
.meta { color: #666; font-size: 0.9em; margin: 0.5em 0; }
.abstract { margin-top: 1em; text-align: justify; }
.katex { font-size: 1.1em; }
.katex-display { margin: 1.5em 0; text-align: center; overflow-x: auto; }
.header { text-align: center; margin-bottom: 2em; padding-bottom: 1em; border-bottom: 2px solid #ddd; }
.header .description { color: #666; font-size: 1.1em; }
.header .nav-links { display: flex; justify-content: center; gap: 2em; flex-wrap: wrap; }
.header .nav-links a { padding: 0.5em 1em; border: 1px solid #0066cc; border-radius: 5px; }
.header .nav-links a:hover { background: #0066cc; color: #fff; text-decoration: none; }
.footer { margin-top: 3em; padding-top: 2em; border-top: 2px solid #ddd; text-align: center; color: #666; font-size: 0.9em; }
@media screen and (max-width: 600px) {
  body { padding: 12px; font-size: 14px; }
  h1 { font-size: 1.6em; text-align: center; }
  h3 { font-size: 1.0em; line-height: 1.3; }
  .paper-entry { padding: 0.7em; margin-bottom: 1.2em; }
  .abstract { text-align: left; font-size: 0.9em; line-height: 1.4; }
  .katex-display { overflow-y: hidden; font-size: 0.85em; }
  .header .nav-links { flex-direction: column; gap: 1em; }
  a { word-break: break-all; }
}
@media (prefers-color-scheme: dark) {
  body { color: #e0e0e0; background: #1a1a1a; }
  h1, h3, a { color: #66b3ff; }
  h2 { color: #4da6ff; border-bottom-color: #444; }
  .paper-entry { background: #2a2a2a; border-color: #444; }
  .meta, .header .description, .footer { color: #aaa; }
  hr, .header, .footer { border-color: #444; }
  .header .nav-links a { border-color: #66b3ff; }
  .header .nav-links a:hover { background: #66b3ff; color: #1a1a1a; }
  .katex { color: #e0e0e0; }
}
@media print { body { max-width: none; margin: 0; padding: 15mm; } }
"#;

fn display_date(pubdate: Option<&str>) -> String {
    match pubdate {
        None | Some("") => "Unknown date".to_string(),
        Some(raw) => parse_feed_date(raw)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| raw.to_string()),
    }
}

fn entry_html(entry: &Entry, renderer: &dyn FormulaRenderer, opts: MathOptions) -> String {
    let title = render_text(&latex_to_unicode(&entry.title), renderer, opts);
    let abstract_html = render_text(&latex_to_unicode(&entry.abstract_text), renderer, opts);
    let authors = latex_to_unicode(&entry.authors);
    format!(
        r#"<article class="paper-entry">
  <h3><a href="{link}">{title}</a></h3>
  <p class="meta"><strong>Authors:</strong> {authors}</p>
  <p class="meta"><strong>arXiv ID:</strong> {id} | <strong>Date:</strong> {date}</p>
  <div class="abstract"><strong>Abstract:</strong> {abstract_html}</div>
</article>
<hr>
"#,
        link = encode_double_quoted_attribute(&entry.link),
        authors = encode_text(&authors),
        id = encode_text(arxiv_id(&entry.link)),
        date = encode_text(&display_date(entry.pubdate.as_deref())),
    )
}

/// Render the browsable page: complete entries only, newest first.
///
/// `rss_filename` is linked from the header so the page and the feed travel
/// together.
pub fn render_html(
    entries: &[Entry],
    meta: &FeedMeta,
    rss_filename: &str,
    renderer: &dyn FormulaRenderer,
    opts: MathOptions,
    now: DateTime<Utc>,
) -> String {
    let (mut complete, incomplete): (Vec<&Entry>, Vec<&Entry>) = entries.iter().partition(|e| is_complete(e));
    complete.sort_by_key(|e| Reverse(e.pubdate.as_deref().and_then(parse_feed_date)));

    let mut body = String::new();
    body.push_str(&format!(
        "<p><em>Generated on {}</em></p>\n",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    body.push_str(&format!("<p>Total papers: {}", complete.len()));
    if !incomplete.is_empty() {
        body.push_str(&format!(
            " ({} entries with incomplete data not shown)",
            incomplete.len()
        ));
    }
    body.push_str("</p>\n<h2>Recent Papers</h2>\n");

    let mut shown = 0usize;
    for entry in &complete {
        if let Err(e) = Url::parse(&entry.link) {
            warn!(link = %entry.link, error = %e, "skipping HTML entry with malformed link");
            continue;
        }
        body.push_str(&entry_html(entry, renderer, opts));
        shown += 1;
    }
    info!(shown, incomplete = incomplete.len(), "rendered HTML");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<link rel="alternate" type="application/rss+xml" title="{title}" href="{rss}">
<link rel="stylesheet" href="{katex}">
<style>{style}</style>
</head>
<body>
<div class="header">
<h1>{title}</h1>
<p class="description">{description}</p>
<div class="nav-links">
<a href="index.html">Home</a>
<a href="{rss}">RSS Feed</a>
</div>
</div>
{body}<div class="footer"><p>Generated by condmat2rss {version}</p></div>
</body>
</html>
"#,
        title = encode_text(&meta.html_title),
        description = encode_text(&meta.html_description),
        rss = encode_double_quoted_attribute(rss_filename),
        katex = KATEX_CSS,
        style = STYLE,
        version = env!("CARGO_PKG_VERSION"),
    )
}
