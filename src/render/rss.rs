use std::io::Write;

use chrono::{DateTime, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::{info, warn};
use url::Url;

use crate::config::FeedMeta;
use crate::entry::Entry;
use crate::error::{Result, SyncError};
use crate::text::{arxiv_id, latex_to_unicode, parse_feed_date, sanitize_text, FEED_DATE_FORMAT};

const NS_ATOM: &str = "http://www.w3.org/2005/Atom";
const NS_DC: &str = "http://purl.org/dc/elements/1.1/";

fn write_text_element<W: Write>(w: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    let s = sanitize_text(text);
    w.write_event(Event::Text(BytesText::new(&s)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn or_default<'a>(s: &'a str, fallback: &'a str) -> &'a str {
    if s.trim().is_empty() {
        fallback
    } else {
        s
    }
}

/// HTML summary placed in an item's `<description>`.
pub fn item_description(entry: &Entry) -> String {
    let authors = latex_to_unicode(or_default(&entry.authors, "Unknown"));
    let abstract_text = latex_to_unicode(or_default(&entry.abstract_text, "No abstract available"));
    let display_date = entry
        .pubdate
        .as_deref()
        .and_then(parse_feed_date)
        .map(|d| d.format("%a, %d %b %Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    format!(
        "<b>Author(s):</b> {}<br><br><b>Abstract:</b> {}<br><br><b>[<a href=\"{}\">arXiv:{}</a>] Published {} UTC</b>",
        encode_text(&authors),
        encode_text(&abstract_text),
        encode_double_quoted_attribute(&entry.link),
        encode_text(arxiv_id(&entry.link)),
        display_date,
    )
}

/// Render an RSS 2.0 document, one item per entry in the given order.
///
/// Entries whose link is not a valid URL are skipped.
pub fn render_rss(entries: &[Entry], meta: &FeedMeta, channel_link: &Url, now: DateTime<Utc>) -> Result<Vec<u8>> {
    write_rss(entries, meta, channel_link, now).map_err(|e| SyncError::Render {
        format: "rss",
        reason: e.to_string(),
    })
}

fn write_rss(entries: &[Entry], meta: &FeedMeta, channel_link: &Url, now: DateTime<Utc>) -> Result<Vec<u8>> {
    let build_date = now.format(FEED_DATE_FORMAT).to_string();
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut rss_start = BytesStart::new("rss");
    rss_start.push_attribute(("version", "2.0"));
    rss_start.push_attribute(("xmlns:atom", NS_ATOM));
    rss_start.push_attribute(("xmlns:dc", NS_DC));
    writer.write_event(Event::Start(rss_start))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;
    write_text_element(&mut writer, "title", &meta.title)?;
    write_text_element(&mut writer, "link", channel_link.as_str())?;
    write_text_element(&mut writer, "description", &meta.description)?;

    let mut self_link = BytesStart::new("atom:link");
    self_link.push_attribute(("href", channel_link.as_str()));
    self_link.push_attribute(("rel", "self"));
    self_link.push_attribute(("type", "application/rss+xml"));
    writer.write_event(Event::Empty(self_link))?;

    write_text_element(&mut writer, "language", &meta.language)?;
    write_text_element(&mut writer, "lastBuildDate", &build_date)?;
    write_text_element(&mut writer, "generator", concat!("condmat2rss ", env!("CARGO_PKG_VERSION")))?;

    let mut added = 0usize;
    for (i, entry) in entries.iter().enumerate() {
        if let Err(e) = Url::parse(&entry.link) {
            warn!(link = %entry.link, error = %e, "skipping RSS item with malformed link");
            continue;
        }

        let pub_date = match entry.pubdate.as_deref().and_then(parse_feed_date) {
            Some(d) => d.format(FEED_DATE_FORMAT).to_string(),
            None => {
                warn!(link = %entry.link, "no pubdate, using build time");
                build_date.clone()
            }
        };
        if i < 3 {
            info!(position = i + 1, date = %pub_date, "RSS item date");
        }

        writer.write_event(Event::Start(BytesStart::new("item")))?;
        write_text_element(&mut writer, "title", &latex_to_unicode(or_default(&entry.title, "Untitled")))?;
        write_text_element(&mut writer, "link", &entry.link)?;
        write_text_element(&mut writer, "description", &item_description(entry))?;

        let mut guid = BytesStart::new("guid");
        guid.push_attribute(("isPermaLink", "true"));
        writer.write_event(Event::Start(guid))?;
        writer.write_event(Event::Text(BytesText::new(&entry.link)))?;
        writer.write_event(Event::End(BytesEnd::new("guid")))?;

        write_text_element(&mut writer, "pubDate", &pub_date)?;
        write_text_element(&mut writer, "dc:creator", &latex_to_unicode(or_default(&entry.authors, "Unknown")))?;
        writer.write_event(Event::End(BytesEnd::new("item")))?;
        added += 1;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    let mut out = writer.into_inner();
    out.push(b'\n');
    info!(items = added, bytes = out.len(), "rendered RSS");
    Ok(out)
}
