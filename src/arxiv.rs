//! Detail fetcher backed by the arXiv export API.

use std::thread::sleep;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::blocking::Client;
use tracing::{debug, error, info, warn};

use crate::config::{HttpConfig, RetryPolicy};
use crate::entry::Details;
use crate::error::{Result, SyncError};
use crate::http::get_text;
use crate::text::{api_timestamp_to_feed_date, arxiv_id, clean_text};

/// Source of paper metadata for a link.
///
/// Implementations never fail: when nothing can be fetched they return
/// `Details::default()`, which the completeness check rejects so the entry is
/// retried on the next run.
pub trait DetailFetcher {
    fn fetch_details(&self, link: &str) -> Details;
}

pub struct ArxivClient {
    client: Client,
    api_base: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ArxivClient {
    pub fn new(client: Client, http: &HttpConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            api_base: http.api_base.clone(),
            timeout: http.api_timeout,
            retry,
        }
    }

    fn try_fetch(&self, id: &str) -> Result<Details> {
        let xml = get_text(
            &self.client,
            &self.api_base,
            &[("id_list", id)],
            "application/atom+xml,application/xml;q=0.9,*/*;q=0.8",
            self.timeout,
        )?;
        let raw = parse_atom_entry(&xml)?
            .ok_or_else(|| SyncError::Api(id.to_string(), "no entry in response".to_string()))?;
        if raw.id.contains("/api/errors") {
            return Err(SyncError::Api(id.to_string(), clean_text(&raw.summary)));
        }
        Ok(raw.into_details())
    }
}

impl DetailFetcher for ArxivClient {
    fn fetch_details(&self, link: &str) -> Details {
        let id = arxiv_id(link);
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 0..attempts {
            info!(id, attempt = attempt + 1, "fetching arXiv details");
            match self.try_fetch(id) {
                Ok(details) => {
                    let preview: String = details.title.chars().take(50).collect();
                    info!(id, title = %preview, "fetched arXiv details");
                    return details;
                }
                Err(e) => {
                    warn!(id, attempt = attempt + 1, error = %e, "arXiv fetch attempt failed");
                    match self.retry.delay_after(attempt) {
                        Some(delay) => sleep(delay),
                        None => error!(id, attempts, "all arXiv fetch attempts failed"),
                    }
                }
            }
        }
        Details::default()
    }
}

/// Text of the first `<entry>` of an Atom response, before normalisation.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub published: String,
    pub authors: Vec<String>,
}

impl RawEntry {
    pub fn into_details(self) -> Details {
        let pubdate = api_timestamp_to_feed_date(&self.published);
        if pubdate.is_none() {
            warn!(published = %self.published, "failed to parse publication date");
        }
        let authors = self
            .authors
            .iter()
            .map(|name| clean_text(name))
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        Details {
            title: clean_text(&self.title),
            abstract_text: clean_text(&self.summary),
            authors,
            pubdate,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

/// Pull the first `<entry>` out of an Atom feed.
///
/// Element names are matched by local name so the default Atom namespace and
/// prefixed forms both work. All text below a field is concatenated, which
/// keeps formulas intact when a summary carries nested markup.
pub fn parse_atom_entry(xml: &str) -> Result<Option<RawEntry>> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut entry: Option<RawEntry> = None;
    let mut author = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"entry" && entry.is_none() {
                    entry = Some(RawEntry::default());
                }
                path.push(name);
            }
            Event::End(e) => {
                let name = e.local_name().as_ref().to_vec();
                path.pop();
                if name == b"author" && path.last().map(Vec::as_slice) == Some(&b"entry"[..]) {
                    if let Some(en) = entry.as_mut() {
                        en.authors.push(std::mem::take(&mut author));
                    }
                }
                if name == b"entry" && entry.is_some() {
                    break;
                }
            }
            Event::Text(t) => {
                if let (Some(field), Some(en)) = (field_at(&path), entry.as_mut()) {
                    let text = t.unescape()?;
                    push_field(en, &mut author, field, &text);
                }
            }
            Event::CData(c) => {
                if let (Some(field), Some(en)) = (field_at(&path), entry.as_mut()) {
                    let bytes = c.into_inner();
                    let text = String::from_utf8_lossy(&bytes);
                    push_field(en, &mut author, field, &text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if entry.is_none() {
        debug!("atom response carries no entry");
    }
    Ok(entry)
}

fn field_at(path: &[Vec<u8>]) -> Option<Field> {
    let pos = path.iter().position(|n| n == b"entry")?;
    let rest = &path[pos + 1..];
    match rest.first().map(Vec::as_slice)? {
        b"id" => Some(Field::Id),
        b"title" => Some(Field::Title),
        b"summary" => Some(Field::Summary),
        b"published" => Some(Field::Published),
        b"author" if rest.get(1).map(Vec::as_slice) == Some(&b"name"[..]) => Some(Field::AuthorName),
        _ => None,
    }
}

fn push_field(entry: &mut RawEntry, author: &mut String, field: Field, text: &str) {
    let target = match field {
        Field::Id => &mut entry.id,
        Field::Title => &mut entry.title,
        Field::Summary => &mut entry.summary,
        Field::Published => &mut entry.published,
        Field::AuthorName => author,
    };
    target.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const KONDO_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: id_list=2401.00001</title>
  <id>http://arxiv.org/api/abc</id>
  <updated>2024-01-05T00:00:00-05:00</updated>
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <updated>2024-01-03T10:00:00Z</updated>
    <published>2024-01-02T03:04:05Z</published>
    <title>Kondo screening in
      Schr\"odinger   chains</title>
    <summary>  We study $1&lt;c&lt;2$ regimes
  of the model.
</summary>
    <author>
      <name>Alice  Smith</name>
      <arxiv:affiliation>Somewhere</arxiv:affiliation>
    </author>
    <author>
      <name>Bob Erd\H{o}s</name>
    </author>
    <arxiv:primary_category term="cond-mat.str-el"/>
  </entry>
</feed>"#;

    #[test]
    fn parses_first_entry() {
        let raw = parse_atom_entry(KONDO_XML).unwrap().unwrap();
        assert_eq!(raw.id, "http://arxiv.org/abs/2401.00001v1");
        assert_eq!(raw.published, "2024-01-02T03:04:05Z");
        assert_eq!(raw.authors.len(), 2);

        let d = raw.into_details();
        assert_eq!(d.title, "Kondo screening in Schrödinger chains");
        assert_eq!(d.abstract_text, "We study $1<c<2$ regimes of the model.");
        assert_eq!(d.authors, "Alice Smith, Bob Erdős");
        assert_eq!(d.pubdate.as_deref(), Some("Tue, 02 Jan 2024 03:04:05 +0000"));
    }

    #[test]
    fn feed_without_entry_is_none() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>empty</title></feed>"#;
        assert_eq!(parse_atom_entry(xml).unwrap(), None);
    }

    #[test]
    fn nested_markup_in_summary_is_flattened() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
            <summary>gap <i>Delta</i> closes</summary>
            <published>2024-01-02T03:04:05Z</published>
        </entry></feed>"#;
        let raw = parse_atom_entry(xml).unwrap().unwrap();
        assert_eq!(clean_text(&raw.summary), "gap Delta closes");
    }

    #[test]
    fn bad_date_leaves_pubdate_empty() {
        let raw = RawEntry {
            title: "T".into(),
            summary: "S".into(),
            published: "02/01/2024".into(),
            authors: vec!["A".into()],
            ..Default::default()
        };
        let d = raw.into_details();
        assert_eq!(d.title, "T");
        assert_eq!(d.pubdate, None);
    }

    fn client_for(server: &mockito::Server, attempts: u32) -> ArxivClient {
        let http = HttpConfig {
            api_base: format!("{}/api/query", server.url()),
            ..HttpConfig::default()
        };
        let retry = RetryPolicy { max_attempts: attempts, delay: Duration::ZERO, ..RetryPolicy::default() };
        ArxivClient::new(crate::http::build_client(&http).unwrap(), &http, retry)
    }

    #[test]
    fn fetches_details_from_api() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("GET", "/api/query")
            .match_query(mockito::Matcher::UrlEncoded("id_list".into(), "2401.00001".into()))
            .with_status(200)
            .with_header("content-type", "application/atom+xml")
            .with_body(KONDO_XML)
            .expect(1)
            .create();

        let client = client_for(&server, 3);
        let d = client.fetch_details("http://arxiv.org/abs/2401.00001");
        m.assert();
        assert_eq!(d.authors, "Alice Smith, Bob Erdős");
    }

    #[test]
    fn exhausted_retries_give_empty_details() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("GET", "/api/query")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .expect(3)
            .create();

        let client = client_for(&server, 3);
        let d = client.fetch_details("http://arxiv.org/abs/2401.00001");
        m.assert();
        assert_eq!(d, Details::default());
    }

    #[test]
    fn retry_delay_between_attempts_only() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("GET", "/api/query")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .expect(3)
            .create();

        let delay = Duration::from_millis(150);
        let http = HttpConfig {
            api_base: format!("{}/api/query", server.url()),
            ..HttpConfig::default()
        };
        let retry = RetryPolicy { max_attempts: 3, delay, ..RetryPolicy::default() };
        let client = ArxivClient::new(crate::http::build_client(&http).unwrap(), &http, retry);

        let started = std::time::Instant::now();
        assert_eq!(client.fetch_details("http://arxiv.org/abs/2401.00001"), Details::default());
        let elapsed = started.elapsed();
        m.assert();

        // waits after attempts 1 and 2, not after the final one
        assert!(elapsed >= delay * 2, "elapsed {elapsed:?}");
        assert!(elapsed < delay * 3, "elapsed {elapsed:?}");
    }

    #[test]
    fn empty_feed_is_retried() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("GET", "/api/query")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#)
            .expect(2)
            .create();

        let client = client_for(&server, 2);
        assert_eq!(client.fetch_details("http://arxiv.org/abs/9999.99999"), Details::default());
        m.assert();
    }

    #[test]
    fn api_error_entry_is_a_failure() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/api/query")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
                <id>http://arxiv.org/api/errors#incorrect_id_format_for_bogus</id>
                <title>Error</title>
                <summary>incorrect id format for bogus</summary>
                </entry></feed>"#,
            )
            .create();

        let client = client_for(&server, 1);
        assert_eq!(client.fetch_details("http://arxiv.org/abs/bogus"), Details::default());
    }

    struct Counting(Cell<usize>);

    impl DetailFetcher for Counting {
        fn fetch_details(&self, _link: &str) -> Details {
            self.0.set(self.0.get() + 1);
            Details::default()
        }
    }

    #[test]
    fn trait_objects_are_usable() {
        let c = Counting(Cell::new(0));
        let f: &dyn DetailFetcher = &c;
        f.fetch_details("x");
        assert_eq!(c.0.get(), 1);
    }
}
