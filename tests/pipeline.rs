use std::fs;
use std::time::Duration;

use mockito::{Matcher, Mock, ServerGuard};
use url::Url;

use condmat2rss::cache::JsonCache;
use condmat2rss::identity::identify;
use condmat2rss::{run_sync, Config};

const PAGE: &str = r#"<html><body>
<p><b><a href="http://arxiv.org/abs/2401.00001">Kondo chains</a></b> by A. Smith</p>
<p><b><a href="http://www.example.com/talk.pdf">not a paper</a></b></p>
<p><b><a href="https://arxiv.org/abs/2401.00002">Hubbard ladders</a> <a href="http://arxiv.org/abs/9999.99999">second link</a></b></p>
<p><b><a href="http://arxiv.org/abs/2401.00003">Broken</a></b></p>
<p><b><a href="http://arxiv.org/abs/2401.00001">Kondo chains again</a></b></p>
</body></html>"#;

const SMALLER_PAGE: &str = r#"<html><body>
<p><b><a href="https://arxiv.org/abs/2401.00002">Hubbard ladders</a></b></p>
</body></html>"#;

fn atom(id: &str, title: &str, published: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/{id}v1</id>
    <published>{published}</published>
    <title>{title}</title>
    <summary>Abstract of {title} with $E=mc^2$.</summary>
    <author><name>Alice Smith</name></author>
    <author><name>Bob Jones</name></author>
  </entry>
</feed>"#
    )
}

fn api_mock(server: &mut ServerGuard, id: &str, body: Option<String>, hits: usize) -> Mock {
    let mock = server
        .mock("GET", "/api/query")
        .match_query(Matcher::UrlEncoded("id_list".into(), id.into()));
    let mock = match body {
        Some(b) => mock.with_status(200).with_body(b),
        None => mock.with_status(503),
    };
    mock.expect(hits).create()
}

fn config(server: &ServerGuard, dir: &std::path::Path, page: &str) -> Config {
    let url = Url::parse(&format!("{}{}", server.url(), page)).unwrap();
    let mut cfg = Config::new(url, dir, 2024);
    cfg.http.api_base = format!("{}/api/query", server.url());
    cfg.retry.max_attempts = 1;
    cfg.retry.delay = Duration::ZERO;
    cfg.request_delay = Duration::ZERO;
    cfg.katex = false;
    cfg
}

#[test]
fn second_run_only_refetches_incomplete_entries() {
    let mut server = mockito::Server::new();
    let _page = server.mock("GET", "/dmrg/condmat.html").with_body(PAGE).create();
    let one = api_mock(&mut server, "2401.00001", Some(atom("2401.00001", "Kondo chains", "2024-01-02T03:04:05Z")), 1);
    let two = api_mock(&mut server, "2401.00002", Some(atom("2401.00002", "Hubbard ladders", "2024-01-05T00:00:00Z")), 1);
    let second_link = api_mock(&mut server, "9999.99999", Some(atom("9999.99999", "Spin liquids", "2023-12-01T00:00:00Z")), 1);
    let broken = api_mock(&mut server, "2401.00003", None, 2);

    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&server, dir.path(), "/dmrg/condmat.html");
    assert!(cfg.paths.rss.ends_with("condmat24.xml"));

    let first = run_sync(&cfg).unwrap();
    assert_eq!(first.page_entries, 4);
    assert_eq!(first.fetched, 4);
    assert_eq!(first.reused, 0);
    assert_eq!(first.failed, 1);
    assert_eq!(first.complete, 3);

    let rss = fs::read_to_string(&cfg.paths.rss).unwrap();
    assert_eq!(rss.matches("<item>").count(), 4);
    assert!(rss.contains("<pubDate>Tue, 02 Jan 2024 03:04:05 +0000</pubDate>"));
    assert!(rss.contains("<dc:creator>Alice Smith, Bob Jones</dc:creator>"));
    assert!(rss.contains("<link>http://arxiv.org/abs/9999.99999</link>"));
    assert!(!rss.contains("talk.pdf"));

    let html = fs::read_to_string(&cfg.paths.html).unwrap();
    assert!(html.contains("Total papers: 3 (1 entries with incomplete data not shown)"));
    assert!(html.find("Hubbard ladders").unwrap() < html.find("Kondo chains").unwrap());
    assert!(html.find("Kondo chains").unwrap() < html.find("Spin liquids").unwrap());
    assert!(html.contains(r#"href="condmat24.xml""#));

    let cached = JsonCache::new(&cfg.paths.cache).load();
    assert_eq!(cached.len(), 4);
    assert!(cached[&identify("http://arxiv.org/abs/2401.00001")].is_complete());
    assert!(!cached[&identify("http://arxiv.org/abs/2401.00003")].is_complete());

    #[cfg(unix)]
    {
        let alias = dir.path().join("condmat.xml");
        assert!(fs::symlink_metadata(&alias).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&alias).unwrap(), rss);
    }

    let second = run_sync(&cfg).unwrap();
    assert_eq!(second.reused, 3);
    assert_eq!(second.fetched, 1);
    assert_eq!(second.failed, 1);

    one.assert();
    two.assert();
    second_link.assert();
    broken.assert();
}

#[test]
fn links_gone_from_the_page_leave_the_cache() {
    let mut server = mockito::Server::new();
    let _page = server.mock("GET", "/full/condmat24.html").with_body(PAGE).create();
    let _smaller = server.mock("GET", "/small/condmat24.html").with_body(SMALLER_PAGE).create();
    let _one = api_mock(&mut server, "2401.00001", Some(atom("2401.00001", "Kondo chains", "2024-01-02T03:04:05Z")), 1);
    let two = api_mock(&mut server, "2401.00002", Some(atom("2401.00002", "Hubbard ladders", "2024-01-05T00:00:00Z")), 1);
    let _broken = api_mock(&mut server, "2401.00003", None, 1);

    let dir = tempfile::tempdir().unwrap();
    run_sync(&config(&server, dir.path(), "/full/condmat24.html")).unwrap();

    let cfg = config(&server, dir.path(), "/small/condmat24.html");
    assert!(cfg.paths.aliases.is_none());
    let report = run_sync(&cfg).unwrap();
    assert_eq!(report.page_entries, 1);
    assert_eq!(report.reused, 1);
    assert_eq!(report.fetched, 0);
    two.assert();

    let cached = JsonCache::new(&cfg.paths.cache).load();
    assert_eq!(cached.len(), 1);
    assert!(cached.contains_key(&identify("https://arxiv.org/abs/2401.00002")));

    let rss = fs::read_to_string(&cfg.paths.rss).unwrap();
    assert_eq!(rss.matches("<item>").count(), 1);
    assert!(!dir.path().join("condmat.xml").exists());
}

#[test]
fn failed_page_fetch_keeps_previous_outputs() {
    let mut server = mockito::Server::new();
    let page = server.mock("GET", "/dmrg/condmat24.html").with_body(SMALLER_PAGE).create();
    let _two = api_mock(&mut server, "2401.00002", Some(atom("2401.00002", "Hubbard ladders", "2024-01-05T00:00:00Z")), 1);

    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&server, dir.path(), "/dmrg/condmat24.html");
    run_sync(&cfg).unwrap();
    let rss_before = fs::read(&cfg.paths.rss).unwrap();
    let cache_before = fs::read(&cfg.paths.cache).unwrap();

    page.remove();
    let _down = server.mock("GET", "/dmrg/condmat24.html").with_status(500).create();
    let err = run_sync(&cfg).unwrap_err();
    assert_eq!(err.exit_code(), 2);

    assert_eq!(fs::read(&cfg.paths.rss).unwrap(), rss_before);
    assert_eq!(fs::read(&cfg.paths.cache).unwrap(), cache_before);
}

#[test]
fn failed_output_write_replaces_nothing() {
    let mut server = mockito::Server::new();
    let _page = server.mock("GET", "/dmrg/condmat24.html").with_body(SMALLER_PAGE).create();
    let _two = api_mock(&mut server, "2401.00002", Some(atom("2401.00002", "Hubbard ladders", "2024-01-05T00:00:00Z")), 1);

    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&server, dir.path(), "/dmrg/condmat24.html");
    fs::create_dir_all(&cfg.paths.html).unwrap();

    let err = run_sync(&cfg).unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert!(!cfg.paths.cache.exists());
    assert!(!cfg.paths.rss.exists());
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}
