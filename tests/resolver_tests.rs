//! End-to-end resolver tests against a local fixture store: the full
//! search -> rank -> concurrent detail-fetch pipeline, covering output
//! ordering, partial-failure tolerance, and search pagination.

use kobo_metadata::config::{Config, HttpConfig};
use kobo_metadata::models::SearchQuery;
use kobo_metadata::resolver::KoboMetadata;
use kobo_metadata::Error;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// One canned page served at a fixed request target, after an optional
/// delay (used to make detail fetches complete out of rank order).
struct Route {
    body: String,
    delay_ms: u64,
}

fn route(body: String) -> Route {
    Route { body, delay_ms: 0 }
}

fn response(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Serve routed responses; unknown targets get a 404. Returns the bound
/// address and a log of every request target received.
async fn serve_store(routes: HashMap<String, Route>) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let routes = Arc::new(routes);
    let server_log = Arc::clone(&log);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let routes = Arc::clone(&routes);
            let log = Arc::clone(&server_log);
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let target = request
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();
                log.lock().unwrap().push(target.clone());
                let reply = match routes.get(&target) {
                    Some(r) => {
                        if r.delay_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(r.delay_ms)).await;
                        }
                        response(200, "OK", &r.body)
                    }
                    None => response(404, "Not Found", ""),
                };
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (addr, log)
}

fn store_config(addr: SocketAddr, num_matches: usize) -> Config {
    Config {
        base_url: format!("http://{addr}"),
        num_matches,
        http: HttpConfig {
            timeout_secs: 5,
            max_retries: 0,
            initial_retry_delay_ms: 10,
            max_retry_delay_ms: 50,
            enable_cookies: true,
            enable_compression: true,
        },
        ..Config::default()
    }
}

fn search_target(terms: &str, page: u32) -> String {
    format!("/us/en/search?query={terms}&fcmedia=Book&pageNumber={page}&fclanguages=all")
}

fn search_page(entries: &[(&str, &str)]) -> String {
    let widgets: String = entries
        .iter()
        .map(|(slug, title)| {
            format!(
                r##"<div data-testid="search-result-widget">
                     <a data-testid="title" href="/us/en/ebook/{slug}">{title}</a>
                     <a data-testid="contributor-name" href="#">Frank Herbert</a>
                   </div>"##
            )
        })
        .collect();
    format!("<html><body>{widgets}</body></html>")
}

fn detail_page(title: &str) -> String {
    format!(
        r##"<html><body>
             <h1 class="title product-field">{title}</h1>
             <span class="visible-contributors"><a href="#">Frank Herbert</a></span>
             <div class="synopsis-description"><p>About {title}.</p></div>
           </body></html>"##
    )
}

fn dune_search_routes() -> HashMap<String, Route> {
    let mut routes = HashMap::new();
    routes.insert(
        search_target("Dune", 1),
        route(search_page(&[
            ("dune-messiah", "Dune Messiah"),
            ("dune", "Dune"),
            ("children-of-dune", "Children of Dune"),
        ])),
    );
    routes
}

#[tokio::test]
async fn resolve_returns_rank_order_not_completion_order() {
    let mut routes = dune_search_routes();
    // The best match is served slowest, so completion order inverts rank
    // order and only slot placement can restore it.
    routes.insert(
        "/us/en/ebook/dune".to_string(),
        Route {
            body: detail_page("Dune"),
            delay_ms: 200,
        },
    );
    routes.insert(
        "/us/en/ebook/dune-messiah".to_string(),
        route(detail_page("Dune Messiah")),
    );
    routes.insert(
        "/us/en/ebook/children-of-dune".to_string(),
        route(detail_page("Children of Dune")),
    );

    let (addr, _log) = serve_store(routes).await;
    let resolver = KoboMetadata::new(store_config(addr, 3)).unwrap();

    let records = resolver
        .resolve(&SearchQuery::from_title("Dune"))
        .await
        .unwrap();
    let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Dune", "Dune Messiah", "Children of Dune"]);
}

#[tokio::test]
async fn one_detail_failure_leaves_other_candidates_intact() {
    let mut routes = dune_search_routes();
    // No route for dune-messiah: its detail fetch 404s and only that
    // candidate drops out.
    routes.insert("/us/en/ebook/dune".to_string(), route(detail_page("Dune")));
    routes.insert(
        "/us/en/ebook/children-of-dune".to_string(),
        route(detail_page("Children of Dune")),
    );

    let (addr, _log) = serve_store(routes).await;
    let resolver = KoboMetadata::new(store_config(addr, 3)).unwrap();

    let records = resolver
        .resolve(&SearchQuery::from_title("Dune"))
        .await
        .unwrap();
    let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Dune", "Children of Dune"]);
}

#[tokio::test]
async fn every_detail_failing_is_no_results() {
    // Search succeeds but no detail page is routed, so all candidates fail.
    let routes = dune_search_routes();
    let (addr, _log) = serve_store(routes).await;
    let resolver = KoboMetadata::new(store_config(addr, 3)).unwrap();

    let err = resolver
        .resolve(&SearchQuery::from_title("Dune"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoResults), "got {err:?}");
}

#[tokio::test]
async fn pagination_gathers_across_pages_and_stops_at_the_budget() {
    let pages: [&[(&str, &str)]; 3] = [
        &[("dune-1", "Dune Part One"), ("dune-2", "Dune Part Two")],
        &[("dune-3", "Dune Part Three"), ("dune-4", "Dune Part Four")],
        &[("dune-5", "Dune Part Five"), ("dune-6", "Dune Part Six")],
    ];
    let mut routes = HashMap::new();
    for (i, entries) in pages.iter().enumerate() {
        routes.insert(
            search_target("Dune", i as u32 + 1),
            route(search_page(entries)),
        );
    }
    for (slug, title) in pages.iter().flat_map(|page| page.iter()) {
        routes.insert(
            format!("/us/en/ebook/{slug}"),
            route(detail_page(title)),
        );
    }

    let (addr, log) = serve_store(routes).await;
    // The caller wants more matches than three pages can supply.
    let resolver = KoboMetadata::new(store_config(addr, 10)).unwrap();

    let records = resolver
        .resolve(&SearchQuery::from_title("Dune"))
        .await
        .unwrap();
    assert_eq!(records.len(), 6);

    let targets = log.lock().unwrap().clone();
    assert!(targets.iter().any(|t| t.contains("pageNumber=3")));
    // Page 4 is past the crawl budget and must never be requested.
    assert!(!targets.iter().any(|t| t.contains("pageNumber=4")));
}
