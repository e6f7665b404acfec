use crate::config::HttpConfig;
use crate::error::{Error, Result};
use log::{debug, info, warn};
use rand::Rng;
use reqwest::{Client, ClientBuilder, Response};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// User agents to rotate through to avoid bot detection
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// A fetched page plus the URL the request ended up at after redirects.
/// Kobo redirects bare-ISBN searches straight to the product page, so the
/// final URL is how callers tell a results page from a product page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub body: String,
}

struct Session {
    client: Client,
    /// Bumped on every challenge refresh so concurrent workers that hit a
    /// block at the same time share one refresh instead of racing.
    generation: u64,
}

enum Attempt<T> {
    Ok(T),
    Blocked(u16),
}

/// HTTP client with browser-like fingerprinting, a shared cookie session,
/// and a single-flight challenge-refresh pass on block responses.
pub struct StoreClient {
    config: HttpConfig,
    session: Mutex<Session>,
    /// Store root, warmed after a session refresh to pick up fresh cookies.
    base_url: String,
}

impl StoreClient {
    pub fn new(config: HttpConfig, base_url: &str) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            config,
            session: Mutex::new(Session {
                client,
                generation: 0,
            }),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch a URL and return its body as text.
    ///
    /// Transient network failures are retried with exponential backoff up
    /// to the configured budget. A block response triggers exactly one
    /// session refresh; if the refetch is still blocked, [`Error::Blocked`]
    /// is returned and nothing is retried further.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let (client, generation) = self.current_session().await;
        match self.try_fetch_text(&client, url).await? {
            Attempt::Ok(page) => Ok(page),
            Attempt::Blocked(status) => {
                info!("Blocked with status {} fetching {}, refreshing session", status, url);
                let client = self.refresh_session(generation).await?;
                match self.try_fetch_text(&client, url).await? {
                    Attempt::Ok(page) => Ok(page),
                    Attempt::Blocked(status) => {
                        warn!("Still blocked with status {} after session refresh", status);
                        Err(Error::Blocked)
                    }
                }
            }
        }
    }

    /// Fetch a URL and return its body as raw bytes (cover downloads).
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let (client, generation) = self.current_session().await;
        match self.try_fetch_bytes(&client, url).await? {
            Attempt::Ok(bytes) => Ok(bytes),
            Attempt::Blocked(status) => {
                info!("Blocked with status {} fetching {}, refreshing session", status, url);
                let client = self.refresh_session(generation).await?;
                match self.try_fetch_bytes(&client, url).await? {
                    Attempt::Ok(bytes) => Ok(bytes),
                    Attempt::Blocked(_) => Err(Error::Blocked),
                }
            }
        }
    }

    async fn current_session(&self) -> (Client, u64) {
        let session = self.session.lock().await;
        (session.client.clone(), session.generation)
    }

    /// Rebuild the client with a fresh fingerprint and empty cookie jar.
    ///
    /// Single-writer discipline: if another worker already refreshed while
    /// we were fetching (generation moved on), reuse its session instead of
    /// refreshing again.
    async fn refresh_session(&self, seen_generation: u64) -> Result<Client> {
        let mut session = self.session.lock().await;
        if session.generation != seen_generation {
            debug!("Session already refreshed by another worker");
            return Ok(session.client.clone());
        }

        let client = build_client(&self.config)?;
        // Warm the session against the store root so the challenge cookies
        // are in place before the real request is repeated.
        if let Err(e) = client.get(&self.base_url).send().await {
            debug!("Session warm-up request failed: {}", e);
        }
        session.client = client.clone();
        session.generation += 1;
        info!("Session refreshed (generation {})", session.generation);
        Ok(client)
    }

    async fn try_fetch_text(&self, client: &Client, url: &str) -> Result<Attempt<FetchedPage>> {
        match self.send_with_retry(client, url).await? {
            Attempt::Blocked(status) => Ok(Attempt::Blocked(status)),
            Attempt::Ok(response) => {
                let final_url = response.url().to_string();
                let body = response.text().await?;
                Ok(Attempt::Ok(FetchedPage { final_url, body }))
            }
        }
    }

    async fn try_fetch_bytes(&self, client: &Client, url: &str) -> Result<Attempt<Vec<u8>>> {
        match self.send_with_retry(client, url).await? {
            Attempt::Blocked(status) => Ok(Attempt::Blocked(status)),
            Attempt::Ok(response) => Ok(Attempt::Ok(response.bytes().await?.to_vec())),
        }
    }

    /// One GET with the transient-failure retry budget applied. Block
    /// statuses are reported to the caller, never retried here.
    async fn send_with_retry(&self, client: &Client, url: &str) -> Result<Attempt<Response>> {
        let mut last_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.config.max_retries {
            let request = client
                .get(url)
                .header("User-Agent", random_user_agent());

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if is_block_status(status) {
                        return Ok(Attempt::Blocked(status));
                    }

                    if is_transient_status(status) && attempt < self.config.max_retries {
                        warn!(
                            "Transient status {} for {}, attempt {}/{}",
                            status,
                            url,
                            attempt + 1,
                            self.config.max_retries + 1
                        );
                        sleep(self.retry_delay(attempt)).await;
                        continue;
                    }

                    if !response.status().is_success() {
                        return Err(Error::Transport {
                            status: Some(status),
                            message: format!("unexpected status fetching {}", url),
                        });
                    }

                    return Ok(Attempt::Ok(response));
                }
                Err(e) => {
                    let transient = e.is_timeout() || e.is_connect() || e.is_request();
                    if transient && attempt < self.config.max_retries {
                        warn!(
                            "Network error for {}, attempt {}/{}: {}",
                            url,
                            attempt + 1,
                            self.config.max_retries + 1,
                            e
                        );
                        sleep(self.retry_delay(attempt)).await;
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }

        Err(last_error
            .map(Error::from)
            .unwrap_or_else(|| Error::Transport {
                status: None,
                message: format!("retry budget exhausted for {}", url),
            }))
    }

    /// Exponential backoff with jitter to avoid thundering herd
    fn retry_delay(&self, attempt: usize) -> Duration {
        let base_delay = self.config.initial_retry_delay_ms;
        let max_delay = self.config.max_retry_delay_ms;
        let delay_ms = (base_delay * 2u64.pow(attempt as u32)).min(max_delay);

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(0.75..=1.25);
        Duration::from_millis((delay_ms as f64 * jitter) as u64)
    }
}

fn build_client(config: &HttpConfig) -> Result<Client> {
    let mut builder = ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(random_user_agent())
        .cookie_store(config.enable_cookies)
        .gzip(config.enable_compression)
        .brotli(config.enable_compression)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .pool_idle_timeout(Some(Duration::from_secs(90)));

    // Default headers that mimic a real browser
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8".parse().unwrap());
    headers.insert("Accept-Language", "en-US,en;q=0.9".parse().unwrap());
    headers.insert("DNT", "1".parse().unwrap());
    headers.insert("Connection", "keep-alive".parse().unwrap());
    headers.insert("Upgrade-Insecure-Requests", "1".parse().unwrap());
    headers.insert("Sec-Fetch-Dest", "document".parse().unwrap());
    headers.insert("Sec-Fetch-Mode", "navigate".parse().unwrap());
    headers.insert("Sec-Fetch-Site", "none".parse().unwrap());
    headers.insert("Sec-Fetch-User", "?1".parse().unwrap());
    headers.insert("Cache-Control", "max-age=0".parse().unwrap());
    builder = builder.default_headers(headers);

    Ok(builder.build()?)
}

fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
}

/// Anti-bot signals: one challenge refresh, then give up. Retrying into an
/// active lockout only extends it.
fn is_block_status(status: u16) -> bool {
    matches!(status, 403 | 429 | 503 | 520..=527)
}

/// Server hiccups worth a short backoff-and-retry.
fn is_transient_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 504)
}
