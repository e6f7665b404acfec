use crate::book_page;
use crate::config::Config;
use crate::cover;
use crate::error::{Error, Result};
use crate::http_client::StoreClient;
use crate::matching;
use crate::models::{BookMetadata, RawCandidate, SearchQuery};
use crate::query::{self, SearchPlan};
use crate::search_page;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Pagination stops before this page number, so at most search pages 1
/// through 3 are requested per query.
const MAX_PAGE_NUM: u32 = 4;

/// Upper bound on concurrent detail fetches, independent of how high the
/// caller sets `num_matches`. Hammering the store invites the bot defenses.
const MAX_DETAIL_WORKERS: usize = 10;

/// Caller-facing entry point: resolves a query into ranked, fully-populated
/// metadata records from the Kobo store.
pub struct KoboMetadata {
    config: Arc<Config>,
    client: Arc<StoreClient>,
}

impl KoboMetadata {
    pub fn new(config: Config) -> Result<Self> {
        let client = StoreClient::new(config.http.clone(), &config.base_url)?;
        Ok(Self {
            config: Arc::new(config),
            client: Arc::new(client),
        })
    }

    /// Resolve up to `num_matches` records for the query, best match first.
    ///
    /// The returned order is rank order from the matcher, regardless of the
    /// order concurrent detail fetches complete in. Dropping the returned
    /// future aborts any in-flight fetches; no partial record is returned.
    pub async fn resolve(&self, search: &SearchQuery) -> Result<Vec<BookMetadata>> {
        match query::build_plan(search, &self.config)? {
            SearchPlan::IsbnLookup { isbn } => self.resolve_isbn(&isbn).await,
            SearchPlan::TextSearch { terms } => self.resolve_text(search, &terms).await,
        }
    }

    /// Download the cover image behind a resolved metadata record.
    pub async fn fetch_cover(&self, cover_url: &str) -> Result<Vec<u8>> {
        self.client.fetch_bytes(cover_url).await
    }

    /// Direct lookup path: a bare-ISBN search redirects to the product page
    /// when the store knows the ISBN, so ranking is bypassed entirely and
    /// at most one record comes back.
    async fn resolve_isbn(&self, isbn: &str) -> Result<Vec<BookMetadata>> {
        let url = query::search_url(&self.config, isbn, 1);
        info!("Looking up isbn {} via {}", isbn, url);
        let page = self.client.fetch(&url).await?;

        if !page.final_url.contains("/search") {
            debug!("isbn search redirected to product page: {}", page.final_url);
            let record = book_page::parse_book_page(&page.body, &page.final_url)?;
            return match finalize_record(record, None, &self.config) {
                Some(record) => Ok(vec![record]),
                None => Err(Error::NoResults),
            };
        }

        // No redirect: the store returned a results page for the isbn.
        // The first entry, if any, is the lookup result.
        let candidates = search_page::parse_search_page(&page.body, &self.config.base_url)?;
        let Some(first) = candidates.into_iter().next() else {
            return Err(Error::NoResults);
        };
        match self.fetch_candidate_details(&first).await {
            Ok(Some(record)) => Ok(vec![record]),
            Ok(None) => Err(Error::NoResults),
            Err(Error::Blocked) => Err(Error::Blocked),
            Err(e) => {
                warn!("isbn candidate detail fetch failed: {}", e);
                Err(Error::NoResults)
            }
        }
    }

    async fn resolve_text(&self, search: &SearchQuery, terms: &str) -> Result<Vec<BookMetadata>> {
        let candidates = self.gather_candidates(terms).await?;
        let ranked = matching::rank(
            search,
            candidates,
            &self.config.title_blacklist,
            self.config.num_matches,
        );
        if ranked.is_empty() {
            return Err(Error::NoResults);
        }

        // Detail fetches are independent; run them on a bounded worker
        // pool and place each result into its pre-assigned rank slot.
        let semaphore = Arc::new(Semaphore::new(
            self.config.num_matches.clamp(1, MAX_DETAIL_WORKERS),
        ));
        let mut tasks: JoinSet<(usize, Result<Option<BookMetadata>>)> = JoinSet::new();

        for (slot, scored) in ranked.iter().enumerate() {
            let client = Arc::clone(&self.client);
            let config = Arc::clone(&self.config);
            let candidate = scored.candidate.clone();
            let semaphore = Arc::clone(&semaphore);
            debug!(
                "Fetching details for rank {} (score {:.3}): {}",
                slot, scored.score, candidate.title
            );
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = fetch_details(&client, &config, &candidate).await;
                (slot, result)
            });
        }

        let mut slots: Vec<Option<BookMetadata>> = vec![None; ranked.len()];
        let mut blocked = false;
        while let Some(joined) = tasks.join_next().await {
            let Ok((slot, result)) = joined else {
                continue;
            };
            match result {
                Ok(record) => slots[slot] = record,
                Err(Error::Blocked) => {
                    warn!("Detail fetch hit the bot lockout, candidate dropped");
                    blocked = true;
                }
                Err(e) => {
                    warn!("Detail fetch failed, candidate dropped: {}", e);
                }
            }
        }

        let records: Vec<BookMetadata> = slots.into_iter().flatten().collect();
        if records.is_empty() {
            // Every candidate failed. If the lockout caused it, say so:
            // the caller's remedy is to wait, not to broaden the search.
            return Err(if blocked { Error::Blocked } else { Error::NoResults });
        }
        Ok(records)
    }

    /// Walk search pages until enough candidates are collected or the page
    /// budget runs out. Only the first page's parse failure is fatal;
    /// later pages degrade to whatever was already gathered.
    async fn gather_candidates(&self, terms: &str) -> Result<Vec<RawCandidate>> {
        let mut candidates: Vec<RawCandidate> = Vec::new();

        for page_number in 1..MAX_PAGE_NUM {
            if page_number > 1 && candidates.len() >= self.config.num_matches {
                break;
            }
            let url = query::search_url(&self.config, terms, page_number);
            info!("Searching page {}: {}", page_number, url);
            let page = self.client.fetch(&url).await?;

            match search_page::parse_search_page(&page.body, &self.config.base_url) {
                Ok(parsed) => {
                    if parsed.is_empty() {
                        break;
                    }
                    for mut candidate in parsed {
                        if candidates.iter().any(|c| c.product_url == candidate.product_url) {
                            continue;
                        }
                        candidate.position = candidates.len();
                        candidates.push(candidate);
                    }
                }
                Err(e) if page_number == 1 => return Err(e),
                Err(e) => {
                    warn!("Stopping pagination, page {} unparseable: {}", page_number, e);
                    break;
                }
            }
        }

        Ok(candidates)
    }

    async fn fetch_candidate_details(
        &self,
        candidate: &RawCandidate,
    ) -> Result<Option<BookMetadata>> {
        fetch_details(&self.client, &self.config, candidate).await
    }
}

async fn fetch_details(
    client: &StoreClient,
    config: &Config,
    candidate: &RawCandidate,
) -> Result<Option<BookMetadata>> {
    let page = client.fetch(&candidate.product_url).await?;
    let record = book_page::parse_book_page(&page.body, &candidate.product_url)?;
    Ok(finalize_record(
        record,
        candidate.thumbnail_url.as_deref(),
        config,
    ))
}

/// Apply cover resolution and the tag blacklist to a parsed record.
/// Returns `None` when the record is disqualified by its tags.
fn finalize_record(
    mut record: BookMetadata,
    fallback_thumbnail: Option<&str>,
    config: &Config,
) -> Option<BookMetadata> {
    if let Some(tag) = blacklisted_tag(&record.tags, &config.tag_blacklist) {
        info!("Dropping '{}': carries blacklisted tag '{}'", record.title, tag);
        return None;
    }

    let resize = config.resize_cover.then_some(config.max_cover_size);
    let thumbnail = record
        .cover_url
        .clone()
        .or_else(|| fallback_thumbnail.map(str::to_string));
    record.cover_url = thumbnail.map(|t| cover::resolve_cover_url(&t, resize));

    Some(record)
}

/// The first blacklisted tag the record carries (case-insensitive exact
/// match), if any.
fn blacklisted_tag<'a>(tags: &[String], blacklist: &'a [String]) -> Option<&'a str> {
    blacklist
        .iter()
        .map(|term| term.trim())
        .filter(|term| !term.is_empty())
        .find(|term| tags.iter().any(|tag| tag.eq_ignore_ascii_case(term)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Series;

    fn record_with_tags(tags: &[&str]) -> BookMetadata {
        BookMetadata {
            title: "Example".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..BookMetadata::default()
        }
    }

    #[test]
    fn tag_blacklist_matches_exact_case_insensitive() {
        let blacklist = vec!["Erotica".to_string()];
        assert_eq!(
            blacklisted_tag(&record_with_tags(&["Romance", "erotica"]).tags, &blacklist),
            Some("Erotica")
        );
        // Substring is not enough for tags, unlike titles
        assert_eq!(
            blacklisted_tag(&record_with_tags(&["Non-Erotica Essays"]).tags, &blacklist),
            None
        );
    }

    #[test]
    fn finalize_drops_tag_blacklisted_record() {
        let config = Config {
            tag_blacklist: vec!["box sets".to_string()],
            ..Config::default()
        };
        let record = record_with_tags(&["Box Sets"]);
        assert!(finalize_record(record, None, &config).is_none());
    }

    #[test]
    fn finalize_resolves_cover_from_page_thumbnail() {
        let config = Config::default();
        let mut record = record_with_tags(&[]);
        record.cover_url = Some(
            "https://cdn.kobo.com/book-images/abc/353/569/90/False/example.jpg".to_string(),
        );
        let finalized = finalize_record(record, None, &config).unwrap();
        assert_eq!(
            finalized.cover_url.as_deref(),
            Some("https://cdn.kobo.com/book-images/abc/example.jpg")
        );
    }

    #[test]
    fn finalize_falls_back_to_search_thumbnail() {
        let config = Config {
            resize_cover: true,
            ..Config::default()
        };
        let record = record_with_tags(&[]);
        let finalized = finalize_record(
            record,
            Some("https://cdn.kobo.com/book-images/abc/353/569/90/False/example.jpg"),
            &config,
        )
        .unwrap();
        assert_eq!(
            finalized.cover_url.as_deref(),
            Some("https://cdn.kobo.com/book-images/abc/1650/2200/100/False/example.jpg")
        );
    }

    #[test]
    fn finalize_without_any_thumbnail_keeps_none() {
        let config = Config::default();
        let mut record = record_with_tags(&[]);
        record.series = Some(Series {
            name: "Saga".to_string(),
            index: Some(1.0),
        });
        let finalized = finalize_record(record, None, &config).unwrap();
        assert!(finalized.cover_url.is_none());
        assert!(finalized.series.is_some());
    }

    #[tokio::test]
    async fn resolver_creation() {
        let resolver = KoboMetadata::new(Config::default());
        assert!(resolver.is_ok());
    }
}
