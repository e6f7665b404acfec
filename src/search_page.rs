use crate::error::{Error, Result};
use crate::models::RawCandidate;
use log::{debug, warn};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

/// Selector triples tried in order until one yields results. Kobo has
/// partially moved its search pages to a new layout, and the old one is
/// still served in some stores, so both generations are covered.
/// (container, title link, author link, cover image)
const ITEM_SELECTORS: &[(&str, &str, &str, &str)] = &[
    // New search page
    (
        "div[data-testid='search-result-widget']",
        "a[data-testid='title']",
        "a[data-testid='contributor-name']",
        "img",
    ),
    // Old search page
    (
        "ul.result-items li.book",
        "h2.title.product-field a",
        "span.visible-contributors a",
        "img.cover-image",
    ),
    (
        "div.result-items .item-wrapper",
        "h2.title.product-field a",
        "span.visible-contributors a",
        "img.cover-image",
    ),
];

/// Markers that identify a legitimate zero-hit results page, as opposed to
/// markup this parser no longer understands.
const EMPTY_RESULT_SELECTORS: &[&str] = &[
    "div[data-testid='no-results']",
    "section.no-results",
    "p.no-result-message",
    "div.search-results",
    "ul.result-items",
];

/// Extract raw candidates from a search results page.
///
/// A single malformed entry is logged and skipped rather than aborting the
/// page. Returns an empty list for a recognized zero-hit page and
/// [`Error::Parse`] when the markup matches no known format at all, or when
/// result entries are present but none of them can be extracted.
pub fn parse_search_page(body: &str, base_url: &str) -> Result<Vec<RawCandidate>> {
    let document = Html::parse_document(body);
    let mut candidates: Vec<RawCandidate> = Vec::new();
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut saw_result_container = false;

    for (container_sel, title_sel, author_sel, img_sel) in ITEM_SELECTORS {
        let container_selector = match Selector::parse(container_sel) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let title_selector = Selector::parse(title_sel).unwrap();
        let author_selector = Selector::parse(author_sel).unwrap();
        let img_selector = Selector::parse(img_sel).unwrap();

        for container in document.select(&container_selector) {
            saw_result_container = true;
            // The new layout renders each title twice (mobile and desktop
            // anchors), so dedup by href within the container.
            let mut container_seen: HashSet<String> = HashSet::new();
            for title_link in container.select(&title_selector) {
                let Some(href) = title_link.value().attr("href") else {
                    warn!("Search result entry without an href, skipping");
                    continue;
                };
                let product_url = absolute_url(href, base_url);
                if !container_seen.insert(product_url.clone()) {
                    continue;
                }

                let title = collect_text(&title_link);
                if title.is_empty() {
                    warn!("Search result entry with an empty title, skipping: {}", product_url);
                    continue;
                }

                let author = container
                    .select(&author_selector)
                    .map(|a| collect_text(&a))
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ");

                let thumbnail_url = container
                    .select(&img_selector)
                    .next()
                    .and_then(|img| {
                        img.value()
                            .attr("src")
                            .or_else(|| img.value().attr("data-src"))
                    })
                    .map(|src| absolute_url(src, base_url));

                if seen_urls.insert(product_url.clone()) {
                    candidates.push(RawCandidate {
                        product_url,
                        title,
                        author,
                        thumbnail_url,
                        position: candidates.len(),
                    });
                }
            }
        }

        if !candidates.is_empty() {
            debug!(
                "Parsed {} search results using container {}",
                candidates.len(),
                container_sel
            );
            return Ok(candidates);
        }
    }

    // Fallback for old pages where only the bare title anchors survive
    // whatever wrapper redesign happened around them.
    let bare_title_selector = Selector::parse("h2.title.product-field a").unwrap();
    for title_link in document.select(&bare_title_selector) {
        let Some(href) = title_link.value().attr("href") else {
            continue;
        };
        let product_url = absolute_url(href, base_url);
        let title = collect_text(&title_link);
        if !title.is_empty() && seen_urls.insert(product_url.clone()) {
            candidates.push(RawCandidate {
                product_url,
                title,
                author: String::new(),
                thumbnail_url: None,
                position: candidates.len(),
            });
        }
    }
    if !candidates.is_empty() {
        debug!("Parsed {} search results from bare title anchors", candidates.len());
        return Ok(candidates);
    }

    // Result containers were present but nothing inside them survived
    // extraction. That is a format change, not an empty result set.
    if saw_result_container {
        return Err(Error::Parse(
            "result entries present but none were extractable".to_string(),
        ));
    }

    if is_empty_results_page(&document) {
        debug!("Search returned no results");
        return Ok(Vec::new());
    }

    Err(Error::Parse(
        "search page matched no known result layout".to_string(),
    ))
}

/// Distinguish "the store found nothing" from "we can no longer read the
/// page". The two must not be conflated: the former is an empty sequence,
/// the latter means the selectors need updating.
fn is_empty_results_page(document: &Html) -> bool {
    for sel in EMPTY_RESULT_SELECTORS {
        if let Ok(selector) = Selector::parse(sel) {
            if document.select(&selector).next().is_some() {
                return true;
            }
        }
    }

    let root_text = document.root_element().text().collect::<String>();
    let lowered = root_text.to_lowercase();
    lowered.contains("no results found") || lowered.contains("0 results for")
}

fn collect_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn absolute_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else if href.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href)
    }
}
