use crate::error::{Error, Result};
use crate::models::{BookMetadata, Series};
use chrono::NaiveDate;
use log::{debug, warn};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Parse a product page into a metadata record.
///
/// Fields the page does not carry stay `None`. Only a page with no
/// recoverable title at all is treated as unparseable.
pub fn parse_book_page(body: &str, product_url: &str) -> Result<BookMetadata> {
    let document = Html::parse_document(body);

    let mut record = BookMetadata {
        product_url: product_url.to_string(),
        ..BookMetadata::default()
    };

    let title_selector = Selector::parse("h1.title.product-field").unwrap();
    if let Some(el) = document.select(&title_selector).next() {
        record.title = collapse_whitespace(&el.text().collect::<String>());
    }

    let authors_selector = Selector::parse("span.visible-contributors a").unwrap();
    record.authors = document
        .select(&authors_selector)
        .map(|a| collapse_whitespace(&a.text().collect::<String>()))
        .filter(|a| !a.is_empty())
        .collect();

    record.series = parse_series(&document);
    parse_secondary_metadata(&document, &mut record);

    let tags_selector = Selector::parse("ul.category-rankings meta[property='genre']").unwrap();
    for meta in document.select(&tags_selector) {
        if let Some(content) = meta.value().attr("content") {
            let tag = collapse_whitespace(content);
            if !tag.is_empty() && !record.tags.contains(&tag) {
                record.tags.push(tag);
            }
        }
    }

    let synopsis_selector = Selector::parse("div.synopsis-description").unwrap();
    if let Some(el) = document.select(&synopsis_selector).next() {
        let html = el.inner_html().trim().to_string();
        if !html.is_empty() {
            record.synopsis = Some(html);
        }
    }

    record.cover_url = parse_cover_thumbnail(&document);

    // The store serves JSON-LD alongside the visible markup; use it to fill
    // whatever the selectors missed so a partial redesign degrades the
    // record instead of emptying it.
    apply_json_ld(&document, &mut record);

    if record.title.is_empty() {
        return Err(Error::Parse(format!(
            "no book title found on {}",
            product_url
        )));
    }

    debug!("Parsed book page: {} ({} authors)", record.title, record.authors.len());
    Ok(record)
}

fn parse_series(document: &Html) -> Option<Series> {
    let series_selector = Selector::parse("span.series.product-field").unwrap();
    // Books in a series but without an index get a nested series
    // product-field span, so the last match is the authoritative one.
    let series_el = document.select(&series_selector).last()?;

    let name_selector = Selector::parse("span.product-sequence-field a").unwrap();
    let name = series_el
        .select(&name_selector)
        .next()
        .map(|a| collapse_whitespace(&a.text().collect::<String>()))
        .filter(|n| !n.is_empty())?;

    let index_selector = Selector::parse("span.sequenced-name-prefix").unwrap();
    let index = series_el.select(&index_selector).next().and_then(|el| {
        let text = el.text().collect::<String>();
        let re = Regex::new(r"Book\s+([\d.]+)\s*-").unwrap();
        re.captures(&text)
            .and_then(|cap| cap[1].parse::<f64>().ok())
    });

    Some(Series { name, index })
}

/// Publisher, release date, ISBN, and language live in one descriptor list
/// under the cover: the first entry is the publisher, the rest are
/// "Descriptor:" / value pairs.
fn parse_secondary_metadata(document: &Html, record: &mut BookMetadata) {
    let li_selector = Selector::parse("div.bookitem-secondary-metadata ul li").unwrap();
    let span_selector = Selector::parse("span").unwrap();

    let mut entries = document.select(&li_selector);

    if let Some(first) = entries.next() {
        let publisher = collapse_whitespace(&own_text(&first));
        if !publisher.is_empty() {
            record.publisher = Some(publisher);
        }
    }

    for li in entries {
        let descriptor = collapse_whitespace(&own_text(&li));
        let value = li
            .select(&span_selector)
            .next()
            .map(|s| collapse_whitespace(&s.text().collect::<String>()))
            .filter(|v| !v.is_empty());

        let Some(value) = value else { continue };

        match descriptor.as_str() {
            "Release Date:" => match parse_release_date(&value) {
                Some(date) => record.published = Some(date),
                None => warn!("Unrecognized release date format: {}", value),
            },
            "ISBN:" => record.isbn = Some(value),
            "Language:" => record.language = Some(value),
            _ => {}
        }
    }
}

fn parse_cover_thumbnail(document: &Html) -> Option<String> {
    let cover_selector = Selector::parse("img.cover-image, img[class*='cover-image']").unwrap();
    let src = document
        .select(&cover_selector)
        .next()
        .and_then(|img| img.value().attr("src"))?;

    if let Some(rest) = src.strip_prefix("//") {
        Some(format!("https://{}", rest))
    } else if src.is_empty() {
        None
    } else {
        Some(src.to_string())
    }
}

fn parse_release_date(text: &str) -> Option<NaiveDate> {
    const FORMATS: &[&str] = &["%B %d, %Y", "%B %e, %Y", "%d %B %Y", "%Y-%m-%d"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

fn apply_json_ld(document: &Html, record: &mut BookMetadata) {
    let script_selector = Selector::parse("script[type='application/ld+json']").unwrap();
    for script in document.select(&script_selector) {
        let raw = script.text().collect::<String>();
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        let is_book = json
            .get("@type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t.eq_ignore_ascii_case("book"));
        if !is_book {
            continue;
        }

        if record.title.is_empty() {
            if let Some(name) = json.get("name").and_then(|v| v.as_str()) {
                record.title = collapse_whitespace(name);
            }
        }
        if record.authors.is_empty() {
            record.authors = json_ld_names(json.get("author"));
        }
        if record.isbn.is_none() {
            if let Some(isbn) = json.get("isbn").and_then(|v| v.as_str()) {
                record.isbn = Some(isbn.to_string());
            }
        }
        if record.synopsis.is_none() {
            if let Some(desc) = json.get("description").and_then(|v| v.as_str()) {
                let desc = desc.trim();
                if !desc.is_empty() {
                    record.synopsis = Some(desc.to_string());
                }
            }
        }
        if record.publisher.is_none() {
            let publisher = json
                .get("publisher")
                .and_then(|p| p.get("name"))
                .and_then(|v| v.as_str())
                .or_else(|| json.get("publisher").and_then(|v| v.as_str()));
            if let Some(publisher) = publisher {
                record.publisher = Some(collapse_whitespace(publisher));
            }
        }
        break;
    }
}

/// "author" in JSON-LD is either one object, an array of objects, or a
/// plain string depending on the page vintage.
fn json_ld_names(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::String(s)) => vec![collapse_whitespace(s)],
        Some(serde_json::Value::Object(obj)) => obj
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| vec![collapse_whitespace(s)])
            .unwrap_or_default(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .flat_map(|item| json_ld_names(Some(item)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Text directly inside the element, excluding child elements. The
/// descriptor lists put the label in the list item and the value in a
/// nested span, so whole-subtree text would glue them together.
fn own_text(element: &ElementRef) -> String {
    element
        .children()
        .filter_map(|node| node.value().as_text().map(|t| t.to_string()))
        .collect::<String>()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
