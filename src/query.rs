use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::SearchQuery;

/// How a query will be executed against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPlan {
    /// Single request; Kobo redirects a bare-ISBN search straight to the
    /// product page, so this bypasses result parsing and ranking.
    IsbnLookup { isbn: String },
    /// Paged text search over the combined title/author terms.
    TextSearch { terms: String },
}

/// Decide how to search. A valid ISBN wins over the text fields; an
/// invalid one is ignored and the text fields are used instead.
pub fn build_plan(query: &SearchQuery, config: &Config) -> Result<SearchPlan> {
    if let Some(raw) = query.isbn.as_deref() {
        if let Some(isbn) = check_isbn(raw) {
            return Ok(SearchPlan::IsbnLookup { isbn });
        }
        log::debug!("Ignoring malformed isbn: {}", raw);
    }

    if !query.has_text() {
        return Err(Error::InvalidQuery);
    }
    Ok(SearchPlan::TextSearch {
        terms: generate_terms(query, config.remove_leading_zeroes),
    })
}

pub fn search_url(config: &Config, query_str: &str, page: u32) -> String {
    format!(
        "{}/{}/{}/search?query={}&fcmedia=Book&pageNumber={}&fclanguages={}",
        config.base_url.trim_end_matches('/'),
        config.country,
        config.language,
        urlencoding::encode(query_str),
        page,
        config.search_languages
    )
}

/// Combine title and author tokens into one search string (the store's own
/// relevance ranking benefits from both signals being present).
fn generate_terms(query: &SearchQuery, remove_leading_zeroes: bool) -> String {
    let mut terms: Vec<String> = Vec::new();

    if let Some(title) = query.title.as_deref() {
        for token in title.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            if token.is_empty() {
                continue;
            }
            // Kobo search doesn't do a great job of matching zero-padded
            // numbers
            if remove_leading_zeroes && token.chars().all(|c| c.is_ascii_digit()) {
                let stripped = token.trim_start_matches('0');
                terms.push(if stripped.is_empty() { "0" } else { stripped }.to_string());
            } else {
                terms.push(token.to_string());
            }
        }
    }

    for author in &query.authors {
        for token in author.split_whitespace() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric());
            if !token.is_empty() {
                terms.push(token.to_string());
            }
        }
    }

    terms.join(" ")
}

/// Validate and normalize an ISBN-10 or ISBN-13, including checksum.
/// Tolerates hyphens, spaces, and an "isbn:" scheme prefix. Returns the
/// cleaned digit string, or `None` for anything malformed.
pub fn check_isbn(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'x' || *c == 'X')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    match cleaned.len() {
        10 if valid_isbn10(&cleaned) => Some(cleaned),
        13 if valid_isbn13(&cleaned) => Some(cleaned),
        _ => None,
    }
}

fn valid_isbn10(isbn: &str) -> bool {
    let mut sum = 0u32;
    for (i, c) in isbn.chars().enumerate() {
        let value = match c {
            '0'..='9' => c as u32 - '0' as u32,
            // X is only valid as the check digit
            'X' if i == 9 => 10,
            _ => return false,
        };
        sum += (10 - i as u32) * value;
    }
    sum % 11 == 0
}

fn valid_isbn13(isbn: &str) -> bool {
    if !isbn.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = isbn
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let digit = c as u32 - '0' as u32;
            if i % 2 == 0 {
                digit
            } else {
                digit * 3
            }
        })
        .sum();
    sum % 10 == 0
}
