use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes surfaced to the caller of [`crate::resolver::KoboMetadata`].
///
/// Per-candidate failures during detail or cover fetching are absorbed by the
/// resolver (the candidate is dropped) and never appear here unless every
/// candidate failed.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller supplied neither title, author, nor a valid ISBN.
    #[error("search needs a title, an author, or a valid ISBN")]
    InvalidQuery,

    /// Network or HTTP failure after the local retry budget was exhausted.
    /// Retryable by the caller later.
    #[error("request failed{}: {message}", status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The store served a bot-challenge response and a session refresh did
    /// not clear it. Retrying immediately will make the lockout worse.
    #[error("kobo is rate-limiting this client; wait before retrying")]
    Blocked,

    /// The response markup matched none of the known page formats. Distinct
    /// from an empty result set; usually means the store changed its layout.
    #[error("unrecognized page format: {0}")]
    Parse(String),

    /// The search, filtering, and detail fetching produced nothing usable.
    #[error("no matching books found")]
    NoResults,
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" with status {code}"),
        None => String::new(),
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}
