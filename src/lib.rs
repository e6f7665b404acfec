// Library interface for kobo_metadata
// Resolves book metadata and covers from the Kobo store: search, fuzzy
// candidate ranking, detail scraping, and cover URL upscaling.

pub mod book_page;
pub mod config;
pub mod cover;
pub mod error;
pub mod http_client;
pub mod matching;
pub mod models;
pub mod query;
pub mod resolver;
pub mod search_page;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{BookMetadata, SearchQuery, Series};
pub use resolver::KoboMetadata;
