use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Root URL of the store.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Kobo country store to fetch from, e.g. "us", "au", "gb".
    #[serde(default = "default_country")]
    pub country: String,

    /// Language segment of store URLs.
    #[serde(default = "default_language")]
    pub language: String,

    /// Language filter applied to searches ("all" disables filtering).
    #[serde(default = "default_search_languages")]
    pub search_languages: String,

    /// How many possible matches to fetch metadata for. When applying
    /// metadata in bulk there is no use setting this above 1.
    #[serde(default = "default_num_matches")]
    pub num_matches: usize,

    /// Candidates whose title contains any of these terms (case-insensitive
    /// substring) are discarded before ranking.
    #[serde(default)]
    pub title_blacklist: Vec<String>,

    /// Records carrying any of these tags (case-insensitive) are discarded
    /// after the detail fetch.
    #[serde(default)]
    pub tag_blacklist: Vec<String>,

    /// Strip leading zeroes from numbers in the title before searching.
    /// Kobo search does a poor job of matching zero-padded numbers.
    #[serde(default)]
    pub remove_leading_zeroes: bool,

    /// Request a resized cover at `max_cover_size` instead of the original
    /// art.
    #[serde(default)]
    pub resize_cover: bool,

    /// Target (width, height) when `resize_cover` is set. Kobo resizes to
    /// the requested width and keeps the correct aspect ratio.
    #[serde(default = "default_max_cover_size")]
    pub max_cover_size: (u32, u32),

    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Timeout for HTTP requests in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retry budget for transient network failures
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Enable cookie support (required for the store's session checks)
    #[serde(default = "default_true")]
    pub enable_cookies: bool,

    /// Enable gzip/brotli compression
    #[serde(default = "default_true")]
    pub enable_compression: bool,
}

fn default_true() -> bool {
    true
}
fn default_base_url() -> String {
    "https://www.kobo.com/".to_string()
}
fn default_country() -> String {
    "us".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_search_languages() -> String {
    "all".to_string()
}
fn default_num_matches() -> usize {
    1
}
fn default_max_cover_size() -> (u32, u32) {
    (1650, 2200)
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> usize {
    2
}
fn default_initial_retry_delay() -> u64 {
    500
}
fn default_max_retry_delay() -> u64 {
    8000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            country: default_country(),
            language: default_language(),
            search_languages: default_search_languages(),
            num_matches: default_num_matches(),
            title_blacklist: Vec::new(),
            tag_blacklist: Vec::new(),
            remove_leading_zeroes: false,
            resize_cover: false,
            max_cover_size: default_max_cover_size(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            enable_cookies: true,
            enable_compression: true,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let path = Path::new("kobo_metadata.toml");
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                if let Ok(cfg) = toml::from_str::<Config>(&content) {
                    return cfg;
                }
            }
        }
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.base_url, "https://www.kobo.com/");
        assert_eq!(cfg.country, "us");
        assert_eq!(cfg.num_matches, 1);
        assert!(cfg.title_blacklist.is_empty());
        assert_eq!(cfg.max_cover_size, (1650, 2200));
        assert_eq!(cfg.http.max_retries, 2);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            country = "au"
            num_matches = 3
            title_blacklist = ["junior", "boxed set"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.country, "au");
        assert_eq!(cfg.num_matches, 3);
        assert_eq!(cfg.title_blacklist.len(), 2);
        assert_eq!(cfg.language, "en");
        assert!(!cfg.resize_cover);
        assert_eq!(cfg.http.timeout_secs, 30);
    }
}
