use log::debug;
use regex::Regex;

/// Derive a higher-resolution cover URL from a thumbnail URL.
///
/// Thumbnails embed a size token, e.g.
/// `https://cdn.kobo.com/book-images/<id>/353/569/90/False/holly-23.jpg`.
/// Dropping the whole `353/569/90/False/` segment yields the original art;
/// with `resize` set, the dimensions are substituted instead and the store
/// resizes to the requested width at the correct aspect ratio. If the URL
/// does not carry the token (the CDN changed its scheme), the thumbnail is
/// returned unchanged: a degraded cover beats no cover.
pub fn resolve_cover_url(thumbnail_url: &str, resize: Option<(u32, u32)>) -> String {
    let resolved = match resize {
        Some((width, height)) => {
            let re = Regex::new(r"\d+/\d+/\d+(/(?:False|True)/)").unwrap();
            re.replace(thumbnail_url, format!("{width}/{height}/100$1"))
                .to_string()
        }
        None => {
            let re = Regex::new(r"\d+/\d+/\d+/(?:False|True)/").unwrap();
            re.replace(thumbnail_url, "").to_string()
        }
    };

    if resolved == thumbnail_url {
        debug!("No size token in cover url, keeping thumbnail: {}", thumbnail_url);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    const THUMBNAIL: &str =
        "https://cdn.kobo.com/book-images/44f0e8b9-3338-4d1c-bd6e-e88e82cb8fad/353/569/90/False/holly-23.jpg";

    #[test]
    fn strips_size_token_for_original_art() {
        assert_eq!(
            resolve_cover_url(THUMBNAIL, None),
            "https://cdn.kobo.com/book-images/44f0e8b9-3338-4d1c-bd6e-e88e82cb8fad/holly-23.jpg"
        );
    }

    #[test]
    fn substitutes_requested_size() {
        assert_eq!(
            resolve_cover_url(THUMBNAIL, Some((1650, 2200))),
            "https://cdn.kobo.com/book-images/44f0e8b9-3338-4d1c-bd6e-e88e82cb8fad/1650/2200/100/False/holly-23.jpg"
        );
    }

    #[test]
    fn unknown_scheme_passes_through() {
        let odd = "https://cdn.kobo.com/new-scheme/holly.jpg?width=353";
        assert_eq!(resolve_cover_url(odd, None), odd);
        assert_eq!(resolve_cover_url(odd, Some((1650, 2200))), odd);
    }
}
