use url::Url;

use crate::error::{HlsError, HlsResult};

/// Parse an URL which has to be absolute, such as the one given to
/// `Player::load_movie`.
pub fn parse_absolute(url: &str) -> HlsResult<Url> {
    Url::parse(url.trim()).map_err(|_| HlsError::InvalidUrl(url.to_owned()))
}

/// Resolve `reference`, as found in a playlist, against the URL of that
/// playlist, following RFC 3986.
///
/// Absolute references are returned as is.
pub fn resolve(base: &Url, reference: &str) -> HlsResult<Url> {
    base.join(reference.trim())
        .map_err(|_| HlsError::InvalidUrl(reference.to_owned()))
}

/// Returns `true` if `url` has a scheme, and thus does not need any base to be
/// fetched.
pub fn is_absolute(url: &str) -> bool {
    Url::parse(url).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/content/master/index.m3u8?token=1").unwrap()
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(
            resolve(&base(), "low/index.m3u8").unwrap().as_str(),
            "https://cdn.example.com/content/master/low/index.m3u8"
        );
        assert_eq!(
            resolve(&base(), "../seg0.ts").unwrap().as_str(),
            "https://cdn.example.com/content/seg0.ts"
        );
        assert_eq!(
            resolve(&base(), "seg1.ts?part=1").unwrap().as_str(),
            "https://cdn.example.com/content/master/seg1.ts?part=1"
        );
    }

    #[test]
    fn test_resolve_absolute_path_and_url() {
        assert_eq!(
            resolve(&base(), "/other/seg.ts").unwrap().as_str(),
            "https://cdn.example.com/other/seg.ts"
        );
        assert_eq!(
            resolve(&base(), "//mirror.example.com/seg.ts")
                .unwrap()
                .as_str(),
            "https://mirror.example.com/seg.ts"
        );
        assert_eq!(
            resolve(&base(), "http://elsewhere.example.com/a.ts")
                .unwrap()
                .as_str(),
            "http://elsewhere.example.com/a.ts"
        );
    }

    #[test]
    fn test_parse_absolute() {
        assert!(parse_absolute("https://example.com/a.m3u8").is_ok());
        assert!(matches!(
            parse_absolute("a.m3u8"),
            Err(HlsError::InvalidUrl(_))
        ));
        assert!(matches!(parse_absolute(""), Err(HlsError::InvalidUrl(_))));
    }

    #[test]
    fn test_is_absolute() {
        assert!(is_absolute("https://example.com/a.ts"));
        assert!(!is_absolute("a.ts"));
        assert!(!is_absolute("/a.ts"));
    }
}
