//! Cookie reading and `Set-Cookie` rendering

use http::HeaderMap;
use http::header::COOKIE;

use crate::config::SameSite;

/// Attributes for a `Set-Cookie` value; `Path=/` and `HttpOnly` are always set
#[derive(Debug, Clone, Copy)]
pub struct CookieAttributes {
    pub secure: bool,
    pub same_site: SameSite,
    /// `None` renders a browser-session cookie
    pub max_age: Option<u64>,
}

/// Render `name=value; Path=/; HttpOnly; SameSite=..[; Max-Age=..][; Secure]`
pub fn set_cookie(name: &str, value: &str, attrs: &CookieAttributes) -> String {
    let mut cookie = format!(
        "{name}={value}; Path=/; HttpOnly; SameSite={}",
        attrs.same_site.as_str()
    );
    if let Some(max_age) = attrs.max_age {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    if attrs.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Render a cookie that makes the browser drop `name`
pub fn clear_cookie(name: &str, attrs: &CookieAttributes) -> String {
    set_cookie(
        name,
        "",
        &CookieAttributes {
            max_age: Some(0),
            ..*attrs
        },
    )
}

/// First value of cookie `name` across all `Cookie` headers
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_set_cookie_attributes() {
        let attrs = CookieAttributes {
            secure: true,
            same_site: SameSite::Strict,
            max_age: Some(60),
        };
        assert_eq!(
            set_cookie("sid", "abc", &attrs),
            "sid=abc; Path=/; HttpOnly; SameSite=Strict; Max-Age=60; Secure"
        );

        let attrs = CookieAttributes {
            secure: false,
            same_site: SameSite::Lax,
            max_age: None,
        };
        assert_eq!(
            set_cookie("csrf_token", "t", &attrs),
            "csrf_token=t; Path=/; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn test_clear_cookie() {
        let attrs = CookieAttributes {
            secure: true,
            same_site: SameSite::Strict,
            max_age: Some(3600),
        };
        assert_eq!(
            clear_cookie("sid", &attrs),
            "sid=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0; Secure"
        );
    }

    #[test]
    fn test_read_cookie_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; sid=one"));
        headers.append(COOKIE, HeaderValue::from_static("csrf_token=two"));

        assert_eq!(read_cookie(&headers, "sid"), Some("one"));
        assert_eq!(read_cookie(&headers, "csrf_token"), Some("two"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_read_cookie_ignores_empty_and_prefix_matches() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("sid=; xsid=evil"));
        assert_eq!(read_cookie(&headers, "sid"), None);
    }
}
