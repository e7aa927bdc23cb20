//! Response-parsing helpers for the login handshake
//!
//! Every artifact the handshake needs (CSRF state, auth request token,
//! authorization code, session cookie) arrives as an opaque string buried
//! in a redirect `Location`, a query string, an HTML form, or a `Set-Cookie`
//! header. These helpers dig them out.

use axum::http::{HeaderMap, header};
use regex::Regex;
use url::Url;

/// Resolve a response's `Location` header against the URL it was served from
pub(crate) fn redirect_location(response: &reqwest::Response) -> Option<Url> {
    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    response.url().join(location).ok()
}

/// First query parameter with the given name
pub(crate) fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Auth request token from a Dex login form body.
/// Dex embeds it as `req=<token>` in the form action.
pub(crate) fn req_token_from_html(body: &str) -> Option<String> {
    let re = Regex::new(r"req=([A-Za-z0-9._~-]+)").unwrap();
    re.captures(body).map(|caps| caps[1].to_string())
}

/// Value of a named cookie from the response's `Set-Cookie` headers
pub(crate) fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::SET_COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        let Some(first) = raw.split(';').next() else {
            continue;
        };
        if let Some((key, cookie_value)) = first.trim().split_once('=') {
            if key == name {
                return Some(cookie_value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn query_param_finds_first_match() {
        let url = Url::parse("http://localhost/dex/auth?client_id=gateway&state=abc123").unwrap();
        assert_eq!(query_param(&url, "state").as_deref(), Some("abc123"));
        assert_eq!(query_param(&url, "code"), None);
    }

    #[test]
    fn query_param_decodes_percent_encoding() {
        let url = Url::parse("http://localhost/cb?code=a%2Fb").unwrap();
        assert_eq!(query_param(&url, "code").as_deref(), Some("a/b"));
    }

    #[test]
    fn req_token_extracted_from_form_action() {
        let body = r#"<form method="post" action="/dex/auth/local?req=qwcgkmlpzxwv2q6rn5mvno7dy&amp;hmac=x">"#;
        assert_eq!(
            req_token_from_html(body).as_deref(),
            Some("qwcgkmlpzxwv2q6rn5mvno7dy")
        );
    }

    #[test]
    fn req_token_missing_yields_none() {
        assert_eq!(req_token_from_html("<html><body>login</body></html>"), None);
    }

    #[test]
    fn session_cookie_found_among_attributes() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("authservice_session=MTY5; Path=/; HttpOnly"),
        );
        assert_eq!(
            session_cookie(&headers, "authservice_session").as_deref(),
            Some("MTY5")
        );
    }

    #[test]
    fn session_cookie_skips_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("dex_csrf=zzz; Path=/dex"),
        );
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_static("authservice_session=wanted; Path=/"),
        );
        assert_eq!(
            session_cookie(&headers, "authservice_session").as_deref(),
            Some("wanted")
        );
    }

    #[test]
    fn session_cookie_absent_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(session_cookie(&headers, "authservice_session"), None);
    }
}
