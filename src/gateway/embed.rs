//! Response rewrites for iframe embedding
//!
//! The dashboards fronted by this gateway are rendered inside iframes, and
//! their own responses forbid that: `X-Frame-Options` headers and
//! `frame-ancestors` CSP directives block embedding, and missing CORS
//! headers block the shell's API calls. These helpers scrub proxied
//! responses so the embedded views actually render.

use axum::http::{HeaderMap, HeaderValue, header};

use crate::config::EmbedConfig;

/// CSP directive that permits embedding from any ancestor
const FRAME_ANCESTORS_ANY: &str = "frame-ancestors *";

/// Remove frame-blocking headers from a proxied response
pub fn strip_frame_headers(headers: &mut HeaderMap) {
    headers.remove(header::X_FRAME_OPTIONS);
}

/// Rewrite `Content-Security-Policy` so `frame-ancestors *` applies.
///
/// Any existing `frame-ancestors` directive is replaced; other directives
/// are preserved. A CSP value that is not valid UTF-8 is replaced wholesale.
pub fn rewrite_csp(headers: &mut HeaderMap) {
    let Some(current) = headers.get(header::CONTENT_SECURITY_POLICY) else {
        return;
    };

    let rewritten = match current.to_str() {
        Ok(value) => permit_frame_ancestors(value),
        Err(_) => FRAME_ANCESTORS_ANY.to_string(),
    };

    // A rewritten directive list is always a valid header value
    if let Ok(value) = HeaderValue::from_str(&rewritten) {
        headers.insert(header::CONTENT_SECURITY_POLICY, value);
    }
}

/// Replace any `frame-ancestors` directive with `frame-ancestors *`,
/// keeping the remaining directives intact.
fn permit_frame_ancestors(csp: &str) -> String {
    let mut directives: Vec<&str> = csp
        .split(';')
        .map(str::trim)
        .filter(|d| !d.is_empty() && !d.starts_with("frame-ancestors"))
        .collect();
    directives.push(FRAME_ANCESTORS_ANY);
    directives.join("; ")
}

/// Inject permissive CORS headers.
///
/// `request_headers` is the request's `Access-Control-Request-Headers`
/// value; when present it is echoed back, otherwise `*` is allowed.
pub fn apply_cors(headers: &mut HeaderMap, request_headers: Option<&HeaderValue>) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    let allow_headers = request_headers
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
}

/// Apply the configured response surgery to a proxied response
pub fn scrub_response(
    headers: &mut HeaderMap,
    embed: &EmbedConfig,
    request_headers: Option<&HeaderValue>,
) {
    if embed.allow_framing {
        strip_frame_headers(headers);
        rewrite_csp(headers);
    }
    if embed.cors {
        apply_cors(headers, request_headers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn x_frame_options_is_removed() {
        let mut headers = headers_with(header::X_FRAME_OPTIONS, "DENY");
        strip_frame_headers(&mut headers);
        assert!(!headers.contains_key(header::X_FRAME_OPTIONS));
    }

    #[test]
    fn csp_frame_ancestors_is_replaced() {
        let mut headers = headers_with(
            header::CONTENT_SECURITY_POLICY,
            "default-src 'self'; frame-ancestors 'none'; img-src *",
        );
        rewrite_csp(&mut headers);

        let csp = headers
            .get(header::CONTENT_SECURITY_POLICY)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(csp, "default-src 'self'; img-src *; frame-ancestors *");
    }

    #[test]
    fn csp_without_frame_ancestors_gets_one_appended() {
        let mut headers = headers_with(header::CONTENT_SECURITY_POLICY, "default-src 'self'");
        rewrite_csp(&mut headers);

        let csp = headers
            .get(header::CONTENT_SECURITY_POLICY)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(csp, "default-src 'self'; frame-ancestors *");
    }

    #[test]
    fn missing_csp_stays_missing() {
        let mut headers = HeaderMap::new();
        rewrite_csp(&mut headers);
        assert!(!headers.contains_key(header::CONTENT_SECURITY_POLICY));
    }

    #[test]
    fn cors_defaults_to_wildcard_headers() {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers, None);

        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[test]
    fn cors_echoes_requested_headers() {
        let mut headers = HeaderMap::new();
        let requested = HeaderValue::from_static("authorization, x-custom");
        apply_cors(&mut headers, Some(&requested));

        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "authorization, x-custom"
        );
    }

    #[test]
    fn scrub_respects_disabled_framing() {
        let embed = EmbedConfig {
            allow_framing: false,
            cors: false,
        };
        let mut headers = headers_with(header::X_FRAME_OPTIONS, "SAMEORIGIN");
        scrub_response(&mut headers, &embed, None);

        assert!(headers.contains_key(header::X_FRAME_OPTIONS));
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[test]
    fn scrub_applies_framing_and_cors() {
        let embed = EmbedConfig::default();
        let mut headers = headers_with(header::X_FRAME_OPTIONS, "DENY");
        headers.insert(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("frame-ancestors 'self'"),
        );
        scrub_response(&mut headers, &embed, None);

        assert!(!headers.contains_key(header::X_FRAME_OPTIONS));
        assert_eq!(headers[header::CONTENT_SECURITY_POLICY], "frame-ancestors *");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
