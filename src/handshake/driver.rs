//! Dex login handshake driver

use reqwest::redirect;
use tracing::{debug, info};
use url::Url;

use super::extract::{query_param, redirect_location, req_token_from_html, session_cookie};
use crate::config::DexConfig;
use crate::{Error, Result};

/// Cookie the AuthService sets once the code exchange succeeds
const SESSION_COOKIE: &str = "authservice_session";

/// Outcome of a completed login handshake
#[derive(Debug, Clone)]
pub struct Session {
    /// Value of the `authservice_session` cookie
    pub cookie: String,
    /// Authorization code that was exchanged for the session
    pub code: String,
}

/// Drives the redirect-based Dex login flow end to end:
/// state → auth request → credential POST → approval → code → session cookie.
///
/// Each step's artifact is an opaque string pulled out of the previous
/// response; a step that cannot produce its artifact aborts the whole
/// handshake with a descriptive error and no retry.
#[derive(Debug)]
pub struct HandshakeDriver {
    /// Redirect-less client; Dex CSRF cookies ride in its cookie store
    client: reqwest::Client,
    /// Dex issuer base URL, e.g. `http://localhost:5556/dex`
    issuer: Url,
    /// Protected URL that triggers the AuthService redirect
    start_url: Url,
    /// Static-password credentials
    username: String,
    password: String,
}

impl HandshakeDriver {
    /// Create a driver from the Dex configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer or start URL is missing or invalid.
    pub fn new(config: &DexConfig) -> Result<Self> {
        if config.issuer.is_empty() {
            return Err(Error::Config("dex.issuer is required".to_string()));
        }
        if config.start_url.is_empty() {
            return Err(Error::Config("dex.start_url is required".to_string()));
        }

        let issuer = Url::parse(&config.issuer)
            .map_err(|e| Error::Config(format!("Invalid dex.issuer: {e}")))?;
        let start_url = Url::parse(&config.start_url)
            .map_err(|e| Error::Config(format!("Invalid dex.start_url: {e}")))?;

        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            issuer,
            start_url,
            username: config.resolve_username(),
            password: config.resolve_password(),
        })
    }

    /// Run the full handshake and return the session cookie
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] naming the first step whose expected
    /// artifact (state, request token, redirect, code, cookie) was missing.
    pub async fn login(&self) -> Result<Session> {
        let auth_url = self.request_state().await?;
        let login_url = self.request_login_form(&auth_url).await?;
        let next = self.submit_credentials(&login_url).await?;

        // Dex skips the approval screen when configured to; the login POST
        // then redirects straight to the callback with the code attached.
        let callback = if query_param(&next, "code").is_some() {
            next
        } else {
            self.follow_approval(&next).await?
        };

        self.fetch_session(&callback).await
    }

    /// Step 1: hit the protected URL; the AuthService answers with a
    /// redirect into Dex carrying the CSRF `state` parameter.
    async fn request_state(&self) -> Result<Url> {
        let response = self.client.get(self.start_url.clone()).send().await?;

        if !response.status().is_redirection() {
            return Err(Error::handshake(
                "state",
                format!("expected redirect from start URL, got HTTP {}", response.status()),
            ));
        }

        let auth_url = redirect_location(&response)
            .ok_or_else(|| Error::handshake("state", "redirect has no Location header"))?;

        let state = query_param(&auth_url, "state")
            .ok_or_else(|| Error::handshake("state", "auth redirect carries no state parameter"))?;

        info!(step = "state", %state, "Obtained CSRF state");
        Ok(auth_url)
    }

    /// Step 2: follow the Dex auth URL to the login form and pull out the
    /// auth request token (`req=...`), from either the redirect target or
    /// the form HTML.
    async fn request_login_form(&self, auth_url: &Url) -> Result<Url> {
        let response = self.client.get(auth_url.clone()).send().await?;
        let status = response.status();

        let login_url = if status.is_redirection() {
            let target = redirect_location(&response)
                .ok_or_else(|| Error::handshake("login-form", "redirect has no Location header"))?;
            if query_param(&target, "req").is_none() {
                return Err(Error::handshake(
                    "login-form",
                    format!("redirect target carries no request token: {target}"),
                ));
            }
            target
        } else if status.is_success() {
            let body = response.text().await?;
            let token = req_token_from_html(&body).ok_or_else(|| {
                Error::handshake("login-form", "login form HTML carries no request token")
            })?;
            self.local_login_url(&token)?
        } else {
            return Err(Error::handshake(
                "login-form",
                format!("auth endpoint returned HTTP {status}"),
            ));
        };

        debug!(step = "login-form", %login_url, "Resolved login form");
        Ok(login_url)
    }

    /// Step 3: POST the static-password credentials; Dex answers with a
    /// redirect to the approval page (or straight to the callback).
    async fn submit_credentials(&self, login_url: &Url) -> Result<Url> {
        let response = self
            .client
            .post(login_url.clone())
            .form(&[("login", self.username.as_str()), ("password", self.password.as_str())])
            .send()
            .await?;

        if !response.status().is_redirection() {
            return Err(Error::handshake(
                "credentials",
                format!(
                    "no redirect after login POST (HTTP {}), check username/password",
                    response.status()
                ),
            ));
        }

        let next = redirect_location(&response)
            .ok_or_else(|| Error::handshake("credentials", "redirect has no Location header"))?;

        info!(step = "credentials", "Credentials accepted");
        Ok(next)
    }

    /// Step 4: follow the approval redirect to obtain the authorization
    /// code aimed back at the AuthService callback.
    async fn follow_approval(&self, approval_url: &Url) -> Result<Url> {
        let response = self.client.get(approval_url.clone()).send().await?;

        if !response.status().is_redirection() {
            return Err(Error::handshake(
                "approval",
                format!("expected redirect from approval, got HTTP {}", response.status()),
            ));
        }

        let callback = redirect_location(&response)
            .ok_or_else(|| Error::handshake("approval", "redirect has no Location header"))?;

        if query_param(&callback, "code").is_none() {
            return Err(Error::handshake(
                "approval",
                format!("callback redirect carries no authorization code: {callback}"),
            ));
        }

        info!(step = "approval", "Obtained authorization code");
        Ok(callback)
    }

    /// Step 5: hit the AuthService callback; the code is exchanged
    /// server-side and the session arrives as a `Set-Cookie`.
    async fn fetch_session(&self, callback_url: &Url) -> Result<Session> {
        let code = query_param(callback_url, "code")
            .ok_or_else(|| Error::handshake("session", "callback URL carries no code"))?;

        let response = self.client.get(callback_url.clone()).send().await?;

        let cookie = session_cookie(response.headers(), SESSION_COOKIE).ok_or_else(|| {
            Error::handshake(
                "session",
                format!(
                    "callback response (HTTP {}) set no {SESSION_COOKIE} cookie",
                    response.status()
                ),
            )
        })?;

        info!(step = "session", "Obtained session cookie");
        Ok(Session { cookie, code })
    }

    /// Dex static-password login endpoint for an extracted request token
    fn local_login_url(&self, req_token: &str) -> Result<Url> {
        let raw = format!(
            "{}/auth/local?req={req_token}",
            self.issuer.as_str().trim_end_matches('/')
        );
        Url::parse(&raw).map_err(|e| Error::Internal(format!("Invalid login URL {raw}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(issuer: &str, start_url: &str) -> DexConfig {
        DexConfig {
            issuer: issuer.to_string(),
            start_url: start_url.to_string(),
            username: "admin@example.com".to_string(),
            password: "password".to_string(),
        }
    }

    #[test]
    fn driver_requires_issuer_and_start_url() {
        let err = HandshakeDriver::new(&config("", "http://localhost:8402/")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = HandshakeDriver::new(&config("http://localhost:5556/dex", "")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn driver_rejects_unparseable_urls() {
        let err = HandshakeDriver::new(&config("not a url", "http://localhost:8402/")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn local_login_url_is_anchored_at_the_issuer() {
        let driver =
            HandshakeDriver::new(&config("http://localhost:5556/dex", "http://localhost:8402/"))
                .unwrap();
        let url = driver.local_login_url("abc123").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5556/dex/auth/local?req=abc123"
        );
    }

    #[test]
    fn local_login_url_tolerates_trailing_slash() {
        let driver =
            HandshakeDriver::new(&config("http://localhost:5556/dex/", "http://localhost:8402/"))
                .unwrap();
        let url = driver.local_login_url("abc123").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5556/dex/auth/local?req=abc123"
        );
    }
}
