//! Dex OIDC login handshake
//!
//! Diagnostic driver for the redirect-based login flow the AuthService and
//! Dex perform in front of the dashboards: obtain CSRF state, resolve the
//! login form's auth request token, submit static-password credentials,
//! follow the approval redirect to the authorization code, and exchange it
//! at the AuthService callback for a session cookie. Each intermediate
//! token is treated as an opaque string.

mod driver;
mod extract;

pub use driver::{HandshakeDriver, Session};
