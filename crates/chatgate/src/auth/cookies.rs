//! Cookie parsing and `Set-Cookie` construction.

use std::time::Duration;

use axum::http::HeaderMap;
use axum::http::header::COOKIE;

use chatgate_protocol::auth::CSRF_COOKIE;

/// Find a cookie value in a `Cookie` header.
fn cookie_from_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Value of the named cookie across all `Cookie` headers of a request.
pub fn cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .find_map(|header| cookie_from_header(header, cookie_name))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// How the relay names and scopes its cookies.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    /// Name of the HttpOnly session cookie.
    pub session_cookie: String,
    /// Lifetime of the session cookie (the session's idle TTL).
    pub session_max_age: Duration,
    /// Lifetime of the readable token cookie (the token TTL).
    pub token_max_age: Duration,
    /// Add the `Secure` attribute.
    pub secure: bool,
}

impl CookiePolicy {
    fn secure_flag(&self) -> &'static str {
        if self.secure { " Secure;" } else { "" }
    }

    /// HttpOnly session cookie.
    pub fn session_cookie(&self, session_id: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Strict;{} Max-Age={}",
            self.session_cookie,
            session_id,
            self.secure_flag(),
            self.session_max_age.as_secs()
        )
    }

    /// Readable cookie mirroring the session's CSRF token.
    pub fn csrf_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; SameSite=Strict;{} Max-Age={}",
            CSRF_COOKIE,
            token,
            self.secure_flag(),
            self.token_max_age.as_secs()
        )
    }

    /// Expire both the token cookie and the session cookie.
    pub fn clear_all(&self) -> Vec<String> {
        vec![
            format!(
                "{}=; Path=/; SameSite=Strict;{} Max-Age=0",
                CSRF_COOKIE,
                self.secure_flag()
            ),
            format!(
                "{}=; Path=/; HttpOnly; SameSite=Strict;{} Max-Age=0",
                self.session_cookie,
                self.secure_flag()
            ),
        ]
    }

    /// Whether a `Set-Cookie` value targets the session cookie.
    pub fn is_session_cookie(&self, set_cookie: &str) -> bool {
        set_cookie
            .split_once('=')
            .is_some_and(|(name, _)| name.trim() == self.session_cookie)
    }
}
