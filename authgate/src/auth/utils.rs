//! Request inspection helpers shared by the credential handlers.

use axum::http::{HeaderMap, header, request::Parts, uri::Scheme};

/// Credentials carried in an `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization<'a> {
    Bearer(&'a str),
    Basic(&'a str),
    Other { scheme: &'a str, credentials: &'a str },
}

impl<'a> Authorization<'a> {
    /// Parse `<scheme> <credentials>`; the scheme is matched case-insensitively.
    pub fn from_headers(headers: &'a HeaderMap) -> Option<Self> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let (scheme, credentials) = value.trim().split_once(' ')?;
        let credentials = credentials.trim();

        Some(if scheme.eq_ignore_ascii_case("bearer") {
            Authorization::Bearer(credentials)
        } else if scheme.eq_ignore_ascii_case("basic") {
            Authorization::Basic(credentials)
        } else {
            Authorization::Other { scheme, credentials }
        })
    }
}

/// Value of the cookie called `name`, if the request carries one.
pub fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(cookie_name, _)| *cookie_name == name)
        .map(|(_, value)| value)
}

/// Whether the request reached us over TLS, directly or through a terminating proxy.
pub fn is_secure(request: &Parts) -> bool {
    if request.uri.scheme() == Some(&Scheme::HTTPS) {
        return true;
    }
    request
        .headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}
