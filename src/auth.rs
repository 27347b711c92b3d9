use axum::http::HeaderMap;

/// Authorization scheme presented by wallet devices.
pub const AUTH_SCHEME: &str = "ApplePass";

#[derive(Clone, Debug)]
pub struct PassAuthorization {
    pub token: String,
}

impl PassAuthorization {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers
            .get(axum::http::header::AUTHORIZATION)?
            .to_str()
            .ok()?;

        let token = value.strip_prefix(AUTH_SCHEME)?.strip_prefix(' ')?.trim();
        if token.is_empty() {
            return None;
        }

        Some(Self {
            token: token.to_string(),
        })
    }
}
