use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
};
use tracing::warn;

use crate::{config::AppConfig, error::ApiError, state::AppState};

/// Host names a request may be addressed to. `*` allows anything, a leading
/// dot allows a domain and all of its subdomains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedHosts(Vec<String>);

impl AllowedHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            hosts
                .into_iter()
                .map(|h| Into::<String>::into(h).trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        )
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        let domain = domain_of(host);
        self.0.iter().any(|pattern| {
            if pattern == "*" {
                true
            } else if domain.is_empty() {
                false
            } else if let Some(parent) = pattern.strip_prefix('.') {
                domain == parent || domain.ends_with(pattern.as_str())
            } else {
                domain == *pattern
            }
        })
    }
}

/// Lowercased host without port or trailing dot; IPv6 literals keep brackets.
fn domain_of(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    let domain = if host.ends_with(']') {
        host.as_str()
    } else {
        match host.rsplit_once(':') {
            Some((domain, _port)) => domain,
            None => host.as_str(),
        }
    };
    domain.strip_suffix('.').unwrap_or(domain).to_string()
}

pub async fn enforce_allowed_hosts(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_owned()))
        .unwrap_or_default();

    if state.config.allowed_hosts.is_allowed(&host) {
        return next.run(req).await;
    }

    warn!(%host, "rejected request for disallowed host");
    ApiError::BadRequest(format!("Invalid HTTP_HOST header: '{host}'.")).into_response()
}

/// Response headers every production response carries.
pub fn with_security_headers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
}

pub fn cors_layer(config: &AppConfig) -> CorsLayer {
    if !config.environment.is_production() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(%origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_port_insensitive() {
        let hosts = AllowedHosts::new(["localhost", "API.Example.com"]);
        assert!(hosts.is_allowed("localhost"));
        assert!(hosts.is_allowed("localhost:8000"));
        assert!(hosts.is_allowed("api.example.com"));
        assert!(hosts.is_allowed("api.example.com."));
        assert!(!hosts.is_allowed("www.example.com"));
        assert!(!hosts.is_allowed(""));
    }

    #[test]
    fn leading_dot_matches_subdomains() {
        let hosts = AllowedHosts::new([".vercel.app"]);
        assert!(hosts.is_allowed("vercel.app"));
        assert!(hosts.is_allowed("my-app.vercel.app"));
        assert!(hosts.is_allowed("a.b.vercel.app:443"));
        assert!(!hosts.is_allowed("notvercel.app"));
    }

    #[test]
    fn wildcard_matches_everything() {
        let hosts = AllowedHosts::new(["*"]);
        assert!(hosts.is_allowed("whatever.example"));
        assert!(hosts.is_allowed(""));
    }

    #[test]
    fn ipv6_literals() {
        let hosts = AllowedHosts::new(["[::1]"]);
        assert!(hosts.is_allowed("[::1]"));
        assert!(hosts.is_allowed("[::1]:8080"));
        assert!(!hosts.is_allowed("[::2]:8080"));
    }
}
