use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap, header};

use brokerage_auth::EffectivePermissions;
use brokerage_core::UserId;

/// Client facts captured once per request, before authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    ip: String,
    user_agent: Option<String>,
}

impl RequestMeta {
    pub const UNKNOWN_IP: &'static str = "unknown";

    pub fn new(ip: impl Into<String>, user_agent: Option<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent,
        }
    }

    /// Client address: first `X-Forwarded-For` hop when trusted, else the
    /// socket peer, else `unknown`.
    pub fn from_parts(headers: &HeaderMap, extensions: &Extensions, trust_forwarded_for: bool) -> Self {
        let forwarded = trust_forwarded_for
            .then(|| headers.get("x-forwarded-for"))
            .flatten()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let ip = forwarded
            .or_else(|| {
                extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| Self::UNKNOWN_IP.to_string());

        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self { ip, user_agent }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

/// Owner of the resource a route acts on. Inserted by whatever loads the
/// resource, and consumed by the permission gate for `:own` checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceOwner(pub UserId);

/// Permissions resolved by the gate, reusable by the handler.
#[derive(Debug, Clone)]
pub struct ResolvedPermissions(pub Arc<EffectivePermissions>);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn forwarded_for_is_ignored_unless_trusted() {
        let mut ext = Extensions::new();
        ext.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5000))));
        let h = headers(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1"), ("user-agent", "curl/8")]);

        let trusted = RequestMeta::from_parts(&h, &ext, true);
        assert_eq!(trusted.ip(), "203.0.113.9");
        assert_eq!(trusted.user_agent(), Some("curl/8"));

        let untrusted = RequestMeta::from_parts(&h, &ext, false);
        assert_eq!(untrusted.ip(), "10.0.0.7");
    }

    #[test]
    fn missing_peer_is_unknown() {
        let meta = RequestMeta::from_parts(&HeaderMap::new(), &Extensions::new(), true);
        assert_eq!(meta.ip(), RequestMeta::UNKNOWN_IP);
        assert_eq!(meta.user_agent(), None);
    }
}
