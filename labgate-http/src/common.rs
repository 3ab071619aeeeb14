use std::net::IpAddr;

use poem::http::StatusCode;
use poem::{FromRequest, Request, RequestBody, Response};
use poem_openapi::Object;
use serde::Serialize;

use labgate_common::helpers::hash::token_digest;
use labgate_common::helpers::net::is_public_ip;
use labgate_core::audit::RequestContext;
use labgate_core::auth::{is_token_format, parse_bearer, AuthError};

/// Forwarded-header chain checked for the client address, most specific
/// first. Private/reserved hops are skipped so an internal proxy address
/// never becomes the rate-limiting identity.
const IP_HEADERS: &[&str] = &[
    "cf-connecting-ip",
    "client-ip",
    "x-forwarded-for",
    "x-forwarded",
    "x-cluster-client-ip",
    "forwarded-for",
];

pub fn client_ip(req: &Request) -> IpAddr {
    for header in IP_HEADERS {
        if let Some(value) = req.headers().get(*header).and_then(|v| v.to_str().ok()) {
            for candidate in value.split(',') {
                if let Ok(ip) = candidate.trim().parse::<IpAddr>() {
                    if is_public_ip(ip) {
                        return ip;
                    }
                }
            }
        }
    }

    req.remote_addr()
        .as_socket_addr()
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::from([0, 0, 0, 0]))
}

pub fn user_agent(req: &Request) -> String {
    req.headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim()
        .chars()
        .take(255)
        .collect()
}

/// Normalize the request path for counter keys and audit entries.
pub fn sanitize_endpoint(path: &str) -> String {
    let cleaned: String = path
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
        .take(255)
        .collect();
    if cleaned.is_empty() {
        "/".to_owned()
    } else {
        cleaned
    }
}

pub fn request_context(req: &Request) -> RequestContext {
    RequestContext::new(
        client_ip(req),
        user_agent(req),
        sanitize_endpoint(req.uri().path()),
        req.method().to_string(),
    )
}

pub fn authorization_header(req: &Request) -> Option<String> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Digest of a well-formed bearer token, if one was presented. Used by the
/// rate limiter before the auth guard has looked at the request.
pub fn bearer_digest(req: &Request) -> Option<String> {
    let header = authorization_header(req)?;
    let token = parse_bearer(&header)?;
    is_token_format(token).then(|| token_digest(token))
}

/// Per-request context stamped by the boundary middleware.
pub struct ReqCtx(pub RequestContext);

impl<'a> FromRequest<'a> for ReqCtx {
    async fn from_request(req: &'a Request, _body: &mut RequestBody) -> poem::Result<Self> {
        req.extensions()
            .get::<RequestContext>()
            .cloned()
            .map(ReqCtx)
            .ok_or_else(|| poem::Error::from_status(StatusCode::INTERNAL_SERVER_ERROR))
    }
}

/// Bearer header captured before poem-openapi consumes the request.
pub struct AuthzHeader(pub Option<String>);

impl<'a> FromRequest<'a> for AuthzHeader {
    async fn from_request(req: &'a Request, _body: &mut RequestBody) -> poem::Result<Self> {
        Ok(AuthzHeader(authorization_header(req)))
    }
}

#[derive(Object, Serialize, Clone, Debug)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

pub fn json_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "success": false, "message": message });
    Response::builder()
        .status(status)
        .content_type("application/json; charset=utf-8")
        .body(body.to_string())
}

/// Shared mapping from guard failures to response statuses: 401 for any
/// unauthorized path, 403 for a role mismatch, 500 (fail closed) when the
/// store broke mid-validation.
pub fn auth_error_body(error: &AuthError) -> (StatusCode, ErrorBody) {
    match error {
        AuthError::Unauthorized(message) => {
            (StatusCode::UNAUTHORIZED, ErrorBody::new(*message))
        }
        AuthError::Forbidden { required } => {
            let roles = required
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            (
                StatusCode::FORBIDDEN,
                ErrorBody::new(format!("Access denied. Required role: {roles}")),
            )
        }
        AuthError::Storage(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody::new("Internal server error"),
        ),
    }
}

pub fn format_retry_after(retry_after: std::time::Duration) -> String {
    retry_after.as_secs().max(1).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_endpoint() {
        assert_eq!(sanitize_endpoint("/api/auth/login"), "/api/auth/login");
        assert_eq!(sanitize_endpoint("/api/x?y=1"), "/api/xy1");
        assert_eq!(sanitize_endpoint(""), "/");
        let long = "/".repeat(300);
        assert_eq!(sanitize_endpoint(&long).len(), 255);
    }
}
