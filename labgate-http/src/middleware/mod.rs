use std::sync::Arc;

use poem::http::StatusCode;
use poem::web::Data;
use poem::{Endpoint, FromRequest, IntoResponse, Request, Response};
use tracing::error;

use labgate_core::alerts::{event_kind, SecurityEvent};
use labgate_core::audit::RequestContext;
use labgate_core::rate_limiting::RateLimitDecision;
use labgate_core::Services;

use crate::common::{self, bearer_digest, json_error, request_context};

static REQUEST_ID_HEADER: &str = "x-request-id";

/// Outermost layer: stamps the correlation context into the request, echoes
/// `X-Request-ID` on every response, and turns uncaught errors into an
/// audited, generic 500 so no internal detail leaks to the caller.
pub async fn request_boundary<E: Endpoint + 'static>(
    ep: Arc<E>,
    mut req: Request,
) -> poem::Result<Response> {
    let services: Services = Data::<&Services>::from_request_without_body(&req)
        .await?
        .0
        .clone();
    let ctx = request_context(&req);
    let request_id = ctx.request_id.to_string();
    req.extensions_mut().insert(ctx.clone());

    let mut response = match ep.call(req).await {
        Ok(output) => output.into_response(),
        Err(err) => {
            let status = err.status();
            if status.is_server_error() {
                error!(%status, error = %err, "Unhandled error in request pipeline");
                services.audit.exception(&ctx, &err.to_string()).await;
                json_error(status, "Internal server error")
            } else {
                json_error(status, &err.to_string())
            }
        }
    };

    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}

/// Admission control in front of every handler: payload cap (413), IP block
/// gate (403), then the fixed-window rate limit (429 + Retry-After). The
/// throttled maintenance pass piggybacks on requests that get through.
pub async fn security_gate<E: Endpoint + 'static>(
    ep: Arc<E>,
    req: Request,
) -> poem::Result<Response> {
    let services: Services = Data::<&Services>::from_request_without_body(&req)
        .await?
        .0
        .clone();
    let ctx = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .ok_or_else(|| poem::Error::from_status(StatusCode::INTERNAL_SERVER_ERROR))?;

    let max_payload = services.config.lock().await.security.max_payload_bytes;
    if let Some(length) = content_length(&req) {
        if length > max_payload {
            return Ok(json_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Payload too large",
            ));
        }
    }

    if services.alerts.is_ip_blocked(ctx.ip).await {
        return Ok(json_error(
            StatusCode::FORBIDDEN,
            "Your IP address has been temporarily blocked",
        ));
    }

    let token_hash = bearer_digest(&req);
    if let RateLimitDecision::Limited { retry_after } = services
        .api_rate_limiter
        .check(&ctx, token_hash.as_deref())
        .await
    {
        let mut event = SecurityEvent::new(event_kind::RATE_LIMIT_HIT);
        if let Some(hash) = token_hash {
            event = event.token_hash(hash);
        }
        services.alerts.check(&ctx, &event).await;

        let mut response = json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please slow down.",
        );
        if let Ok(value) = common::format_retry_after(retry_after).parse() {
            response.headers_mut().insert("retry-after", value);
        }
        return Ok(response);
    }

    let response = ep.call(req).await.map(IntoResponse::into_response);

    services.maintenance.run_if_due().await;

    response
}

fn content_length(req: &Request) -> Option<usize> {
    req.headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
