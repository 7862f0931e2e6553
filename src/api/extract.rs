//! Request extractors: identity headers into a `RequestContext`, and JSON bodies
//! whose rejections render through `ApiError`.

use axum::extract::{FromRequest, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use crate::context::{Actor, RequestContext};
use super::ApiError;

pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = context_from_headers(&parts.headers)?;
        tracing::debug!(request_id = %ctx.request_id, role = ctx.actor.role(), "request context");
        Ok(ctx)
    }
}

fn context_from_headers(headers: &HeaderMap) -> Result<RequestContext, ApiError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty());
    let actor = match header(ACTOR_ROLE_HEADER) {
        Some(role) => Actor::from_parts(role, header(ACTOR_ID_HEADER))?,
        None => Actor::Guest,
    };
    let ctx = RequestContext::new(actor);
    Ok(match header(REQUEST_ID_HEADER) {
        Some(id) => ctx.with_request_id(id),
        None => ctx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    #[test]
    fn test_missing_role_is_guest() {
        let ctx = context_from_headers(&HeaderMap::new()).unwrap();
        assert_eq!(ctx.actor, Actor::Guest);
        assert!(!ctx.request_id.is_empty());
    }

    #[test]
    fn test_headers_build_the_actor() {
        let id = Uuid::now_v7();
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_ROLE_HEADER, HeaderValue::from_static("admin"));
        headers.insert(ACTOR_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-7"));
        let ctx = context_from_headers(&headers).unwrap();
        assert_eq!(ctx.actor, Actor::Admin(id));
        assert_eq!(ctx.request_id, "req-7");
    }

    #[test]
    fn test_bad_identity_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_ROLE_HEADER, HeaderValue::from_static("producer"));
        assert!(matches!(context_from_headers(&headers), Err(ApiError::Unauthorized(_))));
    }
}
