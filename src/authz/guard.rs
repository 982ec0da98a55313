use axum::body::{to_bytes, Body};
use axum::extract::{RawPathParams, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use axum::Extension;
use serde_json::Value;
use uuid::Uuid;

use super::permissions;
use super::principal::Principal;
use super::resolver::{Authorize, Decision};
use crate::app::AppState;
use crate::errors::AppError;
use crate::jwt::AuthUser;

const BODY_SNIFF_LIMIT: usize = 1024 * 1024;

/// Per-route declaration consumed by [`enforce`]: which resource the route
/// belongs to, and optionally which parameter names the target entity.
///
/// The action defaults to the HTTP method (GET -> view, POST -> create,
/// PUT/PATCH -> update, DELETE -> delete) and can be pinned explicitly.
#[derive(Debug, Clone, Copy)]
pub struct RouteGuard {
    pub resource_path: &'static str,
    pub entity_param: Option<&'static str>,
    pub action_override: Option<&'static str>,
}

impl RouteGuard {
    pub fn resource(resource_path: &'static str) -> Self {
        Self {
            resource_path,
            entity_param: None,
            action_override: None,
        }
    }

    pub fn with_entity_param(mut self, name: &'static str) -> Self {
        self.entity_param = Some(name);
        self
    }

    pub fn with_action(mut self, action: &'static str) -> Self {
        self.action_override = Some(action);
        self
    }

    fn action_for(&self, method: &Method) -> &'static str {
        if let Some(action) = self.action_override {
            return action;
        }
        match *method {
            Method::GET | Method::HEAD => permissions::VIEW,
            Method::POST => permissions::CREATE,
            Method::PUT | Method::PATCH => permissions::UPDATE,
            Method::DELETE => permissions::DELETE,
            // Anything exotic requires the broadest grant.
            _ => permissions::MANAGE,
        }
    }
}

/// Access middleware. Authenticates via the bearer token, re-resolves the
/// principal's authorization state from storage, evaluates the resolver and
/// either short-circuits with 401/403 or forwards the request with the
/// resolved [`Principal`] attached as an extension.
pub async fn enforce(
    State(state): State<AppState>,
    Extension(guard): Extension<RouteGuard>,
    params: RawPathParams,
    auth: AuthUser,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Identity comes from the token; everything else is read fresh so a
    // role change invalidates stale claims immediately.
    let principal = Principal::load(&state.pool, auth.user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("unknown principal"))?;

    let action = guard.action_for(req.method());
    let (entity_id, req) = extract_entity_id(&guard, &params, req).await?;

    match state
        .authz
        .authorize(&principal, action, guard.resource_path, entity_id)
        .await?
    {
        Decision::Allowed => {}
        Decision::Denied => {
            return Err(AppError::forbidden("insufficient permissions"));
        }
    }

    let mut req = req;
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Locates the target entity id, trying the declared path parameter, then
/// the query string, then a same-named JSON body field. The body is buffered
/// and replayed so the handler still sees it.
async fn extract_entity_id(
    guard: &RouteGuard,
    params: &RawPathParams,
    req: Request,
) -> Result<(Option<Uuid>, Request), AppError> {
    let Some(param) = guard.entity_param else {
        return Ok((None, req));
    };

    if let Some(value) = params
        .iter()
        .find(|(name, _)| *name == param)
        .map(|(_, value)| value.to_string())
    {
        return Ok((Some(parse_entity_id(&value)?), req));
    }

    if let Some(value) = query_param(req.uri().query(), param) {
        return Ok((Some(parse_entity_id(&value)?), req));
    }

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, BODY_SNIFF_LIMIT)
        .await
        .map_err(|err| AppError::bad_request(format!("failed to read body: {err}")))?;
    let value = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .and_then(|body| body_param(&body, param));
    let req = Request::from_parts(parts, Body::from(bytes));

    match value {
        Some(value) => Ok((Some(parse_entity_id(&value)?), req)),
        None => Ok((None, req)),
    }
}

fn parse_entity_id(value: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value).map_err(|_| AppError::bad_request("invalid entity id"))
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn body_param(body: &Value, name: &str) -> Option<String> {
    body.get(name).and_then(|v| v.as_str()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_follows_http_method() {
        let guard = RouteGuard::resource("/api/users");
        assert_eq!(guard.action_for(&Method::GET), "view");
        assert_eq!(guard.action_for(&Method::POST), "create");
        assert_eq!(guard.action_for(&Method::PUT), "update");
        assert_eq!(guard.action_for(&Method::PATCH), "update");
        assert_eq!(guard.action_for(&Method::DELETE), "delete");
    }

    #[test]
    fn action_override_wins() {
        let guard = RouteGuard::resource("/api/users").with_action("manage");
        assert_eq!(guard.action_for(&Method::GET), "manage");
    }

    #[test]
    fn query_param_lookup() {
        assert_eq!(
            query_param(Some("a=1&entity_id=abc&b=2"), "entity_id"),
            Some("abc".to_string())
        );
        assert_eq!(query_param(Some("a=1"), "entity_id"), None);
        assert_eq!(query_param(None, "entity_id"), None);
    }

    #[test]
    fn body_param_reads_string_fields_only() {
        let body = json!({"entity_id": "abc", "count": 3});
        assert_eq!(body_param(&body, "entity_id"), Some("abc".to_string()));
        assert_eq!(body_param(&body, "count"), None);
        assert_eq!(body_param(&body, "missing"), None);
    }

    #[test]
    fn malformed_entity_id_is_rejected() {
        assert!(parse_entity_id("not-a-uuid").is_err());
        assert!(parse_entity_id("1f8f4f64-4c4b-4d7a-9c6a-2f86a3f6d001").is_ok());
    }
}
