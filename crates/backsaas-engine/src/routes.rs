use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::hooks::Trigger;
use crate::state::EngineState;
use crate::store::QueryOptions;

/// Build the engine router: health, the schema document, and the five
/// CRUD verbs per entity.
pub fn engine_routes() -> Router<EngineState> {
    Router::new()
        .route("/health", get(health))
        .route("/schema", get(schema))
        .route("/api/{entity}", get(list_rows).post(create_row))
        .route(
            "/api/{entity}/{id}",
            get(get_row).put(update_row).delete(delete_row),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health -- service identity plus store reachability.
async fn health(State(state): State<EngineState>) -> impl IntoResponse {
    let reachable = state.store.ping().await;
    let status = if reachable { "healthy" } else { "degraded" };
    let code = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let schema = state.store.schema();
    (
        code,
        Json(serde_json::json!({
            "status": status,
            "tenant_id": state.tenant_id(),
            "service": schema.service.name,
            "version": schema.version,
        })),
    )
}

/// GET /schema -- the active schema document.
async fn schema(State(state): State<EngineState>) -> Json<Value> {
    Json(serde_json::to_value(state.store.schema()).unwrap_or(Value::Null))
}

/// GET /api/{entity} -- list rows.
///
/// `limit`, `offset`, and `order_by` are pagination parameters; every
/// other query parameter is an equality filter on the named property.
async fn list_rows(
    State(state): State<EngineState>,
    Path(entity): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, EngineError> {
    let mut options = QueryOptions::default();
    for (name, value) in params {
        match name.as_str() {
            "limit" => options.limit = Some(parse_param("limit", &value)?),
            "offset" => options.offset = Some(parse_param("offset", &value)?),
            "order_by" => options.order_by = Some(value),
            _ => options.filters.push((name, value)),
        }
    }

    state
        .hooks
        .run_before(&entity, Trigger::BeforeRead, state.tenant_id(), None)
        .await?;

    let rows = state.store.query(&entity, &options).await?;
    let count = rows.len();

    state
        .hooks
        .spawn_after(&entity, Trigger::AfterRead, state.tenant_id(), None);

    Ok(Json(serde_json::json!({
        "data": rows,
        "meta": { "count": count },
    })))
}

/// POST /api/{entity} -- create a row; returns the stored form with 201.
async fn create_row(
    State(state): State<EngineState>,
    Path(entity): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, EngineError> {
    let data = object_body(body)?;
    let tenant = state.tenant_id();

    state
        .hooks
        .run_before(&entity, Trigger::Validate, tenant, Some(&data))
        .await
        .map_err(EngineError::from_validation_hook)?;
    state
        .hooks
        .run_before(&entity, Trigger::BeforeCreate, tenant, Some(&data))
        .await?;

    let stored = state.store.insert(&entity, data).await?;

    state
        .hooks
        .spawn_after(&entity, Trigger::AfterCreate, tenant, Some(&stored));

    Ok((StatusCode::CREATED, Json(Value::Object(stored))))
}

/// GET /api/{entity}/{id} -- fetch one row.
async fn get_row(
    State(state): State<EngineState>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, EngineError> {
    state
        .hooks
        .run_before(&entity, Trigger::BeforeRead, state.tenant_id(), None)
        .await?;

    let row = state.store.get(&entity, &id).await?;

    state
        .hooks
        .spawn_after(&entity, Trigger::AfterRead, state.tenant_id(), Some(&row));

    Ok(Json(Value::Object(row)))
}

/// PUT /api/{entity}/{id} -- apply a partial update.
async fn update_row(
    State(state): State<EngineState>,
    Path((entity, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, EngineError> {
    let data = object_body(body)?;
    let tenant = state.tenant_id();

    state
        .hooks
        .run_before(&entity, Trigger::Validate, tenant, Some(&data))
        .await
        .map_err(EngineError::from_validation_hook)?;
    state
        .hooks
        .run_before(&entity, Trigger::BeforeUpdate, tenant, Some(&data))
        .await?;

    let stored = state.store.update(&entity, &id, data).await?;

    state
        .hooks
        .spawn_after(&entity, Trigger::AfterUpdate, tenant, Some(&stored));

    Ok(Json(Value::Object(stored)))
}

/// DELETE /api/{entity}/{id} -- remove a row.
async fn delete_row(
    State(state): State<EngineState>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, EngineError> {
    let tenant = state.tenant_id();

    state
        .hooks
        .run_before(&entity, Trigger::BeforeDelete, tenant, None)
        .await?;

    state.store.delete(&entity, &id).await?;

    state
        .hooks
        .spawn_after(&entity, Trigger::AfterDelete, tenant, None);

    Ok(Json(serde_json::json!({ "deleted": true })))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn object_body(body: Value) -> Result<Map<String, Value>, EngineError> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::Validation {
            message: format!("request body must be a JSON object, got {other}"),
        }),
    }
}

fn parse_param(name: &str, raw: &str) -> Result<i64, EngineError> {
    raw.parse().map_err(|_| EngineError::Validation {
        message: format!("'{name}' must be an integer, got '{raw}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookRegistry;
    use crate::store::TenantStore;
    use axum::body::Body;
    use axum::http::Request;
    use backsaas_core::Schema;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SCHEMA_YAML: &str = r#"
version: 1
service:
  name: crm
entities:
  contacts:
    key: contact_id
    schema:
      type: object
      required: [contact_id, email]
      properties:
        contact_id:
          type: string
        email:
          type: string
          format: email
"#;

    /// Router over a lazy pool: no database is reachable, so only paths
    /// that fail before touching the store are exercised here.
    fn test_router() -> Router {
        let schema = Arc::new(Schema::from_yaml_str(SCHEMA_YAML).unwrap());
        let store = TenantStore::connect_lazy(
            "postgres://localhost:1/void",
            "acme",
            Arc::clone(&schema),
        )
        .unwrap();
        let hooks = HookRegistry::from_schema(&schema).unwrap();
        let state = EngineState::new(Arc::new(store), Arc::new(hooks));
        engine_routes().with_state(state)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn schema_endpoint_returns_document() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/schema")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["version"], 1);
        assert_eq!(json["service"]["name"], "crm");
        assert!(json["entities"]["contacts"].is_object());
    }

    #[tokio::test]
    async fn unknown_entity_is_404() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/api/deals")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["code"], "not_found");
    }

    #[tokio::test]
    async fn bad_limit_is_400() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/api/contacts?limit=lots")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["code"], "validation_failed");
    }

    #[tokio::test]
    async fn non_object_body_is_400() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/contacts")
                    .header("content-type", "application/json")
                    .body(Body::from("[1, 2, 3]"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_body_fails_validation_before_store() {
        // Missing required 'email'; rejected without any database.
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/contacts")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"contact_id": "c-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["message"].as_str().unwrap().contains("email"));
    }

    #[tokio::test]
    async fn unknown_filter_property_is_400() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/api/contacts?nickname=jo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["message"]
            .as_str()
            .unwrap()
            .contains("unknown filter property"));
    }
}
