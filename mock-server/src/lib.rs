use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::compression::CompressionLayer;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub age: u32,
}

/// A stored JSON document and the id it was filed under.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub data: Value,
}

/// Envelope returned by the canned `values` endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseModel<T> {
    pub code: i32,
    pub message: String,
    pub data: T,
}

#[derive(Deserialize)]
pub struct SlowParams {
    #[serde(default)]
    pub ms: u64,
}

pub type Db = Arc<RwLock<HashMap<Uuid, Value>>>;

pub const COMPRESSED_LINE: &str = "the quick brown fox jumps over the lazy dog\n";

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/api/values/get", get(get_value))
        .route("/api/values/echo", post(echo).put(echo))
        .route("/api/values/query", get(query_echo).delete(query_echo))
        .route("/api/values/slow", get(slow).post(slow))
        .route("/api/values/status/{code}", get(status))
        .route(
            "/api/values/compressed",
            get(compressed).layer(CompressionLayer::new()),
        )
        .route("/api/values/items", post(create_item))
        .route(
            "/api/values/items/{id}",
            get(get_item).put(replace_item).delete(delete_item),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn get_value() -> Json<ResponseModel<User>> {
    Json(ResponseModel {
        code: 0,
        message: "ResponseModel-Get".to_string(),
        data: User {
            id: Uuid::nil(),
            name: "values".to_string(),
            age: 1,
        },
    })
}

/// Returns the request body unchanged, labelled with the request's content type.
async fn echo(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    debug!(%content_type, bytes = body.len(), "echo");
    ([(header::CONTENT_TYPE, content_type)], body)
}

async fn query_echo(Query(params): Query<BTreeMap<String, String>>) -> Json<BTreeMap<String, String>> {
    Json(params)
}

async fn slow(Query(params): Query<SlowParams>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    "done"
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Repeated text, long enough for `CompressionLayer` to compress it.
async fn compressed() -> String {
    COMPRESSED_LINE.repeat(32)
}

async fn create_item(State(db): State<Db>, Json(data): Json<Value>) -> (StatusCode, Json<Item>) {
    let item = Item {
        id: Uuid::new_v4(),
        data,
    };
    db.write().await.insert(item.id, item.data.clone());
    (StatusCode::CREATED, Json(item))
}

async fn get_item(State(db): State<Db>, Path(id): Path<Uuid>) -> Result<Json<Item>, StatusCode> {
    let data = db.read().await.get(&id).cloned().ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(Item { id, data }))
}

/// Replaces the stored document wholesale.
async fn replace_item(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
    Json(data): Json<Value>,
) -> Result<Json<Item>, StatusCode> {
    let mut items = db.write().await;
    let slot = items.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    *slot = data.clone();
    Ok(Json(Item { id, data }))
}

async fn delete_item(State(db): State<Db>, Path(id): Path<Uuid>) -> StatusCode {
    match db.write().await.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_serializes_to_json() {
        let user = User {
            id: Uuid::nil(),
            name: "Ada".to_string(),
            age: 36,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["name"], "Ada");
        assert_eq!(json["age"], 36);
    }

    #[test]
    fn item_keeps_arbitrary_json() {
        let item = Item {
            id: Uuid::nil(),
            data: serde_json::json!({"name": "Ada", "tags": [1, 2]}),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["data"]["tags"][1], 2);
        let back: Item = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn response_model_wraps_data() {
        let model = ResponseModel {
            code: 0,
            message: "ok".to_string(),
            data: vec![1, 2],
        };
        let json = serde_json::to_string(&model).unwrap();
        assert_eq!(json, r#"{"code":0,"message":"ok","data":[1,2]}"#);
    }
}
