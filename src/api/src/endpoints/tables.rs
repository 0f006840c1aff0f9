use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::ApiState;
use crate::error::ApiResult;
use crate::params::Params;

pub fn router() -> Router<ApiState> {
    Router::new().route("/table", get(list_tables).delete(delete_table))
}

/// List live tables
pub async fn list_tables(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let tables = state.store().list_tables().await?;
    Ok(Json(json!({ "tables": tables })))
}

/// Mark a table for deletion
pub async fn delete_table(
    State(state): State<ApiState>,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let params = Params::new(raw);
    let table = params.required("table")?;

    state.store().delete_table(table).await?;
    Ok(Json(json!({
        "success": format!("Table '{table}' marked for deletion"),
    })))
}
