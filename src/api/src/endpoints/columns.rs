use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::ApiState;
use crate::error::ApiResult;
use crate::params::Params;

pub fn router() -> Router<ApiState> {
    Router::new().route("/column", get(list_columns).delete(delete_column))
}

pub async fn list_columns(
    State(state): State<ApiState>,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let params = Params::new(raw);
    let table = params.required("table")?;

    let columns = state.store().list_columns(table).await?;
    Ok(Json(json!({ "table": table, "columns": columns })))
}

pub async fn delete_column(
    State(state): State<ApiState>,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let params = Params::new(raw);
    let table = params.required("table")?;
    let column = params.required("column")?;

    state.store().delete_column(table, column).await?;
    Ok(Json(json!({
        "success": format!("Column '{column}' marked for deletion in table '{table}'"),
    })))
}
