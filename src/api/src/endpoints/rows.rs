use axum::extract::{Query, State};
use axum::http::HeaderValue;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use store::{RowQuery, RowSelector, Rows};

use crate::ApiState;
use crate::error::{ApiResult, ErrorResponse};
use crate::params::Params;

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/row", get(get_rows).post(set_row).delete(delete_rows))
        .route("/row/count", get(rows_count))
        .route("/row/list", get(list_row_keys))
}

/// Read rows; readable from browsers on any origin
pub async fn get_rows(
    State(state): State<ApiState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Response {
    let mut response = read_rows(&state, Params::new(raw)).await.into_response();
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

async fn read_rows(state: &ApiState, params: Params) -> ApiResult<Json<Value>> {
    let table = params.required("table")?;
    let query = RowQuery {
        key: params.optional("key").map(str::to_string),
        prefix: params.optional("prefix").map(str::to_string),
        columns: params.columns(),
        limit: params.limit()?,
    };

    let rows = state.store().get_rows(table, &query).await?;
    Ok(Json(rows_to_json(rows)))
}

/// Write the columns of the JSON body into one row
pub async fn set_row(
    State(state): State<ApiState>,
    Query(raw): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let params = Params::new(raw);
    let table = params.required("table")?;
    let key = params.required("key")?;
    let values = parse_payload(&body)?;

    state.store().set_row(table, key, values).await?;
    Ok(Json(json!({
        "success": format!("Set row key '{key}' in table '{table}'"),
    })))
}

pub async fn delete_rows(
    State(state): State<ApiState>,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let params = Params::new(raw);
    let table = params.required("table")?;
    let selector = RowSelector::new(params.optional("key"), params.optional("prefix"))?;

    state.store().delete_rows(table, selector).await?;
    let message = match selector {
        RowSelector::Prefix(prefix) => {
            format!("Rows with key prefix '{prefix}' were deleted from table '{table}'")
        }
        _ => format!(
            "Row with key '{}' was deleted from table '{table}'",
            params.optional("key").unwrap_or_default()
        ),
    };
    Ok(Json(json!({ "success": message })))
}

pub async fn rows_count(
    State(state): State<ApiState>,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let params = Params::new(raw);
    let table = params.required("table")?;

    let count = state
        .store()
        .rows_count(table, params.optional("prefix"))
        .await?;
    Ok(Json(json!({ "table": table, "rowsCount": count })))
}

pub async fn list_row_keys(
    State(state): State<ApiState>,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let params = Params::new(raw);
    let table = params.required("table")?;

    let keys = state
        .store()
        .list_row_keys(table, params.optional("prefix"))
        .await?;
    Ok(Json(json!({ "table": table, "rowKeys": keys })))
}

/// `{ column: value }` with string values only
fn parse_payload(body: &[u8]) -> ApiResult<BTreeMap<String, Bytes>> {
    let object: Map<String, Value> = serde_json::from_slice(body).map_err(|_| {
        ErrorResponse::validation(
            "Could not parse JSON payload, needs to follow { column string: value string }",
        )
    })?;

    object
        .into_iter()
        .map(|(column, value)| match value {
            Value::String(value) => Ok((column, Bytes::from(value))),
            _ => Err(ErrorResponse::validation(format!(
                "Value of column '{column}' has to be a string"
            ))),
        })
        .collect()
}

fn rows_to_json(rows: Rows) -> Value {
    let rows: Map<String, Value> = rows
        .into_iter()
        .map(|(key, row)| {
            let row: Map<String, Value> = row
                .into_iter()
                .map(|(column, value)| {
                    (
                        column,
                        Value::String(String::from_utf8_lossy(&value).into_owned()),
                    )
                })
                .collect();
            (key, Value::Object(row))
        })
        .collect();
    Value::Object(rows)
}
