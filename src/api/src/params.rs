//! Querystring parameters. Values are whitespace-trimmed and empty values
//! count as absent; name validation is left to the store.

use std::collections::HashMap;

use crate::error::{ApiResult, ErrorResponse};

#[derive(Debug, Clone, Default)]
pub struct Params(HashMap<String, String>);

impl Params {
    pub fn new(raw: HashMap<String, String>) -> Self {
        Self(
            raw.into_iter()
                .map(|(name, value)| (name, value.trim().to_string()))
                .filter(|(_, value)| !value.is_empty())
                .collect(),
        )
    }

    pub fn optional(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn required(&self, name: &str) -> ApiResult<&str> {
        self.optional(name).ok_or_else(|| {
            ErrorResponse::validation(format!(
                "Please provide '{name}' as a querystring parameter"
            ))
        })
    }

    /// Comma separated `columns`, trimmed, empty entries dropped
    pub fn columns(&self) -> Option<Vec<String>> {
        let columns: Vec<String> = self
            .optional("columns")?
            .split(',')
            .map(str::trim)
            .filter(|column| !column.is_empty())
            .map(str::to_string)
            .collect();
        (!columns.is_empty()).then_some(columns)
    }

    pub fn limit(&self) -> ApiResult<Option<usize>> {
        self.optional("limit")
            .map(|limit| {
                limit.parse().map_err(|_| {
                    ErrorResponse::validation("'limit' parameter has to be a non-negative integer")
                })
            })
            .transpose()
    }
}
