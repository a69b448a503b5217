//! Request parameter types shared by the CRUD endpoints.

use serde::Deserialize;

use crate::{
    error::AppError,
    filters::{self, FilterSpec, SortSpec},
};

fn default_limit() -> u64 { 100 }

/// Query string of a list request. `filter` and `sort` are JSON documents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
    pub filter: Option<String>,
    pub sort: Option<String>,
}

impl Default for ListParams {
    fn default() -> Self { Self { limit: default_limit(), offset: 0, filter: None, sort: None } }
}

impl ListParams {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.limit == 0 {
            return Err(AppError::Validation("limit must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn filter_spec(&self) -> Result<Option<FilterSpec>, AppError> {
        match self.filter.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => filters::parse_filter(text).map(Some),
            _ => Ok(None),
        }
    }

    pub fn sort_specs(&self) -> Result<Vec<SortSpec>, AppError> {
        match self.sort.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => filters::parse_sort(text),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_limit_check() {
        let params: ListParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, ListParams::default());
        assert_eq!(params.limit, 100);
        assert!(params.filter_spec().unwrap().is_none());
        assert!(params.sort_specs().unwrap().is_empty());

        let zero = ListParams { limit: 0, ..ListParams::default() };
        assert!(matches!(zero.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn filter_and_sort_are_parsed() {
        let params = ListParams {
            filter: Some(r#"{"field": "name", "op": "eq", "value": "x"}"#.into()),
            sort: Some(r#"[{"field": "name", "direction": "desc"}]"#.into()),
            ..ListParams::default()
        };
        assert!(params.filter_spec().unwrap().is_some());
        assert_eq!(params.sort_specs().unwrap().len(), 1);

        let bad = ListParams { filter: Some("{not json".into()), ..ListParams::default() };
        assert!(bad.filter_spec().is_err());
    }
}
