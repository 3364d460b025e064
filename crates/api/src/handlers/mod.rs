pub(crate) mod catalog;
pub(crate) mod events;
pub(crate) mod executions;
pub(crate) mod live;
pub(crate) mod schedules;
pub(crate) mod webhooks;
pub(crate) mod workflows;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::ApiError;

const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 100;

/// 1-based page number and page size, clamped.
pub(crate) fn paging(page: Option<i64>, per_page: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    (page, per_page)
}

/// Decode an optional JSON body; an empty body yields `T::default()`.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| ApiError::BadRequest(format!("invalid JSON body: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn paging_clamps() {
        assert_eq!(paging(None, None), (1, 20));
        assert_eq!(paging(Some(0), Some(1000)), (1, 100));
        assert_eq!(paging(Some(3), Some(5)), (3, 5));
    }

    #[test]
    fn empty_body_is_default() {
        let value: Value = optional_json(&Bytes::from_static(b"  ")).unwrap();
        assert!(value.is_null());
        assert!(optional_json::<Value>(&Bytes::from_static(b"{oops")).is_err());
    }
}
