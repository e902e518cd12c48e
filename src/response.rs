// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Uniform success envelopes.
//!
//! Every successful response is `{success, message, data, timestamp}`; list
//! endpoints add `pagination: {page, limit, total, pages}`.

use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Default page size for list endpoints.
const DEFAULT_LIMIT: usize = 20;

/// Upper bound on page size.
const MAX_LIMIT: usize = 100;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        })
    }

    pub fn created(message: impl Into<String>, data: T) -> (StatusCode, Json<Self>) {
        (StatusCode::CREATED, Self::ok(message, data))
    }
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Vec<T>,
    pub pagination: Pagination,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> PaginatedResponse<T> {
    /// Slice `items` according to `query` and wrap the page.
    pub fn from_items(message: impl Into<String>, items: Vec<T>, query: &PageQuery) -> Json<Self> {
        let (data, pagination) = query.paginate(items);
        Json(Self {
            success: true,
            message: message.into(),
            data,
            pagination,
            timestamp: Utc::now(),
        })
    }
}

/// `?page=&limit=` query parameters.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page number (default 1).
    pub page: Option<usize>,
    /// Items per page (default 20, max 100).
    pub limit: Option<usize>,
}

impl PageQuery {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn paginate<T>(&self, items: Vec<T>) -> (Vec<T>, Pagination) {
        let page = self.page();
        let limit = self.limit();
        let total = items.len();
        let pages = total.div_ceil(limit);
        let data = items
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();
        (
            data,
            Pagination {
                page,
                limit,
                total,
                pages,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_slices_and_counts() {
        let query = PageQuery {
            page: Some(2),
            limit: Some(3),
        };
        let (data, pagination) = query.paginate((1..=8).collect::<Vec<_>>());
        assert_eq!(data, vec![4, 5, 6]);
        assert_eq!(
            pagination,
            Pagination {
                page: 2,
                limit: 3,
                total: 8,
                pages: 3
            }
        );
    }

    #[test]
    fn paginate_clamps_inputs() {
        let query = PageQuery {
            page: Some(0),
            limit: Some(10_000),
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), 100);

        let (data, pagination) = PageQuery::default().paginate(Vec::<u8>::new());
        assert!(data.is_empty());
        assert_eq!(pagination.pages, 0);
    }

    #[test]
    fn ok_envelope_serializes() {
        let Json(body) = ApiResponse::ok("done", serde_json::json!({"id": 1}));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "done");
        assert_eq!(json["data"]["id"], 1);
    }
}
