//! Pagination envelope and page-window normalization

use crate::error::{ApiError, ApiResult};
use grappelli_db::repository::PageRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Derived pagination metadata; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
	pub page: u64,
	pub page_size: u64,
	pub total_items: u64,
	pub total_pages: u64,
	pub has_next_page: bool,
	pub has_previous_page: bool,
}

impl PaginationMeta {
	/// Compute the metadata for one page.
	///
	/// `total_pages` is `ceil(total_items / page_size)` and `0` for an
	/// empty result set.
	///
	/// # Examples
	///
	/// ```
	/// use grappelli_rest::pagination::PaginationMeta;
	///
	/// let meta = PaginationMeta::new(2, 2, 5);
	/// assert_eq!(meta.total_pages, 3);
	/// assert!(meta.has_next_page);
	/// assert!(meta.has_previous_page);
	///
	/// let empty = PaginationMeta::new(1, 20, 0);
	/// assert_eq!(empty.total_pages, 0);
	/// assert!(!empty.has_next_page);
	/// assert!(!empty.has_previous_page);
	/// ```
	pub fn new(page: u64, page_size: u64, total_items: u64) -> Self {
		let total_pages = if page_size == 0 {
			0
		} else {
			total_items.div_ceil(page_size)
		};
		Self {
			page,
			page_size,
			total_items,
			total_pages,
			has_next_page: page < total_pages,
			has_previous_page: page > 1,
		}
	}
}

/// The `{items, pagination}` envelope wrapping every list result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
	pub items: Vec<T>,
	pub pagination: PaginationMeta,
}

/// Raw, not yet validated page window from the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
	pub page: Option<String>,
	pub page_size: Option<String>,
}

impl PageQuery {
	/// Extract `page` / `pageSize` from parsed query parameters.
	pub fn from_query(query: &HashMap<String, String>) -> Self {
		Self {
			page: query.get("page").cloned(),
			page_size: query.get("pageSize").cloned(),
		}
	}
}

/// Service-level pagination limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationConfig {
	pub default_page_size: u64,
	pub max_page_size: u64,
}

impl Default for PaginationConfig {
	fn default() -> Self {
		Self {
			default_page_size: 20,
			max_page_size: 100,
		}
	}
}

impl PaginationConfig {
	/// Normalize a raw page query into a validated window.
	///
	/// Absent values fall back to page 1 and the default page size; both
	/// values must parse as positive integers and the page size must not
	/// exceed the configured maximum.
	pub fn normalize(&self, query: &PageQuery) -> ApiResult<PageRequest> {
		let page = match &query.page {
			None => 1,
			Some(raw) => parse_positive(raw, "page")?,
		};
		let page_size = match &query.page_size {
			None => self.default_page_size,
			Some(raw) => {
				let size = parse_positive(raw, "pageSize")?;
				if size > self.max_page_size {
					return Err(ApiError::validation_with_details(
						format!("pageSize must not exceed {}", self.max_page_size),
						serde_json::json!({ "pageSize": raw }),
					));
				}
				size
			}
		};
		Ok(PageRequest { page, page_size })
	}
}

fn parse_positive(raw: &str, field: &str) -> ApiResult<u64> {
	match raw.trim().parse::<u64>() {
		Ok(value) if value >= 1 => Ok(value),
		_ => Err(ApiError::validation_with_details(
			format!("{field} must be a positive integer"),
			serde_json::json!({ field: raw }),
		)),
	}
}
