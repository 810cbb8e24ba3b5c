// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Offset pagination over a [`FilterQuery`].
//!
//! `total` is counted with the same predicates as the page itself, before
//! ordering and paging. The count and the page select are two statements;
//! pass a transaction (`&mut *tx`) when the pair must observe one snapshot.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::FromRow;

use crate::error::{DbError, Result};
use crate::order::{order_by_clause, FieldWhitelist, OrderSpec, SortKey};
use crate::query::{arguments, FilterQuery, SqlValue};

/// Page size used when a request leaves `limit` unset.
pub const DEFAULT_LIMIT: u32 = 20;

/// Upper bound for a single page, and the limit used to read a complete
/// dependent set in one call.
pub const TOTAL_LIMIT: u32 = 100_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
	#[serde(default)]
	pub offset: Option<u32>,
	#[serde(default)]
	pub limit: Option<u32>,
	#[serde(default)]
	pub order_by: Vec<OrderSpec>,
}

impl PageRequest {
	pub fn new() -> Self {
		Self::default()
	}

	/// Request every row, up to [`TOTAL_LIMIT`].
	pub fn all() -> Self {
		Self::default().limit(TOTAL_LIMIT)
	}

	pub fn offset(mut self, offset: u32) -> Self {
		self.offset = Some(offset);
		self
	}

	pub fn limit(mut self, limit: u32) -> Self {
		self.limit = Some(limit);
		self
	}

	/// Replace the ordering with a single key.
	pub fn order_by(mut self, spec: OrderSpec) -> Self {
		self.order_by = vec![spec];
		self
	}

	/// Append a lower-precedence key.
	pub fn then_by(mut self, spec: OrderSpec) -> Self {
		self.order_by.push(spec);
		self
	}

	pub fn effective_offset(&self) -> u32 {
		self.offset.unwrap_or(0)
	}

	/// # Errors
	/// An explicit limit of zero, or one above [`TOTAL_LIMIT`], is rejected.
	pub fn effective_limit(&self) -> Result<u32> {
		match self.limit {
			None => Ok(DEFAULT_LIMIT),
			Some(0) => Err(DbError::InvalidPageRequest(
				"limit must be greater than zero".to_string(),
			)),
			Some(limit) if limit > TOTAL_LIMIT => Err(DbError::InvalidPageRequest(format!(
				"limit {limit} exceeds maximum {TOTAL_LIMIT}"
			))),
			Some(limit) => Ok(limit),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult<T> {
	pub items: Vec<T>,
	pub total: u64,
}

impl<T> PageResult<T> {
	pub fn empty(total: u64) -> Self {
		Self {
			items: Vec::new(),
			total,
		}
	}

	pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> PageResult<U> {
		PageResult {
			items: self.items.into_iter().map(f).collect(),
			total: self.total,
		}
	}
}

/// Validated statements for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
	pub order: Vec<SortKey>,
	pub limit: u32,
	pub offset: u32,
	pub count_sql: String,
	pub select_sql: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator<'a> {
	whitelist: &'a FieldWhitelist,
}

impl<'a> Paginator<'a> {
	pub fn new(whitelist: &'a FieldWhitelist) -> Self {
		Self { whitelist }
	}

	/// Validate `page` and render the count and select statements. Nothing is
	/// executed.
	pub fn plan(&self, query: &FilterQuery, page: &PageRequest) -> Result<PagePlan> {
		let order = self.whitelist.resolve(&page.order_by)?;
		let limit = page.effective_limit()?;
		let order_clause = order_by_clause(&order, query.alias());

		Ok(PagePlan {
			count_sql: query.count_sql(),
			select_sql: query.page_sql(&order_clause),
			order,
			limit,
			offset: page.effective_offset(),
		})
	}

	#[tracing::instrument(
		skip(self, conn, query, page),
		fields(table = %query.table(), offset = ?page.offset, limit = ?page.limit)
	)]
	pub async fn paginate<T>(
		&self,
		conn: &mut SqliteConnection,
		query: &FilterQuery,
		page: &PageRequest,
	) -> Result<PageResult<T>>
	where
		T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
	{
		let plan = self.plan(query, page)?;
		tracing::trace!(order = ?plan.order, "resolved page order");

		let (count,): (i64,) = sqlx::query_as_with::<_, (i64,), _>(&plan.count_sql, arguments(query.binds())?)
			.fetch_one(&mut *conn)
			.await?;
		let total = u64::try_from(count)
			.map_err(|_| DbError::Internal(format!("negative row count {count}")))?;

		if u64::from(plan.offset) >= total {
			tracing::debug!(total, offset = plan.offset, "offset past end, skipping page fetch");
			return Ok(PageResult::empty(total));
		}

		let mut binds = query.binds().to_vec();
		binds.push(SqlValue::from(plan.limit));
		binds.push(SqlValue::from(plan.offset));

		let items = sqlx::query_as_with::<_, T, _>(&plan.select_sql, arguments(&binds)?)
			.fetch_all(&mut *conn)
			.await?;

		tracing::debug!(total, returned = items.len(), "page fetched");
		Ok(PageResult { items, total })
	}
}
