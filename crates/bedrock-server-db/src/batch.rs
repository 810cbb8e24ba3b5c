// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bulk writes that return rows in submission order.
//!
//! A bulk insert or update is followed by a re-select of the written ids.
//! The re-select comes back in whatever order the store chooses, so results
//! are placed back into submission order by id. The write and the re-select
//! should share a transaction; pass `&mut *tx` as the connection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

use bedrock_server_config::QueryConfig;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::FromRow;

use crate::error::{DbError, Result};
use crate::page::TOTAL_LIMIT;
use crate::query::{arguments, is_identifier, placeholders, timestamp, FilterQuery, SqlValue};

/// Bound parameters allowed in one SQLite statement.
const MAX_VARIABLES: usize = 32_766;

/// Reorder `rows` to follow `keys`.
///
/// Each occurrence of a key consumes one row with that key, so repeated keys
/// are placed independently. Fails with `IntegrityViolation` when the counts
/// differ or a row carries a key that was not submitted.
pub fn reconcile_order<K, T, F>(context: &str, keys: &[K], rows: Vec<T>, key_of: F) -> Result<Vec<T>>
where
	K: Eq + Hash + Clone + Debug,
	F: Fn(&T) -> K,
{
	if rows.len() != keys.len() {
		return Err(DbError::IntegrityViolation {
			context: context.to_string(),
			expected: keys.len(),
			actual: rows.len(),
		});
	}

	let mut positions: HashMap<K, VecDeque<usize>> = HashMap::with_capacity(keys.len());
	for (index, key) in keys.iter().enumerate() {
		positions.entry(key.clone()).or_default().push_back(index);
	}

	let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(keys.len()).collect();
	for row in rows {
		let key = key_of(&row);
		let Some(index) = positions.get_mut(&key).and_then(VecDeque::pop_front) else {
			return Err(DbError::IntegrityViolation {
				context: format!("{context}: unexpected row {key:?}"),
				expected: keys.len(),
				actual: keys.len() - positions.values().map(VecDeque::len).sum::<usize>(),
			});
		};
		slots[index] = Some(row);
	}

	slots
		.into_iter()
		.collect::<Option<Vec<T>>>()
		.ok_or_else(|| DbError::Internal(format!("{context}: unfilled reconciliation slot")))
}

/// Multi-row `INSERT`.
#[derive(Debug, Clone)]
pub struct BatchInsert {
	table: String,
	columns: Vec<String>,
	rows: Vec<Vec<SqlValue>>,
}

impl BatchInsert {
	pub fn new(table: &str, columns: &[&str]) -> Result<Self> {
		if !is_identifier(table) || columns.is_empty() || !columns.iter().all(|c| is_identifier(c)) {
			return Err(DbError::InvalidBatch(format!(
				"invalid insert target {table}({})",
				columns.join(", ")
			)));
		}
		Ok(Self {
			table: table.to_string(),
			columns: columns.iter().map(|c| c.to_string()).collect(),
			rows: Vec::new(),
		})
	}

	pub fn push(&mut self, values: Vec<SqlValue>) -> Result<()> {
		if values.len() != self.columns.len() {
			return Err(DbError::InvalidBatch(format!(
				"row {} for {} has {} values, expected {}",
				self.rows.len(),
				self.table,
				values.len(),
				self.columns.len()
			)));
		}
		self.rows.push(values);
		Ok(())
	}

	pub fn table(&self) -> &str {
		&self.table
	}

	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}

	/// The text values of `id_column`, in submission order.
	pub fn keys(&self, id_column: &str) -> Result<Vec<String>> {
		let position = self
			.columns
			.iter()
			.position(|c| c == id_column)
			.ok_or_else(|| DbError::InvalidBatch(format!("{} has no column {id_column}", self.table)))?;

		self
			.rows
			.iter()
			.map(|row| {
				row[position]
					.as_text()
					.map(str::to_string)
					.ok_or_else(|| DbError::InvalidBatch(format!("{id_column} must be a text id")))
			})
			.collect()
	}

	fn rows_per_statement(&self) -> usize {
		(MAX_VARIABLES / self.columns.len()).max(1)
	}

	/// Statements and binds, split to stay under the variable limit.
	pub fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
		let row_placeholders = format!("({})", placeholders(self.columns.len()));
		self
			.rows
			.chunks(self.rows_per_statement())
			.map(|chunk| {
				let sql = format!(
					"INSERT INTO {} ({}) VALUES {}",
					self.table,
					self.columns.join(", "),
					vec![row_placeholders.as_str(); chunk.len()].join(", ")
				);
				(sql, chunk.iter().flatten().cloned().collect())
			})
			.collect()
	}

	#[tracing::instrument(skip(self, conn), fields(table = %self.table, batch_size = self.rows.len()))]
	pub async fn execute(&self, conn: &mut SqliteConnection) -> Result<u64> {
		let mut affected = 0;
		for (sql, binds) in self.statements() {
			affected += sqlx::query_with(&sql, arguments(&binds)?)
				.execute(&mut *conn)
				.await?
				.rows_affected();
		}
		Ok(affected)
	}
}

#[derive(Debug, Clone)]
struct UpdateRow {
	id: String,
	sets: Vec<(String, SqlValue)>,
}

/// Bulk `UPDATE` of rows by id.
///
/// Each row only writes the columns it sets. Columns a row leaves unset keep
/// their stored value through `ELSE <column>`.
#[derive(Debug, Clone)]
pub struct BatchUpdate {
	table: String,
	id_column: String,
	updated_column: Option<String>,
	rows: Vec<UpdateRow>,
	seen: HashSet<String>,
}

impl BatchUpdate {
	pub fn new(table: &str, id_column: &str) -> Result<Self> {
		if !is_identifier(table) || !is_identifier(id_column) {
			return Err(DbError::InvalidBatch(format!(
				"invalid update target {table}.{id_column}"
			)));
		}
		Ok(Self {
			table: table.to_string(),
			id_column: id_column.to_string(),
			updated_column: None,
			rows: Vec::new(),
			seen: HashSet::new(),
		})
	}

	/// Also set `column` to the current time on every updated row.
	pub fn touch(mut self, column: &str) -> Result<Self> {
		if !is_identifier(column) {
			return Err(DbError::InvalidBatch(format!("invalid column {column}")));
		}
		self.updated_column = Some(column.to_string());
		Ok(self)
	}

	pub fn push(&mut self, id: impl Into<String>, sets: Vec<(&str, SqlValue)>) -> Result<()> {
		let id = id.into();
		if self.seen.contains(&id) {
			return Err(DbError::InvalidBatch(format!(
				"{} updates id {id} more than once",
				self.table
			)));
		}
		if sets.is_empty() && self.updated_column.is_none() {
			return Err(DbError::InvalidBatch(format!("update of {id} sets no columns")));
		}
		if let Some((bad, _)) = sets.iter().find(|(c, _)| !is_identifier(c) || *c == self.id_column) {
			return Err(DbError::InvalidBatch(format!("cannot update column {bad}")));
		}

		self.seen.insert(id.clone());
		self.rows.push(UpdateRow {
			id,
			sets: sets.into_iter().map(|(c, v)| (c.to_string(), v)).collect(),
		});
		Ok(())
	}

	pub fn table(&self) -> &str {
		&self.table
	}

	pub fn id_column(&self) -> &str {
		&self.id_column
	}

	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}

	pub fn ids(&self) -> Vec<String> {
		self.rows.iter().map(|r| r.id.clone()).collect()
	}

	fn columns(rows: &[UpdateRow]) -> Vec<&str> {
		let mut columns: Vec<&str> = Vec::new();
		for row in rows {
			for (column, _) in &row.sets {
				if !columns.contains(&column.as_str()) {
					columns.push(column.as_str());
				}
			}
		}
		columns
	}

	fn rows_per_statement(&self) -> usize {
		let width = Self::columns(&self.rows).len() * 2 + 1;
		((MAX_VARIABLES - 1) / width).max(1)
	}

	fn statement(&self, rows: &[UpdateRow], now: &str) -> (String, Vec<SqlValue>) {
		let mut assignments = Vec::new();
		let mut binds = Vec::new();

		for column in Self::columns(rows) {
			let mut case = format!("{column} = CASE {}", self.id_column);
			for row in rows {
				if let Some((_, value)) = row.sets.iter().find(|(c, _)| c == column) {
					case.push_str(" WHEN ? THEN ?");
					binds.push(SqlValue::Text(row.id.clone()));
					binds.push(value.clone());
				}
			}
			case.push_str(&format!(" ELSE {column} END"));
			assignments.push(case);
		}

		if let Some(updated) = &self.updated_column {
			assignments.push(format!("{updated} = ?"));
			binds.push(SqlValue::Text(now.to_string()));
		}

		binds.extend(rows.iter().map(|r| SqlValue::Text(r.id.clone())));
		let sql = format!(
			"UPDATE {} SET {} WHERE {} IN ({})",
			self.table,
			assignments.join(", "),
			self.id_column,
			placeholders(rows.len())
		);
		(sql, binds)
	}

	pub fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
		let now = timestamp(Utc::now());
		self
			.rows
			.chunks(self.rows_per_statement())
			.map(|chunk| self.statement(chunk, &now))
			.collect()
	}

	#[tracing::instrument(skip(self, conn), fields(table = %self.table, batch_size = self.rows.len()))]
	pub async fn execute(&self, conn: &mut SqliteConnection) -> Result<u64> {
		let mut affected = 0;
		for (sql, binds) in self.statements() {
			affected += sqlx::query_with(&sql, arguments(&binds)?)
				.execute(&mut *conn)
				.await?
				.rows_affected();
		}
		Ok(affected)
	}
}

/// Runs bulk writes under a batch size ceiling and returns the written rows
/// in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReconciler {
	max_items: usize,
}

impl BatchReconciler {
	pub fn new(max_items: usize) -> Result<Self> {
		if max_items == 0 || max_items > TOTAL_LIMIT as usize {
			return Err(DbError::InvalidConfiguration(format!(
				"max batch items must be between 1 and {TOTAL_LIMIT}, got {max_items}"
			)));
		}
		Ok(Self { max_items })
	}

	pub fn from_config(config: &QueryConfig) -> Result<Self> {
		Self::new(config.max_batch_items)
	}

	pub fn max_items(&self) -> usize {
		self.max_items
	}

	pub fn check_size(&self, size: usize) -> Result<()> {
		if size > self.max_items {
			return Err(DbError::BatchTooLarge {
				size,
				max: self.max_items,
			});
		}
		Ok(())
	}

	/// Insert `batch` and return the rows selected by `select` in the order
	/// they were pushed. `id_column` must hold a unique text id per row.
	#[tracing::instrument(
		skip(self, conn, batch, select, key_of),
		fields(table = %batch.table(), batch_size = batch.len())
	)]
	pub async fn create_multiple<T, F>(
		&self,
		conn: &mut SqliteConnection,
		batch: &BatchInsert,
		id_column: &str,
		select: FilterQuery,
		key_of: F,
	) -> Result<Vec<T>>
	where
		T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
		F: Fn(&T) -> String,
	{
		self.check_size(batch.len())?;
		if batch.is_empty() {
			return Ok(Vec::new());
		}

		let keys = batch.keys(id_column)?;
		batch.execute(conn).await?;
		self.reselect(conn, batch.table(), &keys, id_column, select, key_of).await
	}

	/// Apply `batch` and return the updated rows in the order they were pushed.
	#[tracing::instrument(
		skip(self, conn, batch, select, key_of),
		fields(table = %batch.table(), batch_size = batch.len())
	)]
	pub async fn update_multiple<T, F>(
		&self,
		conn: &mut SqliteConnection,
		batch: &BatchUpdate,
		select: FilterQuery,
		key_of: F,
	) -> Result<Vec<T>>
	where
		T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
		F: Fn(&T) -> String,
	{
		self.check_size(batch.len())?;
		if batch.is_empty() {
			return Ok(Vec::new());
		}

		let keys = batch.ids();
		batch.execute(conn).await?;
		self
			.reselect(conn, batch.table(), &keys, batch.id_column(), select, key_of)
			.await
	}

	async fn reselect<T, F>(
		&self,
		conn: &mut SqliteConnection,
		table: &str,
		keys: &[String],
		id_column: &str,
		select: FilterQuery,
		key_of: F,
	) -> Result<Vec<T>>
	where
		T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
		F: Fn(&T) -> String,
	{
		// The id list shares the statement's variables with the select's own binds.
		let chunk_size = MAX_VARIABLES.saturating_sub(select.binds().len()).max(1);
		let mut rows: Vec<T> = Vec::with_capacity(keys.len());
		for chunk in keys.chunks(chunk_size) {
			let part: Vec<T> = select
				.clone()
				.filter_in(id_column, chunk.iter().map(String::as_str))
				.fetch_all(&mut *conn)
				.await?;
			rows.extend(part);
		}
		tracing::trace!(chunks = keys.len().div_ceil(chunk_size), rows = rows.len(), "batch re-selected");

		reconcile_order(table, keys, rows, key_of).inspect_err(|e| {
			tracing::warn!(error = %e, "batch re-select does not match submitted rows");
		})
	}
}
