// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Filtered select statements.
//!
//! A [`FilterQuery`] is the partially-built query an entity hands to the
//! paginator or the batch reconciler. The count statement and the bounded
//! select are both rendered from the same instance, so the filter predicates
//! behind `total` and `items` can never diverge.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Arguments, FromRow};
use uuid::Uuid;

use crate::error::Result;
use crate::relation::Relation;

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
	Null,
	Integer(i64),
	Real(f64),
	Text(String),
	Bool(bool),
}

impl SqlValue {
	pub fn as_text(&self) -> Option<&str> {
		match self {
			SqlValue::Text(s) => Some(s),
			_ => None,
		}
	}
}

impl From<i64> for SqlValue {
	fn from(v: i64) -> Self {
		SqlValue::Integer(v)
	}
}

impl From<i32> for SqlValue {
	fn from(v: i32) -> Self {
		SqlValue::Integer(v.into())
	}
}

impl From<u32> for SqlValue {
	fn from(v: u32) -> Self {
		SqlValue::Integer(v.into())
	}
}

impl From<f64> for SqlValue {
	fn from(v: f64) -> Self {
		SqlValue::Real(v)
	}
}

impl From<bool> for SqlValue {
	fn from(v: bool) -> Self {
		SqlValue::Bool(v)
	}
}

impl From<String> for SqlValue {
	fn from(v: String) -> Self {
		SqlValue::Text(v)
	}
}

impl From<&str> for SqlValue {
	fn from(v: &str) -> Self {
		SqlValue::Text(v.to_string())
	}
}

impl From<&String> for SqlValue {
	fn from(v: &String) -> Self {
		SqlValue::Text(v.clone())
	}
}

impl From<Uuid> for SqlValue {
	fn from(v: Uuid) -> Self {
		SqlValue::Text(v.to_string())
	}
}

impl From<DateTime<Utc>> for SqlValue {
	fn from(v: DateTime<Utc>) -> Self {
		SqlValue::Text(timestamp(v))
	}
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
	fn from(v: Option<T>) -> Self {
		v.map(Into::into).unwrap_or(SqlValue::Null)
	}
}

/// Timestamps are stored as fixed-width RFC 3339 text so that lexical and
/// chronological order agree.
pub fn timestamp(dt: DateTime<Utc>) -> String {
	dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// True for `name` or `alias.name` where each part is `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn is_identifier(s: &str) -> bool {
	let mut parts = s.split('.');
	let valid_part = |part: &str| {
		let mut chars = part.chars();
		matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
			&& chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
	};
	match (parts.next(), parts.next(), parts.next()) {
		(Some(name), None, None) => valid_part(name),
		(Some(alias), Some(name), None) => valid_part(alias) && valid_part(name),
		_ => false,
	}
}

pub(crate) fn qualify(alias: &str, column: &str) -> String {
	if column.contains('.') {
		column.to_string()
	} else {
		format!("{alias}.{column}")
	}
}

pub(crate) fn placeholders(n: usize) -> String {
	vec!["?"; n].join(", ")
}

/// SQL fragment with its bind values in placeholder order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
	sql: Option<String>,
	binds: Vec<SqlValue>,
}

impl Predicate {
	/// Matches every row. Adding it to a query is a no-op.
	pub fn always() -> Self {
		Self::default()
	}

	/// Matches no row.
	pub fn never() -> Self {
		Self::new("0 = 1", Vec::new())
	}

	pub fn new(sql: impl Into<String>, binds: Vec<SqlValue>) -> Self {
		Self {
			sql: Some(sql.into()),
			binds,
		}
	}

	pub fn is_always(&self) -> bool {
		self.sql.is_none()
	}

	pub fn sql(&self) -> Option<&str> {
		self.sql.as_deref()
	}

	pub fn binds(&self) -> &[SqlValue] {
		&self.binds
	}

	pub fn or(self, other: Predicate) -> Predicate {
		match (self.sql, other.sql) {
			(Some(left), Some(right)) => {
				let mut binds = self.binds;
				binds.extend(other.binds);
				Predicate::new(format!("({left}) OR ({right})"), binds)
			}
			_ => Predicate::always(),
		}
	}

	/// OR-combine `predicates`. An empty input matches nothing.
	pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
		predicates
			.into_iter()
			.reduce(Predicate::or)
			.unwrap_or_else(Predicate::never)
	}
}

#[derive(Debug, Clone)]
pub struct FilterQuery {
	table: String,
	alias: String,
	columns: Vec<String>,
	joins: Vec<String>,
	included: Vec<&'static str>,
	conditions: Vec<String>,
	binds: Vec<SqlValue>,
}

impl FilterQuery {
	/// Select `columns` (qualified with `alias`) from `table`.
	pub fn new(table: &str, alias: &str, columns: &[&str]) -> Self {
		Self {
			table: table.to_string(),
			alias: alias.to_string(),
			columns: columns.iter().map(|c| qualify(alias, c)).collect(),
			joins: Vec::new(),
			included: Vec::new(),
			conditions: Vec::new(),
			binds: Vec::new(),
		}
	}

	pub fn table(&self) -> &str {
		&self.table
	}

	pub fn alias(&self) -> &str {
		&self.alias
	}

	/// Select `column` under a different result name.
	pub fn column_as(mut self, column: &str, name: &str) -> Self {
		self
			.columns
			.push(format!("{} AS {name}", qualify(&self.alias, column)));
		self
	}

	pub fn filter_eq(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
		self
			.conditions
			.push(format!("{} = ?", qualify(&self.alias, column)));
		self.binds.push(value.into());
		self
	}

	/// Restrict `column` to `values`. An empty list matches no rows.
	pub fn filter_in<I, V>(mut self, column: &str, values: I) -> Self
	where
		I: IntoIterator<Item = V>,
		V: Into<SqlValue>,
	{
		let values: Vec<SqlValue> = values.into_iter().map(Into::into).collect();
		if values.is_empty() {
			self.conditions.push("0 = 1".to_string());
			return self;
		}
		self.conditions.push(format!(
			"{} IN ({})",
			qualify(&self.alias, column),
			placeholders(values.len())
		));
		self.binds.extend(values);
		self
	}

	pub fn filter_raw(self, sql: impl Into<String>, binds: Vec<SqlValue>) -> Self {
		self.and(Predicate::new(sql, binds))
	}

	pub fn and(mut self, predicate: Predicate) -> Self {
		if let Some(sql) = predicate.sql {
			self.conditions.push(format!("({sql})"));
			self.binds.extend(predicate.binds);
		}
		self
	}

	/// Expand a relation. Including the same relation twice is a no-op.
	pub fn include<R: Relation>(mut self, relation: R) -> Self {
		let join = relation.join();
		if self.included.contains(&join.alias) {
			return self;
		}
		self.included.push(join.alias);
		self.joins.push(join.join_sql());
		self.columns.extend(join.select_columns());
		self
	}

	pub fn binds(&self) -> &[SqlValue] {
		&self.binds
	}

	pub fn from_clause(&self) -> String {
		let mut from = format!("{} AS {}", self.table, self.alias);
		for join in &self.joins {
			from.push(' ');
			from.push_str(join);
		}
		from
	}

	pub fn where_clause(&self) -> String {
		if self.conditions.is_empty() {
			"1=1".to_string()
		} else {
			self.conditions.join(" AND ")
		}
	}

	pub fn count_sql(&self) -> String {
		format!(
			"SELECT COUNT(*) FROM {} WHERE {}",
			self.from_clause(),
			self.where_clause()
		)
	}

	/// Unordered, unbounded select. Used for re-selects by id.
	pub fn select_sql(&self) -> String {
		format!(
			"SELECT {} FROM {} WHERE {}",
			self.columns.join(", "),
			self.from_clause(),
			self.where_clause()
		)
	}

	/// Ordered select bounded by two trailing placeholders (limit, offset).
	pub fn page_sql(&self, order_by: &str) -> String {
		format!("{} ORDER BY {order_by} LIMIT ? OFFSET ?", self.select_sql())
	}

	#[tracing::instrument(skip(self, conn), fields(table = %self.table))]
	pub async fn fetch_all<T>(&self, conn: &mut SqliteConnection) -> Result<Vec<T>>
	where
		T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
	{
		let sql = self.select_sql();
		let rows = sqlx::query_as_with::<_, T, _>(&sql, arguments(&self.binds)?)
			.fetch_all(&mut *conn)
			.await?;
		Ok(rows)
	}

	#[tracing::instrument(skip(self, conn), fields(table = %self.table))]
	pub async fn fetch_optional<T>(&self, conn: &mut SqliteConnection) -> Result<Option<T>>
	where
		T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
	{
		let sql = format!("{} LIMIT 1", self.select_sql());
		let row = sqlx::query_as_with::<_, T, _>(&sql, arguments(&self.binds)?)
			.fetch_optional(&mut *conn)
			.await?;
		Ok(row)
	}
}

/// Collect `values` into statement arguments, in order.
pub(crate) fn arguments(values: &[SqlValue]) -> Result<SqliteArguments<'_>> {
	let mut args = SqliteArguments::default();
	for value in values {
		match value {
			SqlValue::Null => args.add(None::<String>),
			SqlValue::Integer(v) => args.add(*v),
			SqlValue::Real(v) => args.add(*v),
			SqlValue::Text(v) => args.add(v.as_str()),
			SqlValue::Bool(v) => args.add(*v),
		}
		.map_err(sqlx::Error::Encode)?;
	}
	Ok(args)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_fixture_pool, insert_machine, insert_site, MachineRow};

	#[test]
	fn test_is_identifier() {
		assert!(is_identifier("created"));
		assert!(is_identifier("m.site_id"));
		assert!(is_identifier("_private1"));
		assert!(!is_identifier(""));
		assert!(!is_identifier("1col"));
		assert!(!is_identifier("a.b.c"));
		assert!(!is_identifier("name; DROP TABLE machines"));
		assert!(!is_identifier("name DESC"));
	}

	#[test]
	fn test_empty_query_matches_everything() {
		let query = FilterQuery::new("machines", "m", &["id", "name"]);
		assert_eq!(query.where_clause(), "1=1");
		assert_eq!(
			query.select_sql(),
			"SELECT m.id, m.name FROM machines AS m WHERE 1=1"
		);
		assert_eq!(
			query.count_sql(),
			"SELECT COUNT(*) FROM machines AS m WHERE 1=1"
		);
	}

	#[test]
	fn test_filters_accumulate_binds_in_order() {
		let query = FilterQuery::new("machines", "m", &["id"])
			.filter_eq("status", "Ready")
			.filter_in("site_id", ["s1", "s2"]);

		assert_eq!(query.where_clause(), "m.status = ? AND m.site_id IN (?, ?)");
		assert_eq!(
			query.binds(),
			&[
				SqlValue::from("Ready"),
				SqlValue::from("s1"),
				SqlValue::from("s2")
			]
		);
	}

	#[test]
	fn test_filter_in_empty_matches_nothing() {
		let query = FilterQuery::new("machines", "m", &["id"]).filter_in("id", Vec::<String>::new());
		assert_eq!(query.where_clause(), "0 = 1");
		assert!(query.binds().is_empty());
	}

	#[test]
	fn test_always_predicate_is_skipped() {
		let query = FilterQuery::new("machines", "m", &["id"]).and(Predicate::always());
		assert_eq!(query.where_clause(), "1=1");
	}

	#[test]
	fn test_predicate_or() {
		let combined = Predicate::new("a = ?", vec![1.into()]).or(Predicate::new("b = ?", vec![2.into()]));
		assert_eq!(combined.sql(), Some("(a = ?) OR (b = ?)"));
		assert_eq!(combined.binds(), &[SqlValue::Integer(1), SqlValue::Integer(2)]);

		let absorbed = Predicate::new("a = ?", vec![1.into()]).or(Predicate::always());
		assert!(absorbed.is_always());
	}

	#[test]
	fn test_predicate_any_empty_is_never() {
		assert_eq!(Predicate::any(Vec::new()).sql(), Some("0 = 1"));
	}

	#[test]
	fn test_arguments_keep_every_value() {
		let values = [
			SqlValue::Null,
			SqlValue::Integer(3),
			SqlValue::Real(0.5),
			SqlValue::from("text"),
			SqlValue::Bool(true),
		];
		assert_eq!(arguments(&values).unwrap().len(), values.len());
		assert_eq!(arguments(&[]).unwrap().len(), 0);
	}

	#[test]
	fn test_option_values() {
		assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
		assert_eq!(SqlValue::from(Some(7i64)), SqlValue::Integer(7));
	}

	#[test]
	fn test_timestamp_is_fixed_width() {
		let a = timestamp(DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
		let b = timestamp(DateTime::parse_from_rfc3339("2025-01-01T00:00:00.5Z").unwrap().with_timezone(&Utc));
		assert_eq!(a.len(), b.len());
		assert!(a < b);
	}

	#[tokio::test]
	async fn test_fetch_all_and_optional() {
		let pool = create_fixture_pool().await;
		let site = insert_site(&pool, "site-a").await;
		insert_machine(&pool, &site, "m-1", "Ready", 0).await;
		insert_machine(&pool, &site, "m-2", "Error", 1).await;

		let mut conn = pool.acquire().await.unwrap();
		let query = FilterQuery::new("machines", "m", MachineRow::COLUMNS).filter_eq("status", "Ready");

		let rows: Vec<MachineRow> = query.fetch_all(&mut conn).await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].name, "m-1");

		let missing: Option<MachineRow> = FilterQuery::new("machines", "m", MachineRow::COLUMNS)
			.filter_eq("id", "does-not-exist")
			.fetch_optional(&mut conn)
			.await
			.unwrap();
		assert!(missing.is_none());
	}
}
