// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Content-derived versions for resources mirrored to sites.
//!
//! A parent's version is a digest of its own id followed by the ids of each
//! of its dependent sets in turn, every set in creation order. Site agents
//! compare it with the version they last applied to decide whether to re-pull
//! the dependents.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteConnection;
use sqlx::SqlitePool;

use crate::error::{DbError, Result};
use crate::order::{FieldWhitelist, OrderSpec, TieBreak};
use crate::page::{PageRequest, Paginator};
use crate::query::{arguments, is_identifier, timestamp, FilterQuery, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
	Syncing,
	Synced,
	Error,
	Deleting,
}

impl SyncStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			SyncStatus::Syncing => "Syncing",
			SyncStatus::Synced => "Synced",
			SyncStatus::Error => "Error",
			SyncStatus::Deleting => "Deleting",
		}
	}
}

impl std::fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for SyncStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"Syncing" => Ok(SyncStatus::Syncing),
			"Synced" => Ok(SyncStatus::Synced),
			"Error" => Ok(SyncStatus::Error),
			"Deleting" => Ok(SyncStatus::Deleting),
			_ => Err(format!("unknown sync status: {s}")),
		}
	}
}

/// Lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionFingerprint(String);

impl VersionFingerprint {
	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_inner(self) -> String {
		self.0
	}

	/// Whether a site that last applied `stored` is up to date.
	pub fn matches(&self, stored: Option<&str>) -> bool {
		stored == Some(self.0.as_str())
	}
}

impl std::fmt::Display for VersionFingerprint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// Digest `parent` followed by `children` in the given order.
///
/// Each identity is prefixed with its byte length so that no two distinct
/// identity lists produce the same input stream.
pub fn compute_version<S: AsRef<str>>(parent: &str, children: &[S]) -> VersionFingerprint {
	compute_version_sets(parent, &[children])
}

/// Digest `parent` followed by each dependent set in turn.
///
/// A single set digests exactly like [`compute_version`]. Every later set is
/// preceded by a marker no identity length can equal, so moving an identity
/// from one set to the next changes the version.
pub fn compute_version_sets<S: AsRef<str>>(parent: &str, sets: &[&[S]]) -> VersionFingerprint {
	let mut hasher = Sha256::new();
	feed(&mut hasher, parent);
	for (position, set) in sets.iter().enumerate() {
		if position > 0 {
			hasher.update(SET_MARKER.to_le_bytes());
		}
		for child in set.iter() {
			feed(&mut hasher, child.as_ref());
		}
	}

	VersionFingerprint(hex::encode(hasher.finalize()))
}

fn feed(hasher: &mut Sha256, identity: &str) {
	hasher.update((identity.len() as u64).to_le_bytes());
	hasher.update(identity.as_bytes());
}

const SET_MARKER: u64 = u64::MAX;

fn check_identifiers(kind: &str, names: &[&str]) -> Result<()> {
	match names.iter().find(|n| !is_identifier(n) || n.contains('.')) {
		Some(bad) => Err(DbError::InvalidConfiguration(format!(
			"{kind} name '{bad}' is not a plain identifier"
		))),
		None => Ok(()),
	}
}

/// Where a parent's version is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedParent {
	pub table: &'static str,
	pub id_column: &'static str,
	pub version_column: &'static str,
	pub updated_column: Option<&'static str>,
}

impl VersionedParent {
	pub fn validate(&self) -> Result<()> {
		let mut names = vec![self.table, self.id_column, self.version_column];
		names.extend(self.updated_column);
		check_identifiers("versioned parent", &names)
	}
}

/// Child rows whose identities feed a parent's version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentSet {
	pub table: &'static str,
	/// Column referencing the parent id.
	pub parent_column: &'static str,
	/// Column fed into the digest.
	pub identity_column: &'static str,
	pub created_column: &'static str,
	/// Rows in `Deleting` status are left out when set.
	pub status_column: Option<&'static str>,
}

impl DependentSet {
	pub fn validate(&self) -> Result<()> {
		let mut names = vec![
			self.table,
			self.parent_column,
			self.identity_column,
			self.created_column,
		];
		names.extend(self.status_column);
		check_identifiers("dependent set", &names)
	}

	fn whitelist(&self) -> Result<FieldWhitelist> {
		FieldWhitelist::new(&[self.created_column, self.identity_column], self.created_column)?
			.with_tie_break(TieBreak::Field(self.identity_column))
	}
}

/// A version derived from one dependent set alone, written onto every row of
/// `table` that belongs to the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPropagation {
	/// Position of the source set among the repository's dependent sets.
	pub source: usize,
	pub table: &'static str,
	pub parent_column: &'static str,
	pub version_column: &'static str,
	pub updated_column: Option<&'static str>,
}

impl VersionPropagation {
	pub fn validate(&self) -> Result<()> {
		let mut names = vec![self.table, self.parent_column, self.version_column];
		names.extend(self.updated_column);
		check_identifiers("version propagation", &names)
	}
}

#[derive(Debug, sqlx::FromRow)]
struct DependentRow {
	identity: String,
}

fn version_update(
	table: &str,
	key_column: &str,
	version_column: &str,
	updated_column: Option<&str>,
	version: &VersionFingerprint,
	key: &str,
) -> (String, Vec<SqlValue>) {
	match updated_column {
		Some(updated) => (
			format!("UPDATE {table} SET {version_column} = ?, {updated} = ? WHERE {key_column} = ?"),
			vec![
				SqlValue::from(version.as_str()),
				SqlValue::Text(timestamp(Utc::now())),
				SqlValue::from(key),
			],
		),
		None => (
			format!("UPDATE {table} SET {version_column} = ? WHERE {key_column} = ?"),
			vec![SqlValue::from(version.as_str()), SqlValue::from(key)],
		),
	}
}

#[derive(Clone)]
pub struct VersionRepository {
	pool: SqlitePool,
	parent: VersionedParent,
	dependents: Vec<(DependentSet, FieldWhitelist)>,
	propagation: Option<VersionPropagation>,
}

impl VersionRepository {
	/// `dependents` are digested in the order given.
	pub fn new(pool: SqlitePool, parent: VersionedParent, dependents: Vec<DependentSet>) -> Result<Self> {
		parent.validate()?;
		if dependents.is_empty() {
			return Err(DbError::InvalidConfiguration(format!(
				"{} has no dependent sets",
				parent.table
			)));
		}
		let dependents = dependents
			.into_iter()
			.map(|set| {
				set.validate()?;
				let whitelist = set.whitelist()?;
				Ok((set, whitelist))
			})
			.collect::<Result<Vec<_>>>()?;

		Ok(Self {
			pool,
			parent,
			dependents,
			propagation: None,
		})
	}

	pub fn with_propagation(mut self, propagation: VersionPropagation) -> Result<Self> {
		propagation.validate()?;
		if propagation.source >= self.dependents.len() {
			return Err(DbError::InvalidConfiguration(format!(
				"propagation source {} out of range for {} dependent sets",
				propagation.source,
				self.dependents.len()
			)));
		}
		self.propagation = Some(propagation);
		Ok(self)
	}

	pub fn parent(&self) -> &VersionedParent {
		&self.parent
	}

	pub fn dependents(&self) -> impl Iterator<Item = &DependentSet> {
		self.dependents.iter().map(|(set, _)| set)
	}

	pub fn propagation(&self) -> Option<&VersionPropagation> {
		self.propagation.as_ref()
	}

	async fn ensure_parent(&self, conn: &mut SqliteConnection, parent_id: &str) -> Result<Option<String>> {
		let p = &self.parent;
		let sql = format!("SELECT {} FROM {} WHERE {} = ?", p.version_column, p.table, p.id_column);
		let row: Option<(Option<String>,)> = sqlx::query_as(&sql)
			.bind(parent_id)
			.fetch_optional(&mut *conn)
			.await?;

		row
			.map(|(version,)| version)
			.ok_or_else(|| DbError::NotFound(format!("{} {parent_id}", p.table)))
	}

	async fn read_set(
		&self,
		conn: &mut SqliteConnection,
		set: &DependentSet,
		whitelist: &FieldWhitelist,
		parent_id: &str,
	) -> Result<Vec<String>> {
		let mut query = FilterQuery::new(set.table, "c", &[])
			.column_as(set.identity_column, "identity")
			.filter_eq(set.parent_column, parent_id);
		if let Some(status) = set.status_column {
			query = query.filter_raw(
				format!("c.{status} IS NULL OR c.{status} != ?"),
				vec![SqlValue::from(SyncStatus::Deleting.as_str())],
			);
		}

		let page = PageRequest::all().order_by(OrderSpec::asc(set.created_column));
		let result = Paginator::new(whitelist)
			.paginate::<DependentRow>(conn, &query, &page)
			.await?;

		if result.total as usize != result.items.len() {
			tracing::warn!(total = result.total, read = result.items.len(), "dependent set exceeds read limit");
			return Err(DbError::IntegrityViolation {
				context: format!("{} dependents of {parent_id}", set.table),
				expected: result.total as usize,
				actual: result.items.len(),
			});
		}

		Ok(result.items.into_iter().map(|r| r.identity).collect())
	}

	async fn read_sets(&self, conn: &mut SqliteConnection, parent_id: &str) -> Result<Vec<Vec<String>>> {
		self.ensure_parent(conn, parent_id).await?;
		let mut sets = Vec::with_capacity(self.dependents.len());
		for (set, whitelist) in &self.dependents {
			sets.push(self.read_set(conn, set, whitelist, parent_id).await?);
		}
		Ok(sets)
	}

	/// Compute the version from the current dependents without persisting it.
	#[tracing::instrument(skip(self, conn), fields(table = %self.parent.table))]
	pub async fn compute_current_version(
		&self,
		conn: &mut SqliteConnection,
		parent_id: &str,
	) -> Result<VersionFingerprint> {
		let sets = self.read_sets(conn, parent_id).await?;
		let version = digest_sets(parent_id, &sets);
		tracing::debug!(sets = sets.len(), %version, "computed version");
		Ok(version)
	}

	/// Recompute and store the version using the caller's connection or
	/// transaction. A configured propagation is written in the same pass.
	#[tracing::instrument(skip(self, conn), fields(table = %self.parent.table))]
	pub async fn generate_and_update_version_in(
		&self,
		conn: &mut SqliteConnection,
		parent_id: &str,
	) -> Result<VersionFingerprint> {
		let sets = self.read_sets(conn, parent_id).await?;
		let version = digest_sets(parent_id, &sets);

		let p = &self.parent;
		let (sql, binds) = version_update(
			p.table,
			p.id_column,
			p.version_column,
			p.updated_column,
			&version,
			parent_id,
		);
		let result = sqlx::query_with(&sql, arguments(&binds)?)
			.execute(&mut *conn)
			.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("{} {parent_id}", p.table)));
		}

		if let Some(propagation) = &self.propagation {
			let source = sets.get(propagation.source).ok_or_else(|| {
				DbError::Internal(format!("propagation source {} missing", propagation.source))
			})?;
			let derived = compute_version(parent_id, source.as_slice());
			let (sql, binds) = version_update(
				propagation.table,
				propagation.parent_column,
				propagation.version_column,
				propagation.updated_column,
				&derived,
				parent_id,
			);
			let rows = sqlx::query_with(&sql, arguments(&binds)?)
				.execute(&mut *conn)
				.await?
				.rows_affected();
			tracing::debug!(target_table = propagation.table, rows, %derived, "derived version propagated");
		}

		tracing::debug!(%version, "version updated");
		Ok(version)
	}

	/// Recompute and store the version in its own transaction.
	#[tracing::instrument(skip(self), fields(table = %self.parent.table))]
	pub async fn generate_and_update_version(&self, parent_id: &str) -> Result<VersionFingerprint> {
		let mut tx = self.pool.begin().await?;
		let version = self.generate_and_update_version_in(&mut *tx, parent_id).await?;
		tx.commit().await?;
		Ok(version)
	}

	/// The stored version, `None` if it was never generated.
	#[tracing::instrument(skip(self), fields(table = %self.parent.table))]
	pub async fn get_version(&self, parent_id: &str) -> Result<Option<VersionFingerprint>> {
		let mut conn = self.pool.acquire().await?;
		let stored = self.ensure_parent(&mut *conn, parent_id).await?;
		Ok(stored.map(VersionFingerprint))
	}
}

fn digest_sets(parent_id: &str, sets: &[Vec<String>]) -> VersionFingerprint {
	let slices: Vec<&[String]> = sets.iter().map(Vec::as_slice).collect();
	compute_version_sets(parent_id, &slices)
}

#[async_trait]
pub trait VersionStore: Send + Sync {
	async fn generate_and_update_version(&self, parent_id: &str) -> Result<VersionFingerprint>;
	async fn get_version(&self, parent_id: &str) -> Result<Option<VersionFingerprint>>;
}

#[async_trait]
impl VersionStore for VersionRepository {
	async fn generate_and_update_version(&self, parent_id: &str) -> Result<VersionFingerprint> {
		self.generate_and_update_version(parent_id).await
	}

	async fn get_version(&self, parent_id: &str) -> Result<Option<VersionFingerprint>> {
		self.get_version(parent_id).await
	}
}
