// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixture schema for tests: sites, machines with a full-text index, and the
//! SSH key group tables used for version and batch tests.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::entity::EntityTable;
use crate::order::FieldWhitelist;
use crate::query::{timestamp, FilterQuery};
use crate::search::{FtsIndex, SearchTarget};
use crate::version::{DependentSet, VersionPropagation, VersionedParent};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MachineRow {
	pub id: String,
	pub site_id: String,
	pub name: String,
	pub serial: String,
	pub status: String,
	pub created: String,
	pub updated: String,
}

impl MachineRow {
	pub const COLUMNS: &'static [&'static str] =
		&["id", "site_id", "name", "serial", "status", "created", "updated"];
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InstanceAssociationRow {
	pub id: String,
	pub ssh_key_group_id: String,
	pub instance_id: String,
	pub created: String,
	pub updated: String,
}

impl InstanceAssociationRow {
	pub const COLUMNS: &'static [&'static str] =
		&["id", "ssh_key_group_id", "instance_id", "created", "updated"];
}

pub fn machine_entity() -> EntityTable {
	let whitelist =
		FieldWhitelist::new(&["created", "updated", "name", "serial", "status"], "created").unwrap();
	EntityTable::new("machine", "machines", "m", "id", MachineRow::COLUMNS, whitelist)
		.unwrap()
		.with_search(
			SearchTarget::new(&["name", "serial"])
				.with_fts(FtsIndex::new("machines_fts"))
				.with_trigram("machines_trigram"),
		)
		.unwrap()
}

pub fn instance_association_query() -> FilterQuery {
	FilterQuery::new(
		"ssh_key_group_instance_associations",
		"a",
		InstanceAssociationRow::COLUMNS,
	)
}

pub fn ssh_key_group_parent() -> VersionedParent {
	VersionedParent {
		table: "ssh_key_groups",
		id_column: "id",
		version_column: "version",
		updated_column: Some("updated"),
	}
}

pub fn ssh_key_group_sites() -> DependentSet {
	DependentSet {
		table: "ssh_key_group_site_associations",
		parent_column: "ssh_key_group_id",
		identity_column: "site_id",
		created_column: "created",
		status_column: Some("status"),
	}
}

pub fn ssh_key_group_keys() -> DependentSet {
	DependentSet {
		table: "ssh_key_associations",
		parent_column: "ssh_key_group_id",
		identity_column: "ssh_key_id",
		created_column: "created",
		status_column: None,
	}
}

/// The key set's version, copied onto the group's site associations.
pub fn ssh_key_group_site_versions() -> VersionPropagation {
	VersionPropagation {
		source: 1,
		table: "ssh_key_group_site_associations",
		parent_column: "ssh_key_group_id",
		version_column: "version",
		updated_column: Some("updated"),
	}
}

/// Fixed base so creation order is controlled by the offset alone.
fn created_at(offset_secs: i64) -> String {
	let base = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
		.unwrap()
		.with_timezone(&Utc);
	timestamp(base + Duration::seconds(offset_secs))
}

pub async fn create_fixture_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str(":memory:")
		.unwrap()
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.expect("Failed to create test pool");

	let statements = [
		r#"
		CREATE TABLE sites (
			id TEXT PRIMARY KEY,
			name TEXT NOT NULL,
			created TEXT NOT NULL,
			updated TEXT NOT NULL
		)
		"#,
		r#"
		CREATE TABLE machines (
			id TEXT PRIMARY KEY,
			site_id TEXT NOT NULL REFERENCES sites(id),
			name TEXT NOT NULL,
			serial TEXT NOT NULL,
			status TEXT NOT NULL,
			created TEXT NOT NULL,
			updated TEXT NOT NULL
		)
		"#,
		r#"
		CREATE TABLE ssh_key_groups (
			id TEXT PRIMARY KEY,
			name TEXT NOT NULL,
			version TEXT,
			status TEXT NOT NULL,
			created TEXT NOT NULL,
			updated TEXT NOT NULL
		)
		"#,
		r#"
		CREATE TABLE ssh_key_group_site_associations (
			id TEXT PRIMARY KEY,
			ssh_key_group_id TEXT NOT NULL REFERENCES ssh_key_groups(id),
			site_id TEXT NOT NULL,
			status TEXT,
			version TEXT,
			created TEXT NOT NULL,
			updated TEXT NOT NULL
		)
		"#,
		r#"
		CREATE TABLE ssh_key_associations (
			id TEXT PRIMARY KEY,
			ssh_key_id TEXT NOT NULL,
			ssh_key_group_id TEXT NOT NULL REFERENCES ssh_key_groups(id),
			created TEXT NOT NULL,
			updated TEXT NOT NULL
		)
		"#,
		r#"
		CREATE TABLE ssh_key_group_instance_associations (
			id TEXT PRIMARY KEY,
			ssh_key_group_id TEXT NOT NULL,
			instance_id TEXT NOT NULL,
			created TEXT NOT NULL,
			updated TEXT NOT NULL
		)
		"#,
	];
	for sql in statements {
		sqlx::query(sql).execute(&pool).await.unwrap();
	}
	for sql in machine_entity().fts_statements() {
		sqlx::query(&sql).execute(&pool).await.unwrap();
	}

	pool
}

pub async fn insert_site(pool: &SqlitePool, name: &str) -> String {
	let id = Uuid::new_v4().to_string();
	let now = created_at(0);
	sqlx::query("INSERT INTO sites (id, name, created, updated) VALUES (?, ?, ?, ?)")
		.bind(&id)
		.bind(name)
		.bind(&now)
		.bind(&now)
		.execute(pool)
		.await
		.unwrap();
	id
}

pub async fn insert_machine(
	pool: &SqlitePool,
	site_id: &str,
	name: &str,
	status: &str,
	created_offset: i64,
) -> String {
	let id = Uuid::new_v4().to_string();
	let created = created_at(created_offset);
	sqlx::query(
		"INSERT INTO machines (id, site_id, name, serial, status, created, updated) VALUES (?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(&id)
	.bind(site_id)
	.bind(name)
	.bind(format!("SN{created_offset:04}"))
	.bind(status)
	.bind(&created)
	.bind(&created)
	.execute(pool)
	.await
	.unwrap();
	id
}

pub async fn insert_ssh_key_group(pool: &SqlitePool, name: &str) -> String {
	let id = Uuid::new_v4().to_string();
	let now = created_at(0);
	sqlx::query(
		"INSERT INTO ssh_key_groups (id, name, version, status, created, updated) VALUES (?, ?, NULL, 'Syncing', ?, ?)",
	)
	.bind(&id)
	.bind(name)
	.bind(&now)
	.bind(&now)
	.execute(pool)
	.await
	.unwrap();
	id
}

pub async fn insert_group_site(
	pool: &SqlitePool,
	group_id: &str,
	site_id: &str,
	status: &str,
	created_offset: i64,
) -> String {
	let id = Uuid::new_v4().to_string();
	let created = created_at(created_offset);
	sqlx::query(
		"INSERT INTO ssh_key_group_site_associations (id, ssh_key_group_id, site_id, status, created, updated) VALUES (?, ?, ?, ?, ?, ?)",
	)
	.bind(&id)
	.bind(group_id)
	.bind(site_id)
	.bind(status)
	.bind(&created)
	.bind(&created)
	.execute(pool)
	.await
	.unwrap();
	id
}

pub async fn delete_group_site(pool: &SqlitePool, id: &str) {
	sqlx::query("DELETE FROM ssh_key_group_site_associations WHERE id = ?")
		.bind(id)
		.execute(pool)
		.await
		.unwrap();
}

pub async fn insert_key_association(
	pool: &SqlitePool,
	group_id: &str,
	key_id: &str,
	created_offset: i64,
) -> String {
	let id = Uuid::new_v4().to_string();
	let created = created_at(created_offset);
	sqlx::query(
		"INSERT INTO ssh_key_associations (id, ssh_key_id, ssh_key_group_id, created, updated) VALUES (?, ?, ?, ?, ?)",
	)
	.bind(&id)
	.bind(key_id)
	.bind(group_id)
	.bind(&created)
	.bind(&created)
	.execute(pool)
	.await
	.unwrap();
	id
}

pub async fn delete_key_association(pool: &SqlitePool, id: &str) {
	sqlx::query("DELETE FROM ssh_key_associations WHERE id = ?")
		.bind(id)
		.execute(pool)
		.await
		.unwrap();
}

pub async fn site_association_versions(pool: &SqlitePool, group_id: &str) -> Vec<Option<String>> {
	sqlx::query_as::<_, (Option<String>,)>(
		"SELECT version FROM ssh_key_group_site_associations WHERE ssh_key_group_id = ? ORDER BY created",
	)
	.bind(group_id)
	.fetch_all(pool)
	.await
	.unwrap()
	.into_iter()
	.map(|(version,)| version)
	.collect()
}

pub async fn insert_instance_association(pool: &SqlitePool, group_id: &str, instance_id: &str) -> String {
	let id = Uuid::new_v4().to_string();
	let now = created_at(0);
	sqlx::query(
		"INSERT INTO ssh_key_group_instance_associations (id, ssh_key_group_id, instance_id, created, updated) VALUES (?, ?, ?, ?, ?)",
	)
	.bind(&id)
	.bind(group_id)
	.bind(instance_id)
	.bind(&now)
	.bind(&now)
	.execute(pool)
	.await
	.unwrap();
	id
}
