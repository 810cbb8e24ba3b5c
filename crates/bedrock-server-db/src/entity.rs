// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-entity table descriptors.
//!
//! Each entity is described once at startup by an [`EntityTable`] and shared
//! by reference through an [`EntityRegistry`].

use std::collections::BTreeMap;

use crate::error::{DbError, Result};
use crate::order::FieldWhitelist;
use crate::page::Paginator;
use crate::query::{is_identifier, FilterQuery, Predicate};
use crate::search::{normalize_search, SearchTarget};

#[derive(Debug, Clone)]
pub struct EntityTable {
	name: &'static str,
	table: &'static str,
	alias: &'static str,
	id_column: &'static str,
	columns: Vec<&'static str>,
	whitelist: FieldWhitelist,
	search: Option<SearchTarget>,
}

impl EntityTable {
	/// # Errors
	/// Returns `DbError::InvalidConfiguration` when a name is not a plain
	/// identifier or `id_column` is not selected.
	pub fn new(
		name: &'static str,
		table: &'static str,
		alias: &'static str,
		id_column: &'static str,
		columns: &[&'static str],
		whitelist: FieldWhitelist,
	) -> Result<Self> {
		let plain = |s: &str| is_identifier(s) && !s.contains('.');
		if let Some(bad) = [table, alias, id_column]
			.into_iter()
			.chain(columns.iter().copied())
			.find(|s| !plain(*s))
		{
			return Err(DbError::InvalidConfiguration(format!(
				"entity {name}: '{bad}' is not a plain identifier"
			)));
		}
		if !columns.contains(&id_column) {
			return Err(DbError::InvalidConfiguration(format!(
				"entity {name}: id column {id_column} is not selected"
			)));
		}

		Ok(Self {
			name,
			table,
			alias,
			id_column,
			columns: columns.to_vec(),
			whitelist,
			search: None,
		})
	}

	pub fn with_search(mut self, target: SearchTarget) -> Result<Self> {
		if target.columns.is_empty() {
			return Err(DbError::InvalidConfiguration(format!(
				"entity {}: search target has no columns",
				self.name
			)));
		}
		if let Some(bad) = target.columns.iter().find(|c| !is_identifier(c)) {
			return Err(DbError::InvalidConfiguration(format!(
				"entity {}: search column '{bad}' is not an identifier",
				self.name
			)));
		}
		self.search = Some(target);
		Ok(self)
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn table(&self) -> &'static str {
		self.table
	}

	pub fn alias(&self) -> &'static str {
		self.alias
	}

	pub fn id_column(&self) -> &'static str {
		self.id_column
	}

	pub fn columns(&self) -> &[&'static str] {
		&self.columns
	}

	pub fn whitelist(&self) -> &FieldWhitelist {
		&self.whitelist
	}

	/// Unfiltered query selecting the entity's columns.
	pub fn query(&self) -> FilterQuery {
		FilterQuery::new(self.table, self.alias, &self.columns)
	}

	/// Search predicate for `raw`. An empty string is always accepted.
	pub fn search(&self, raw: &str) -> Result<Predicate> {
		match &self.search {
			Some(target) => Ok(normalize_search(raw, self.alias, target)),
			None if raw.trim().is_empty() => Ok(Predicate::always()),
			None => Err(DbError::InvalidPageRequest(format!(
				"{} does not support search",
				self.name
			))),
		}
	}

	pub fn paginator(&self) -> Paginator<'_> {
		Paginator::new(&self.whitelist)
	}

	/// DDL for the entity's full-text and trigram indexes, empty when it has
	/// none.
	pub fn fts_statements(&self) -> Vec<String> {
		let Some(target) = &self.search else {
			return Vec::new();
		};
		target
			.indexes()
			.flat_map(|index| index.create_statements(self.table, &target.columns))
			.collect()
	}
}

#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
	entities: BTreeMap<&'static str, EntityTable>,
}

impl EntityRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(mut self, entity: EntityTable) -> Result<Self> {
		if self.entities.contains_key(entity.name) {
			return Err(DbError::InvalidConfiguration(format!(
				"entity {} registered twice",
				entity.name
			)));
		}
		self.entities.insert(entity.name, entity);
		Ok(self)
	}

	pub fn get(&self, name: &str) -> Result<&EntityTable> {
		self
			.entities
			.get(name)
			.ok_or_else(|| DbError::NotFound(format!("entity {name}")))
	}

	pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
		self.entities.keys().copied()
	}

	pub fn len(&self) -> usize {
		self.entities.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entities.is_empty()
	}
}
