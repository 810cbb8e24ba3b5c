// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Expandable relations.
//!
//! Each entity declares the relations a caller may expand as a closed enum
//! implementing [`Relation`]. Expanding a relation adds a belongs-to
//! `LEFT JOIN` to a [`FilterQuery`](crate::query::FilterQuery) and selects
//! the joined columns as `<alias>_<column>`.

use std::fmt::Debug;

/// Description of a belongs-to join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationJoin {
	pub table: &'static str,
	pub alias: &'static str,
	/// Join condition, written against the base table alias and `alias`.
	pub on: &'static str,
	pub columns: &'static [&'static str],
}

impl RelationJoin {
	pub fn join_sql(&self) -> String {
		format!("LEFT JOIN {} AS {} ON {}", self.table, self.alias, self.on)
	}

	pub fn select_columns(&self) -> impl Iterator<Item = String> + '_ {
		self
			.columns
			.iter()
			.map(move |column| format!("{alias}.{column} AS {alias}_{column}", alias = self.alias))
	}
}

pub trait Relation: Copy + Debug + Send + Sync + 'static {
	fn join(self) -> RelationJoin;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, Clone, Copy)]
	enum MachineRelation {
		Site,
	}

	impl Relation for MachineRelation {
		fn join(self) -> RelationJoin {
			match self {
				MachineRelation::Site => RelationJoin {
					table: "sites",
					alias: "site",
					on: "site.id = m.site_id",
					columns: &["name", "created"],
				},
			}
		}
	}

	#[test]
	fn test_join_sql() {
		let join = MachineRelation::Site.join();
		assert_eq!(join.join_sql(), "LEFT JOIN sites AS site ON site.id = m.site_id");
	}

	#[test]
	fn test_select_columns_are_prefixed() {
		let columns: Vec<String> = MachineRelation::Site.join().select_columns().collect();
		assert_eq!(
			columns,
			vec!["site.name AS site_name", "site.created AS site_created"]
		);
	}
}
