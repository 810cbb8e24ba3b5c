// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sort field whitelists and multi-key ordering.

use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};
use crate::query::{is_identifier, qualify};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
	#[default]
	#[serde(rename = "ASC")]
	Ascending,
	#[serde(rename = "DESC")]
	Descending,
}

impl OrderDirection {
	pub fn as_sql(&self) -> &'static str {
		match self {
			OrderDirection::Ascending => "ASC",
			OrderDirection::Descending => "DESC",
		}
	}
}

impl std::str::FromStr for OrderDirection {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"ASC" | "ASCENDING" => Ok(OrderDirection::Ascending),
			"DESC" | "DESCENDING" => Ok(OrderDirection::Descending),
			_ => Err(format!("unknown order direction: {s}")),
		}
	}
}

/// One requested sort key. The field is unvalidated until resolved against a
/// [`FieldWhitelist`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
	pub field: String,
	#[serde(default)]
	pub direction: OrderDirection,
}

impl OrderSpec {
	pub fn new(field: impl Into<String>, direction: OrderDirection) -> Self {
		Self {
			field: field.into(),
			direction,
		}
	}

	pub fn asc(field: impl Into<String>) -> Self {
		Self::new(field, OrderDirection::Ascending)
	}

	pub fn desc(field: impl Into<String>) -> Self {
		Self::new(field, OrderDirection::Descending)
	}
}

/// Secondary key appended after the caller's keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieBreak {
	/// The whitelist's default field.
	#[default]
	DefaultField,
	Field(&'static str),
	Disabled,
}

/// A validated sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
	pub field: &'static str,
	pub direction: OrderDirection,
}

/// Columns an entity may be sorted by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWhitelist {
	fields: Vec<&'static str>,
	default_field: &'static str,
	tie_break: TieBreak,
}

impl FieldWhitelist {
	/// # Errors
	/// Returns `DbError::InvalidConfiguration` if `fields` is empty, holds a
	/// name that is not a plain column identifier, or does not contain
	/// `default_field`.
	pub fn new(fields: &[&'static str], default_field: &'static str) -> Result<Self> {
		if fields.is_empty() {
			return Err(DbError::InvalidConfiguration(
				"sort field whitelist must not be empty".to_string(),
			));
		}
		if let Some(bad) = fields.iter().find(|f| !is_identifier(f)) {
			return Err(DbError::InvalidConfiguration(format!(
				"sort field '{bad}' is not a valid column name"
			)));
		}
		if !fields.contains(&default_field) {
			return Err(DbError::InvalidConfiguration(format!(
				"default sort field '{default_field}' is not in the whitelist"
			)));
		}

		let mut unique = Vec::with_capacity(fields.len());
		for field in fields {
			if !unique.contains(field) {
				unique.push(*field);
			}
		}

		Ok(Self {
			fields: unique,
			default_field,
			tie_break: TieBreak::DefaultField,
		})
	}

	pub fn with_tie_break(mut self, tie_break: TieBreak) -> Result<Self> {
		if let TieBreak::Field(field) = tie_break {
			if !self.contains(field) {
				return Err(DbError::InvalidConfiguration(format!(
					"tie-break field '{field}' is not in the whitelist"
				)));
			}
		}
		self.tie_break = tie_break;
		Ok(self)
	}

	pub fn fields(&self) -> &[&'static str] {
		&self.fields
	}

	pub fn default_field(&self) -> &'static str {
		self.default_field
	}

	pub fn tie_break(&self) -> TieBreak {
		self.tie_break
	}

	pub fn contains(&self, field: &str) -> bool {
		self.fields.iter().any(|f| *f == field)
	}

	/// Map a requested field onto its whitelisted name.
	pub fn validate(&self, field: &str) -> Result<&'static str> {
		self
			.fields
			.iter()
			.copied()
			.find(|f| *f == field)
			.ok_or_else(|| DbError::InvalidSortField {
				field: field.to_string(),
				allowed: self.fields.iter().map(|f| f.to_string()).collect(),
			})
	}

	pub fn default_order(&self) -> OrderSpec {
		OrderSpec::asc(self.default_field)
	}

	/// Validate `requested` and produce the full key list.
	///
	/// An empty request sorts by the default field ascending. Any unknown
	/// field fails the whole call. Keys keep their requested order; a field
	/// requested twice keeps its first direction. The tie-break key is
	/// appended ascending unless it is already present.
	pub fn resolve(&self, requested: &[OrderSpec]) -> Result<Vec<SortKey>> {
		let default = [self.default_order()];
		let requested = if requested.is_empty() {
			&default[..]
		} else {
			requested
		};

		let mut keys: Vec<SortKey> = Vec::with_capacity(requested.len() + 1);
		for spec in requested {
			let field = self.validate(&spec.field)?;
			if keys.iter().any(|k| k.field == field) {
				continue;
			}
			keys.push(SortKey {
				field,
				direction: spec.direction,
			});
		}

		let tie_break = match self.tie_break {
			TieBreak::DefaultField => Some(self.default_field),
			TieBreak::Field(field) => Some(field),
			TieBreak::Disabled => None,
		};
		if let Some(field) = tie_break {
			if !keys.iter().any(|k| k.field == field) {
				keys.push(SortKey {
					field,
					direction: OrderDirection::Ascending,
				});
			}
		}

		Ok(keys)
	}
}

/// Render `keys` as an `ORDER BY` body, qualifying bare fields with `alias`.
pub fn order_by_clause(keys: &[SortKey], alias: &str) -> String {
	keys
		.iter()
		.map(|k| format!("{} {}", qualify(alias, k.field), k.direction.as_sql()))
		.collect::<Vec<_>>()
		.join(", ")
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn machine_whitelist() -> FieldWhitelist {
		FieldWhitelist::new(&["created", "name", "status", "updated"], "created").unwrap()
	}

	#[test]
	fn test_new_rejects_empty() {
		assert!(matches!(
			FieldWhitelist::new(&[], "created"),
			Err(DbError::InvalidConfiguration(_))
		));
	}

	#[test]
	fn test_new_rejects_missing_default() {
		assert!(matches!(
			FieldWhitelist::new(&["name"], "created"),
			Err(DbError::InvalidConfiguration(_))
		));
	}

	#[test]
	fn test_new_rejects_unsafe_field() {
		assert!(matches!(
			FieldWhitelist::new(&["created", "name; --"], "created"),
			Err(DbError::InvalidConfiguration(_))
		));
	}

	#[test]
	fn test_tie_break_must_be_whitelisted() {
		let result = machine_whitelist().with_tie_break(TieBreak::Field("serial"));
		assert!(matches!(result, Err(DbError::InvalidConfiguration(_))));
	}

	#[test]
	fn test_validate_unknown_field() {
		let err = machine_whitelist().validate("password").unwrap_err();
		match err {
			DbError::InvalidSortField { field, allowed } => {
				assert_eq!(field, "password");
				assert_eq!(allowed, vec!["created", "name", "status", "updated"]);
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn test_resolve_empty_uses_default() {
		let keys = machine_whitelist().resolve(&[]).unwrap();
		assert_eq!(
			keys,
			vec![SortKey {
				field: "created",
				direction: OrderDirection::Ascending
			}]
		);
	}

	#[test]
	fn test_resolve_appends_tie_break() {
		let keys = machine_whitelist().resolve(&[OrderSpec::desc("status")]).unwrap();
		assert_eq!(order_by_clause(&keys, "m"), "m.status DESC, m.created ASC");
	}

	#[test]
	fn test_resolve_keeps_requested_order() {
		let keys = machine_whitelist()
			.resolve(&[OrderSpec::asc("name"), OrderSpec::desc("created"), OrderSpec::asc("status")])
			.unwrap();
		assert_eq!(
			order_by_clause(&keys, "m"),
			"m.name ASC, m.created DESC, m.status ASC"
		);
	}

	#[test]
	fn test_resolve_drops_repeated_field() {
		let keys = machine_whitelist()
			.resolve(&[OrderSpec::desc("name"), OrderSpec::asc("name")])
			.unwrap();
		assert_eq!(order_by_clause(&keys, "m"), "m.name DESC, m.created ASC");
	}

	#[test]
	fn test_resolve_without_tie_break() {
		let whitelist = machine_whitelist().with_tie_break(TieBreak::Disabled).unwrap();
		let keys = whitelist.resolve(&[OrderSpec::asc("status")]).unwrap();
		assert_eq!(keys.len(), 1);
	}

	#[test]
	fn test_resolve_fails_whole_call() {
		let result = machine_whitelist().resolve(&[OrderSpec::asc("name"), OrderSpec::asc("bogus")]);
		assert!(matches!(result, Err(DbError::InvalidSortField { .. })));
	}

	#[test]
	fn test_direction_serde_and_parse() {
		assert_eq!(
			serde_json::to_string(&OrderDirection::Descending).unwrap(),
			"\"DESC\""
		);
		assert_eq!("asc".parse::<OrderDirection>().unwrap(), OrderDirection::Ascending);
		assert!("sideways".parse::<OrderDirection>().is_err());

		let spec: OrderSpec = serde_json::from_str(r#"{"field":"name"}"#).unwrap();
		assert_eq!(spec, OrderSpec::asc("name"));
	}

	proptest! {
		#[test]
		fn prop_resolved_fields_are_whitelisted_and_unique(
			picks in proptest::collection::vec((0usize..4, any::<bool>()), 0..8)
		) {
			let whitelist = machine_whitelist();
			let requested: Vec<OrderSpec> = picks
				.iter()
				.map(|(i, desc)| {
					let field = whitelist.fields()[*i];
					if *desc { OrderSpec::desc(field) } else { OrderSpec::asc(field) }
				})
				.collect();

			let keys = whitelist.resolve(&requested).unwrap();
			for (i, key) in keys.iter().enumerate() {
				prop_assert!(whitelist.contains(key.field));
				prop_assert!(keys[i + 1..].iter().all(|k| k.field != key.field));
			}
			prop_assert!(keys.iter().any(|k| k.field == "created"));
		}
	}
}
