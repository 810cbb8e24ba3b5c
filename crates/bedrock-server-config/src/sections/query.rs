// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Query engine limits.
//!
//! The default page size and the "fetch everything" limit are fixed by the
//! database layer and deliberately absent here. Only the batch ceiling is
//! tunable per deployment.

use serde::Deserialize;

pub const DEFAULT_MAX_BATCH_ITEMS: usize = 1000;

/// Largest accepted batch ceiling. Matches the database layer's total limit.
pub const MAX_BATCH_ITEMS_LIMIT: usize = 100_000;

#[derive(Debug, Clone)]
pub struct QueryConfig {
	pub max_batch_items: usize,
}

impl Default for QueryConfig {
	fn default() -> Self {
		Self {
			max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryConfigLayer {
	#[serde(default)]
	pub max_batch_items: Option<usize>,
}

impl QueryConfigLayer {
	pub fn merge(&mut self, other: QueryConfigLayer) {
		if other.max_batch_items.is_some() {
			self.max_batch_items = other.max_batch_items;
		}
	}

	pub fn finalize(self) -> QueryConfig {
		QueryConfig {
			max_batch_items: self.max_batch_items.unwrap_or(DEFAULT_MAX_BATCH_ITEMS),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_max_batch_items() {
		let config = QueryConfigLayer::default().finalize();
		assert_eq!(config.max_batch_items, 1000);
	}

	#[test]
	fn test_deserialize_override() {
		let layer: QueryConfigLayer = toml::from_str("max_batch_items = 250").unwrap();
		assert_eq!(layer.finalize().max_batch_items, 250);
	}
}
