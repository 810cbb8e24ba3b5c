// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration as produced by a single source.

use serde::Deserialize;

use crate::sections::{DatabaseConfigLayer, QueryConfigLayer};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DbConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub query: Option<QueryConfigLayer>,
}

impl DbConfigLayer {
	/// Overlay `other` on top of `self`; fields set in `other` win.
	pub fn merge(&mut self, other: DbConfigLayer) {
		if let Some(database) = other.database {
			self
				.database
				.get_or_insert_with(Default::default)
				.merge(database);
		}
		if let Some(query) = other.query {
			self.query.get_or_insert_with(Default::default).merge(query);
		}
	}
}
