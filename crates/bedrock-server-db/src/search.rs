// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Free-text search predicates.
//!
//! A non-empty search string becomes an OR of two branches: an FTS5 match
//! over the entity's full-text index (when it has one), and a substring
//! match per target column. The substring branch catches partial tokens
//! such as MAC address or UUID fragments that the tokenizer splits apart.
//!
//! Substring matching goes through a trigram index when the entity has one,
//! which folds case for all of Unicode. Without one, or for needles shorter
//! than a trigram, it falls back to `LIKE`, which only folds ASCII.

use crate::query::{qualify, Predicate, SqlValue};

/// Shortest needle a trigram index can answer.
pub const TRIGRAM_MIN_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsTokenizer {
	/// Word tokens with case and diacritics folded.
	Words,
	/// Every run of three characters, case folded.
	Trigram,
}

impl FtsTokenizer {
	pub fn as_str(&self) -> &'static str {
		match self {
			FtsTokenizer::Words => "unicode61 remove_diacritics 2",
			FtsTokenizer::Trigram => "trigram case_sensitive 0",
		}
	}
}

/// External-content FTS5 index mirroring some columns of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FtsIndex {
	pub table: &'static str,
	pub tokenizer: FtsTokenizer,
}

impl FtsIndex {
	pub const fn new(table: &'static str) -> Self {
		Self {
			table,
			tokenizer: FtsTokenizer::Words,
		}
	}

	pub const fn trigram(table: &'static str) -> Self {
		Self {
			table,
			tokenizer: FtsTokenizer::Trigram,
		}
	}

	/// DDL for the index and the triggers that keep it in step with
	/// `content_table`. The content table must have an integer `rowid`.
	pub fn create_statements(&self, content_table: &str, columns: &[&str]) -> Vec<String> {
		let fts = self.table;
		let tokenizer = self.tokenizer.as_str();
		let cols = columns.join(", ");
		let new_cols = columns
			.iter()
			.map(|c| format!("new.{c}"))
			.collect::<Vec<_>>()
			.join(", ");
		let old_cols = columns
			.iter()
			.map(|c| format!("old.{c}"))
			.collect::<Vec<_>>()
			.join(", ");

		vec![
			format!(
				"CREATE VIRTUAL TABLE IF NOT EXISTS {fts} USING fts5({cols}, content='{content_table}', content_rowid='rowid', tokenize='{tokenizer}')"
			),
			format!(
				"CREATE TRIGGER IF NOT EXISTS {fts}_ai AFTER INSERT ON {content_table} BEGIN INSERT INTO {fts}(rowid, {cols}) VALUES (new.rowid, {new_cols}); END"
			),
			format!(
				"CREATE TRIGGER IF NOT EXISTS {fts}_ad AFTER DELETE ON {content_table} BEGIN INSERT INTO {fts}({fts}, rowid, {cols}) VALUES ('delete', old.rowid, {old_cols}); END"
			),
			format!(
				"CREATE TRIGGER IF NOT EXISTS {fts}_au AFTER UPDATE ON {content_table} BEGIN INSERT INTO {fts}({fts}, rowid, {cols}) VALUES ('delete', old.rowid, {old_cols}); INSERT INTO {fts}(rowid, {cols}) VALUES (new.rowid, {new_cols}); END"
			),
		]
	}

	pub fn rebuild_statement(&self) -> String {
		format!("INSERT INTO {fts}({fts}) VALUES ('rebuild')", fts = self.table)
	}
}

/// Columns a search string is matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTarget {
	pub columns: Vec<&'static str>,
	pub fts: Option<FtsIndex>,
	/// Trigram index answering substring matches.
	pub substring: Option<FtsIndex>,
}

impl SearchTarget {
	pub fn new(columns: &[&'static str]) -> Self {
		Self {
			columns: columns.to_vec(),
			fts: None,
			substring: None,
		}
	}

	pub fn with_fts(mut self, index: FtsIndex) -> Self {
		self.fts = Some(index);
		self
	}

	pub fn with_trigram(mut self, table: &'static str) -> Self {
		self.substring = Some(FtsIndex::trigram(table));
		self
	}

	/// Every index backing this target.
	pub fn indexes(&self) -> impl Iterator<Item = &FtsIndex> {
		self.fts.iter().chain(self.substring.iter())
	}
}

/// Build an FTS5 query from user input.
///
/// Every whitespace-separated token becomes a quoted string, so `AND`, `*`,
/// `^`, `:`, `-` and parentheses match literally instead of acting as query
/// syntax. Tokens with no letters or digits would make FTS5 reject the
/// query and are dropped. Returns `None` when nothing searchable is left.
pub fn fts_match_expression(raw: &str) -> Option<String> {
	let tokens: Vec<String> = raw
		.split_whitespace()
		.filter(|t| t.chars().any(char::is_alphanumeric))
		.map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
		.collect();

	if tokens.is_empty() {
		None
	} else {
		Some(tokens.join(" "))
	}
}

/// Quote the whole needle as one FTS5 string for a trigram index, which
/// matches it as a substring of any indexed column.
pub fn trigram_match_expression(needle: &str) -> String {
	format!("\"{}\"", needle.replace('"', "\"\""))
}

/// Escape `LIKE` wildcards for use with `ESCAPE '\'`.
pub fn escape_like(raw: &str) -> String {
	let mut escaped = String::with_capacity(raw.len());
	for c in raw.chars() {
		if matches!(c, '\\' | '%' | '_') {
			escaped.push('\\');
		}
		escaped.push(c);
	}
	escaped
}

/// Turn `raw` into a predicate over `target`, qualified with `alias`.
///
/// An empty or whitespace-only string yields [`Predicate::always`].
pub fn normalize_search(raw: &str, alias: &str, target: &SearchTarget) -> Predicate {
	let needle = raw.trim();
	if needle.is_empty() {
		return Predicate::always();
	}

	let mut branches = Vec::with_capacity(target.columns.len() + 1);

	if let Some(index) = target.fts {
		if let Some(expr) = fts_match_expression(needle) {
			branches.push(Predicate::new(
				format!(
					"{alias}.rowid IN (SELECT rowid FROM {fts} WHERE {fts} MATCH ?)",
					fts = index.table
				),
				vec![SqlValue::Text(expr)],
			));
		}
	}

	match target.substring {
		Some(index) if needle.chars().count() >= TRIGRAM_MIN_CHARS => {
			branches.push(Predicate::new(
				format!(
					"{alias}.rowid IN (SELECT rowid FROM {fts} WHERE {fts} MATCH ?)",
					fts = index.table
				),
				vec![SqlValue::Text(trigram_match_expression(needle))],
			));
		}
		_ => {
			let pattern = format!("%{}%", escape_like(needle));
			for column in &target.columns {
				branches.push(Predicate::new(
					format!("{} LIKE ? ESCAPE '\\'", qualify(alias, column)),
					vec![SqlValue::Text(pattern.clone())],
				));
			}
		}
	}

	Predicate::any(branches)
}
