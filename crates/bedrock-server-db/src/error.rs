// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Invalid sort field '{field}', expected one of: {}", allowed.join(", "))]
	InvalidSortField { field: String, allowed: Vec<String> },

	#[error("Integrity violation in {context}: expected {expected} rows, got {actual}")]
	IntegrityViolation {
		context: String,
		expected: usize,
		actual: usize,
	},

	#[error("Invalid page request: {0}")]
	InvalidPageRequest(String),

	#[error("Batch size {size} exceeds maximum allowed {max}")]
	BatchTooLarge { size: usize, max: usize },

	#[error("Invalid batch: {0}")]
	InvalidBatch(String),

	#[error("Invalid configuration: {0}")]
	InvalidConfiguration(String),

	#[error("Internal: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_invalid_sort_field_lists_allowed() {
		let err = DbError::InvalidSortField {
			field: "password".to_string(),
			allowed: vec!["created".to_string(), "name".to_string()],
		};
		assert_eq!(
			err.to_string(),
			"Invalid sort field 'password', expected one of: created, name"
		);
	}

	#[test]
	fn test_integrity_violation_reports_counts() {
		let err = DbError::IntegrityViolation {
			context: "machines".to_string(),
			expected: 3,
			actual: 2,
		};
		assert!(err.to_string().contains("expected 3 rows, got 2"));
	}
}
