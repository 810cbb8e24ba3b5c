// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared data-access machinery for the Bedrock control plane.
//!
//! This crate provides:
//! - Whitelisted multi-key ordering and offset pagination with total counts
//! - Free-text search predicates over FTS5 with trigram or `LIKE` substring matching
//! - Bulk insert/update that returns rows in submission order
//! - Content-derived versions for resources mirrored to sites
//!
//! # Usage
//!
//! ```ignore
//! use bedrock_server_db::{PageRequest, OrderSpec};
//!
//! let query = machines.query().and(machines.search(&params.q)?);
//! let page = machines
//! 	.paginator()
//! 	.paginate::<Machine>(&mut conn, &query, &PageRequest::new().order_by(OrderSpec::desc("status")))
//! 	.await?;
//! ```

pub mod batch;
pub mod entity;
pub mod error;
pub mod order;
pub mod page;
pub mod pool;
pub mod query;
pub mod relation;
pub mod search;
pub mod version;

#[cfg(test)]
mod testing;

pub use batch::{reconcile_order, BatchInsert, BatchReconciler, BatchUpdate};
pub use entity::{EntityRegistry, EntityTable};
pub use error::{DbError, Result};
pub use order::{order_by_clause, FieldWhitelist, OrderDirection, OrderSpec, SortKey, TieBreak};
pub use page::{PagePlan, PageRequest, PageResult, Paginator, DEFAULT_LIMIT, TOTAL_LIMIT};
pub use pool::create_pool;
pub use query::{timestamp, FilterQuery, Predicate, SqlValue};
pub use relation::{Relation, RelationJoin};
pub use search::{
	escape_like, fts_match_expression, normalize_search, trigram_match_expression, FtsIndex, FtsTokenizer,
	SearchTarget, TRIGRAM_MIN_CHARS,
};
pub use version::{
	compute_version, compute_version_sets, DependentSet, SyncStatus, VersionFingerprint, VersionPropagation,
	VersionRepository, VersionStore, VersionedParent,
};
