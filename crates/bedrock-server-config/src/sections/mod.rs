// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod database;
mod query;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use query::{QueryConfig, QueryConfigLayer, DEFAULT_MAX_BATCH_ITEMS, MAX_BATCH_ITEMS_LIMIT};
