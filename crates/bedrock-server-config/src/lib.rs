// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the Bedrock database layer.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`BEDROCK_DB_*`)
//!
//! # Usage
//!
//! ```ignore
//! use bedrock_server_config::load_config;
//!
//! let config = load_config()?;
//! let pool = bedrock_server_db::create_pool(&config.database).await?;
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::DbConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved database layer configuration.
#[derive(Debug, Clone, Default)]
pub struct DbConfig {
	pub database: DatabaseConfig,
	pub query: QueryConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`BEDROCK_DB_*`)
/// 2. Config file (`/etc/bedrock/db.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<DbConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<DbConfig, ConfigError> {
	let mut merged = DbConfigLayer::default();
	merged.merge(EnvSource.load()?);
	finalize(merged)
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<DbConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<DbConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = DbConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
fn finalize(layer: DbConfigLayer) -> Result<DbConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let query = layer.query.unwrap_or_default().finalize();

	validate_config(&database, &query)?;

	info!(
		database = %database.url,
		max_connections = database.max_connections,
		max_batch_items = query.max_batch_items,
		"Database configuration loaded"
	);

	Ok(DbConfig { database, query })
}

/// Validate cross-field configuration rules.
fn validate_config(database: &DatabaseConfig, query: &QueryConfig) -> Result<(), ConfigError> {
	if database.max_connections == 0 {
		return Err(ConfigError::Validation(
			"max_connections must be at least 1".to_string(),
		));
	}

	if query.max_batch_items == 0 {
		return Err(ConfigError::Validation(
			"max_batch_items must be at least 1".to_string(),
		));
	}

	if query.max_batch_items > MAX_BATCH_ITEMS_LIMIT {
		return Err(ConfigError::Validation(format!(
			"max_batch_items must be at most {MAX_BATCH_ITEMS_LIMIT}, got {}",
			query.max_batch_items
		)));
	}

	Ok(())
}
