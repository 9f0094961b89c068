//! Sharded relational storage client.
//!
//! A [`Client`] owns one MySQL connection pool and routes the statement
//! model in [`statement`] through the sharding [`router`]: DML against a
//! sharded logical table is rewritten to the physical table selected by a
//! deterministic hash of the sharding column. Transactions are pinned to the
//! shard of their first routed statement; there is no cross-shard commit.

use courier_core::{Categorized, Category};

pub mod client;
pub mod config;
pub mod migrate;
pub mod router;
pub mod shard;
pub mod statement;

pub use client::{Client, PoolStats, ShardedTransaction};
pub use config::{ShardingConfig, StorageConfig, TableSharding};
pub use migrate::{ColumnDef, EntityDef, IndexDef};
pub use router::{RoutedStatement, Router};
pub use shard::{physical_table, shard_index, ShardKey};
pub use statement::{Delete, Insert, Select, Statement, Update, Value};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] courier_core::config::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("statement on table '{table}' is missing sharding column '{column}'")]
    ShardKeyMissing { table: String, column: String },

    #[error("values of type {type_name} cannot be used as a sharding key")]
    UnsupportedShardKeyType { type_name: &'static str },

    #[error("transaction is pinned to shard {pinned:02} and cannot touch shard {attempted:02}")]
    CrossShardTransaction { pinned: usize, attempted: usize },

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("client is closed")]
    Closed,
}

impl Categorized for Error {
    fn category(&self) -> Category {
        match self {
            Error::Config(_) => Category::Config,
            Error::InvalidArgument(_) | Error::Closed => Category::InvalidArgument,
            Error::ShardKeyMissing { .. }
            | Error::UnsupportedShardKeyType { .. }
            | Error::CrossShardTransaction { .. } => Category::Storage,
            Error::Database(source) => match source {
                sqlx::Error::Io(_) | sqlx::Error::Tls(_) => Category::Connection,
                sqlx::Error::PoolTimedOut => Category::Timeout,
                _ => Category::Storage,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharding_violations_are_storage_errors() {
        let err = Error::ShardKeyMissing {
            table: "users".to_string(),
            column: "user_id".to_string(),
        };
        assert!(err.is_storage());
        assert!(!err.is_retryable());

        let err = Error::CrossShardTransaction {
            pinned: 1,
            attempted: 2,
        };
        assert!(err.is_storage());
    }

    #[test]
    fn pool_exhaustion_is_a_timeout() {
        let err = Error::Database(sqlx::Error::PoolTimedOut);
        assert!(err.is_timeout());
        assert!(err.is_retryable());
    }
}
