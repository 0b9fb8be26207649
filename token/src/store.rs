//! # TokenStore: Persistent Storage
//!
//! The persistence layer for hosted tokens, built on sled's embedded
//! key-value store. Everything a node must remember across restarts flows
//! through this module.
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees", each an independent B+ tree with
//! its own keyspace:
//!
//! | Tree       | Key                  | Value                     |
//! |------------|----------------------|---------------------------|
//! | `tokens`   | token id (32 bytes)  | `bincode(AssetToken)`     |
//! | `platform` | key (UTF-8)          | `bincode(BrokerRegistry)` |
//! |            |                      | / `bincode(Treasury)`     |
//!
//! A token record is the whole aggregate: metadata, stage, ledger with its
//! full snapshot history, payouts with their claimed sets. Event buffers are
//! transient and deliberately not persisted.
//!
//! ## Durability
//!
//! [`put_token`](TokenStore::put_token) flushes the database, so a token
//! mutation acknowledged to an API caller has hit disk. Platform records
//! (registry, treasury) are written alongside token mutations and ride the
//! same flush.

use sled::{Db, Tree};
use std::path::Path;

use keel_core::treasury::Treasury;

use crate::asset_token::{AssetToken, TokenId};
use crate::registry::BrokerRegistry;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Platform Keys
// ---------------------------------------------------------------------------

/// Well-known key in the `platform` tree for the broker registry.
const PLATFORM_REGISTRY: &[u8] = b"broker_registry";

/// Well-known key in the `platform` tree for the treasury book.
const PLATFORM_TREASURY: &[u8] = b"treasury";

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Persistent storage for hosted tokens and platform state.
///
/// Wraps a sled `Db` and exposes typed accessors. All serialization uses
/// bincode.
///
/// # Thread Safety
///
/// sled is inherently thread-safe; `TokenStore` is `Clone` and can be shared
/// across threads without external synchronization.
#[derive(Debug, Clone)]
pub struct TokenStore {
    /// The underlying sled database handle.
    db: Db,
    /// Full token aggregates indexed by token id.
    tokens: Tree,
    /// Singleton platform records (registry, treasury).
    platform: Tree,
}

impl TokenStore {
    /// Opens or creates a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Creates a temporary database that is cleaned up when dropped.
    ///
    /// Ideal for tests: no filesystem side effects, no cleanup needed.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let tokens = db.open_tree("tokens")?;
        let platform = db.open_tree("platform")?;
        Ok(Self {
            db,
            tokens,
            platform,
        })
    }

    // -- Token operations ---------------------------------------------------

    /// Persists a token aggregate and flushes to disk.
    ///
    /// Overwrites any previous record for the same id; callers persist
    /// after every successful mutation.
    pub fn put_token(&self, token: &AssetToken) -> DbResult<()> {
        let bytes =
            bincode::serialize(token).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.tokens.insert(token.id.as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Retrieves a token by id. Returns `None` if it was never persisted.
    pub fn get_token(&self, id: &TokenId) -> DbResult<Option<AssetToken>> {
        match self.tokens.get(id.as_bytes())? {
            Some(bytes) => {
                let token: AssetToken = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    /// Loads every persisted token. Used once at node startup to rebuild
    /// the in-memory instance map.
    pub fn all_tokens(&self) -> DbResult<Vec<AssetToken>> {
        let mut tokens = Vec::new();
        for entry in self.tokens.iter() {
            let (_key, bytes) = entry?;
            let token: AssetToken = bincode::deserialize(&bytes)
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            tokens.push(token);
        }
        Ok(tokens)
    }

    /// Number of tokens stored.
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    // -- Platform operations ------------------------------------------------

    /// Persists the broker registry.
    pub fn put_registry(&self, registry: &BrokerRegistry) -> DbResult<()> {
        let bytes =
            bincode::serialize(registry).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.platform.insert(PLATFORM_REGISTRY, bytes)?;
        Ok(())
    }

    /// Retrieves the broker registry, if one was ever persisted.
    pub fn get_registry(&self) -> DbResult<Option<BrokerRegistry>> {
        match self.platform.get(PLATFORM_REGISTRY)? {
            Some(bytes) => {
                let registry: BrokerRegistry = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(registry))
            }
            None => Ok(None),
        }
    }

    /// Persists the treasury book.
    pub fn put_treasury(&self, treasury: &Treasury) -> DbResult<()> {
        let bytes =
            bincode::serialize(treasury).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.platform.insert(PLATFORM_TREASURY, bytes)?;
        Ok(())
    }

    /// Retrieves the treasury book, if one was ever persisted.
    pub fn get_treasury(&self) -> DbResult<Option<Treasury>> {
        match self.platform.get(PLATFORM_TREASURY)? {
            Some(bytes) => {
                let treasury: Treasury = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(treasury))
            }
            None => Ok(None),
        }
    }

    // -- Utility operations -------------------------------------------------

    /// Forces a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
