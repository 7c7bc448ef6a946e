//! # stencil-postgres
//!
//! Durable backends for the [`stencil`] blueprint engine:
//!
//! - [`PgEventBus`] - one row per `(topic, execution)`, publish as upsert.
//! - [`PgBackend`] - execution/state rows plus a dispatch queue table drained
//!   with `FOR UPDATE SKIP LOCKED`; the `visible_at` lease column is the
//!   queue's visibility timeout.
//!
//! Schema is created on first use via `ensure_schema`; both sides expose
//! `drop_storage` for test teardown.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stencil::{BlueprintManager, ExecutionStore};
//! use stencil_postgres::{config, PgBackend, PgEventBus};
//!
//! let cfg = config::StoreConfig::from_env()?;
//! let pool = config::connect(&cfg).await?;
//!
//! let bus = Arc::new(PgEventBus::new(pool.clone()));
//! bus.ensure_schema().await?;
//!
//! let backend = PgBackend::new(pool, manager.clone(), &cfg)?;
//! backend.ensure_schema().await?;
//! let store = Arc::new(ExecutionStore::new(backend));
//! ```

pub mod config;

mod bus;
mod store;

pub use bus::PgEventBus;
pub use config::{DbConfig, QueueConfig, StoreConfig, QUEUE_NAME_SUFFIX};
pub use store::PgBackend;
