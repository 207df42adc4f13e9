//! Persistence for the kanri bounded contexts.
//!
//! A hand-built repository layer over an embedded, ordered key-value
//! store: composite keys encode primary snapshots and key-reference
//! index sets; a per-call unit of work stages mutations and applies them
//! as one atomic batch under per-tenant partition locks. Aggregates pass
//! through this layer as opaque serialized values.

pub mod backlog_items;
pub mod config;
pub mod database;
pub mod error;
pub mod key;
mod locks;
pub mod product_owners;
pub mod products;
pub mod releases;
pub mod sprints;
pub mod team_members;
pub mod teams;
pub mod unit_of_work;

pub use config::StoreConfig;
pub use database::{Database, StoreProvider};
pub use error::StoreError;
pub use key::{CompositeKey, IndexKey};
pub use unit_of_work::{ReadView, UnitOfWork, WorkContext};
