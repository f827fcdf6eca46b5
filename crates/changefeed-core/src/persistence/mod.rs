//! Persistence layer for the change feed
//!
//! This module provides:
//! - [`EventLog`] trait for the sequenced, append-only event log
//! - [`NotificationStore`] trait for recipient inboxes
//! - In-memory implementations for tests and single-process deployments
//! - PostgreSQL implementations for production, including the entity directory

mod memory;
mod postgres;
mod store;

pub use memory::{InMemoryEventLog, InMemoryNotificationStore};
pub use postgres::{
    run_migrations, PostgresDirectory, PostgresEventLog, PostgresNotificationStore,
};
pub use store::{EventLog, NotificationStore, StoreError};
