//! # pgtrigger
//!
//! Declarative Postgres triggers for Rust applications.
//!
//! ## Features
//!
//! - **Declarative**: triggers are values attached to entities, compiled to
//!   deterministic DDL with a drift hash
//! - **Reconciled**: install, uninstall, enable, disable and prune against
//!   the live catalog, per database
//! - **Suppressible**: ignore specific triggers for a block of code without
//!   touching other connections
//! - **Schema-aware**: scope extra schemas onto the search path
//! - **Transaction-friendly**: everything takes a `GenericClient`
//!
//! ## Example
//!
//! ```ignore
//! use pgtrigger::{Entity, Operation, Trigger};
//!
//! #[derive(Entity)]
//! #[entity(app = "library", table = "library_book")]
//! struct Book {
//!     #[entity(id)]
//!     id: i64,
//!     title: String,
//! }
//!
//! pgtrigger::register_triggers!(Book => [
//!     Trigger::protect("protect_deletes", Operation::Delete),
//! ]);
//!
//! pgtrigger::registry::bootstrap()?;
//! let registry = pgtrigger::registry::snapshot();
//! let settings = pgtrigger::Settings::default();
//!
//! pgtrigger::Reconciler::new(&registry, &settings)
//!     .install(&client, &[] as &[&str])
//!     .await?;
//!
//! let client = pgtrigger::TriggerClient::new(client);
//! pgtrigger::ignore!(client, ["library.Book:protect_deletes"], {
//!     client.execute("DELETE FROM library_book", &[]).await?;
//!     Ok(())
//! })?;
//! ```

pub mod client;
pub mod compiler;
pub mod condition;
pub mod config;
pub mod entity;
pub mod error;
pub mod hook;
pub mod ident;
pub mod installation;
pub mod registry;
pub mod runtime;
mod sql;
pub mod transaction;
pub mod trigger;

pub use client::GenericClient;
pub use compiler::{CompiledTrigger, InstallParams, InstallSql, TemplateVersion};
pub use condition::{Change, ChangeKind, Condition, F, Value};
pub use config::Settings;
pub use entity::{DEFAULT_DATABASE, DefaultRouter, Entity, EntityMeta, FieldKind, FieldMeta, Router};
pub use error::{TriggerError, TriggerResult};
pub use hook::{CompositeHook, HookAction, QueryContext, QueryHook, QueryResult, QueryType, TracingSqlHook};
pub use ident::{quote, quote_ident, quote_literal};
pub use installation::{InstallState, PruneCandidate, Reconciler, Status, alter_column};
pub use registry::{IntoTrigger, RegisteredTrigger, Registry, TriggerRegistration};
pub use runtime::{
    IgnoreScope, IgnoreSession, Runtime, SchemaScope, SchemaSession, TransactionStatus,
    TriggerClient, constraints, ignore_func_name,
};
pub use transaction::{run_isolated, with_savepoint};
pub use trigger::{Level, Operation, Referencing, Timing, Trigger, TriggerBuilder, TriggerKind, When};

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_with_config};

#[cfg(feature = "derive")]
pub use pgtrigger_derive::Entity;

// Re-export inventory for use by register_triggers! and the derive macro
pub use inventory;
