//! Runtime suppression and search-path scoping.
//!
//! Every compiled trigger starts by asking the shared helper function
//! whether its name is listed in the `pgtrigger.ignore` session variable.
//! A [`TriggerClient`] keeps that variable (and optionally `search_path`) in
//! sync with the scopes currently open on it by prepending a `SET` to the
//! statements it sends.
//!
//! ```ignore
//! let client = pgtrigger::TriggerClient::new(client);
//!
//! pgtrigger::ignore!(client, ["library.Book:protect_deletes"], {
//!     client.execute("DELETE FROM library_book WHERE id = $1", &[&id]).await?;
//!     Ok(())
//! })?;
//! ```
//!
//! State is split in two:
//! - [`Runtime`]: the ignored trigger ids and extra schemas. Shared by every
//!   client handed the same handle (one per worker by default).
//! - per-connection bookkeeping inside the client: open session count,
//!   the `search_path` captured on first entry, transaction status.

mod client;
mod scope;

pub use client::{TransactionStatus, TriggerClient};
pub use scope::{IgnoreScope, IgnoreSession, SchemaScope, SchemaSession};

use crate::error::{TriggerError, TriggerResult};
use crate::ident::{quote, quote_ident};
use crate::registry::{RegisteredTrigger, Registry};
use crate::client::GenericClient;
use crate::trigger::{Timing, pgid_sql};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Name of the helper function compiled triggers call to check suppression.
pub fn ignore_func_name(schema: &str) -> String {
    format!("{}._pgtrigger_should_ignore", quote(schema))
}

#[derive(Debug, Default)]
struct RuntimeState {
    ignore: BTreeSet<String>,
    // Ordered: this is a search path.
    schemas: Vec<String>,
}

/// Ignored triggers and extra schemas shared by a set of clients.
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    state: Arc<Mutex<RuntimeState>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Trigger ids currently ignored.
    pub fn ignored(&self) -> Vec<String> {
        self.lock().ignore.iter().cloned().collect()
    }

    pub fn is_ignored(&self, pgid: &str) -> bool {
        self.lock().ignore.contains(pgid)
    }

    /// Schemas currently appended to the search path, in order.
    pub fn schemas(&self) -> Vec<String> {
        self.lock().schemas.clone()
    }

    /// Add ids not yet present; returns the ones this call added.
    pub(crate) fn add_ignored(&self, pgids: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut state = self.lock();
        pgids
            .into_iter()
            .filter(|pgid| state.ignore.insert(pgid.clone()))
            .collect()
    }

    pub(crate) fn remove_ignored(&self, pgids: &[String]) {
        let mut state = self.lock();
        for pgid in pgids {
            state.ignore.remove(pgid);
        }
    }

    pub(crate) fn add_schemas(&self, schemas: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut state = self.lock();
        let mut added = Vec::new();
        for schema in schemas {
            if !state.schemas.contains(&schema) {
                state.schemas.push(schema.clone());
                added.push(schema);
            }
        }
        added
    }

    pub(crate) fn remove_schemas(&self, schemas: &[String]) {
        self.lock().schemas.retain(|s| !schemas.contains(s));
    }

    /// `SET [LOCAL] pgtrigger.ignore='{...}';`
    pub(crate) fn ignore_sql(&self, local: bool) -> String {
        let ids: Vec<String> = self.ignored();
        format!(
            "{} pgtrigger.ignore='{{{}}}';",
            if local { "SET LOCAL" } else { "SET" },
            ids.join(",")
        )
    }

    /// `SET [LOCAL] search_path=...;`, or `None` when no schema is scoped.
    pub(crate) fn search_path_sql(&self, local: bool) -> Option<String> {
        let schemas = self.schemas();
        if schemas.is_empty() {
            return None;
        }
        let path: Vec<String> = schemas.iter().map(|s| quote_ident(s)).collect();
        Some(format!(
            "{} search_path={};",
            if local { "SET LOCAL" } else { "SET" },
            path.join(",")
        ))
    }
}

/// Registered triggers named by `uris`, or all of them.
pub(crate) fn targets<'r, S: AsRef<str>>(
    registry: &'r Registry,
    uris: &[S],
) -> TriggerResult<Vec<&'r RegisteredTrigger>> {
    if uris.is_empty() {
        Ok(registry.iter().collect())
    } else {
        registry.resolve(uris)
    }
}

/// `SET CONSTRAINTS ... {timing}` for deferrable triggers.
///
/// Every targeted trigger must be deferrable and the client must be inside a
/// transaction. The setting lasts until overridden or the transaction ends.
pub async fn constraints<C, S>(
    client: &TriggerClient<C>,
    registry: &Registry,
    timing: Timing,
    uris: &[S],
) -> TriggerResult<()>
where
    C: GenericClient,
    S: AsRef<str>,
{
    let targets = targets(registry, uris)?;
    if let Some(entry) = targets.iter().find(|e| e.trigger.timing().is_none()) {
        return Err(TriggerError::usage(format!(
            "Trigger {} on {} is not deferrable",
            entry.trigger.name(),
            entry.entity.label
        )));
    }
    if client.status() != TransactionStatus::InTransaction {
        return Err(TriggerError::usage(
            "SET CONSTRAINTS requires an open transaction",
        ));
    }
    if targets.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = targets.iter().map(|e| pgid_sql(&e.pgid)).collect();
    client
        .batch_execute(&format!("SET CONSTRAINTS {} {timing}", names.join(", ")))
        .await
}

/// Run a block with registered triggers ignored on `client`.
///
/// The block must evaluate to `TriggerResult<T>`. The scope is released
/// whether the block succeeds or fails; a release failure is reported only
/// when the block itself succeeded.
///
/// ```ignore
/// pgtrigger::ignore!(client, ["library.Book:protect_deletes"], {
///     client.execute("DELETE FROM library_book", &[]).await?;
///     Ok(())
/// })?;
/// ```
#[macro_export]
macro_rules! ignore {
    ($client:expr, [$($uri:expr),* $(,)?], $body:block) => {{
        let __pgtrigger_uris: &[&str] = &[$($uri),*];
        let __pgtrigger_scope = ($client).ignore(__pgtrigger_uris).await?;
        let __pgtrigger_result = async { $body }.await;
        match (__pgtrigger_result, __pgtrigger_scope.release().await) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(error), _) => Err(error),
        }
    }};
}

/// Run a block with schemas appended to the search path on `client`.
///
/// Same shape as [`ignore!`](crate::ignore).
#[macro_export]
macro_rules! schema {
    ($client:expr, [$($schema:expr),* $(,)?], $body:block) => {{
        let __pgtrigger_schemas: &[&str] = &[$($schema),*];
        let __pgtrigger_scope = ($client).schema(__pgtrigger_schemas).await?;
        let __pgtrigger_result = async { $body }.await;
        match (__pgtrigger_result, __pgtrigger_scope.release().await) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(error), _) => Err(error),
        }
    }};
}
