//! Transaction helpers for [`TriggerClient`](crate::TriggerClient).
//!
//! `TriggerClient` tracks transaction state itself so the runtime can pick
//! between `SET LOCAL` and session-level `SET`. Open transactions through it
//! (or through [`atomic!`]) rather than behind its back.
//!
//! ```ignore
//! let client = pgtrigger::TriggerClient::new(client);
//!
//! pgtrigger::atomic!(client, {
//!     pgtrigger::constraints(&client, &registry, Timing::Deferred, &["library.Book:check"]).await?;
//!     client.execute("UPDATE library_book SET title = $1", &[&"x"]).await?;
//!     Ok(())
//! })?;
//! ```

use crate::client::GenericClient;
use crate::error::TriggerResult;
use std::sync::atomic::{AtomicU64, Ordering};

static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

#[doc(hidden)]
pub fn __next_savepoint_name() -> String {
    let id = SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("pgtrigger_sp_{id}")
}

/// Runs the given block inside a transaction on a `TriggerClient`.
///
/// - Sends `BEGIN` through the client.
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)`.
///
/// The block must evaluate to `pgtrigger::TriggerResult<T>`.
#[macro_export]
macro_rules! atomic {
    ($client:expr, $body:block) => {{
        ($client).begin().await?;

        let __pgtrigger_tx_body_result = async { $body }.await;
        match __pgtrigger_tx_body_result {
            Ok(value) => {
                ($client).commit().await?;
                Ok(value)
            }
            Err(error) => match ($client).rollback().await {
                Ok(()) => Err(error),
                Err(rollback_err) => Err($crate::TriggerError::Other(format!(
                    "{error} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }};
}

/// Run `sql` so that its failure leaves an open transaction usable.
///
/// Inside a transaction the batch is wrapped in a savepoint; outside one the
/// batch already runs as its own implicit transaction.
pub async fn run_isolated<C: GenericClient>(client: &C, sql: &str) -> TriggerResult<()> {
    if client.in_transaction() {
        with_savepoint(client, sql).await
    } else {
        client.batch_execute(sql).await
    }
}

/// Run `sql` inside a fresh savepoint, rolling back to it on failure.
pub async fn with_savepoint<C: GenericClient>(client: &C, sql: &str) -> TriggerResult<()> {
    let name = __next_savepoint_name();
    client.batch_execute(&format!("SAVEPOINT {name}")).await?;
    match client.batch_execute(sql).await {
        Ok(()) => client.batch_execute(&format!("RELEASE SAVEPOINT {name}")).await,
        Err(error) => {
            if let Err(rollback_err) = client
                .batch_execute(&format!("ROLLBACK TO SAVEPOINT {name}"))
                .await
            {
                tracing::warn!(target: "pgtrigger", error = %rollback_err, "savepoint rollback failed");
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savepoint_names_are_unique() {
        let a = __next_savepoint_name();
        let b = __next_savepoint_name();
        assert_ne!(a, b);
        assert!(a.starts_with("pgtrigger_sp_"));
    }
}
