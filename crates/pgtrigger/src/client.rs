//! Generic client trait for unified database access.

use crate::error::{TriggerError, TriggerResult};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// A trait that unifies database clients and transactions.
///
/// Installation and runtime helpers accept any `GenericClient`, so the same
/// call works on a plain connection, an open transaction or a pooled client.
pub trait GenericClient: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = TriggerResult<Vec<Row>>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = TriggerResult<Option<Row>>> + Send {
        async move {
            let rows = self.query(sql, params).await?;
            Ok(rows.into_iter().next())
        }
    }

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = TriggerResult<u64>> + Send;

    /// Execute one or more `;`-separated statements over the simple query protocol.
    ///
    /// Outside an explicit transaction Postgres runs the whole batch as one
    /// implicit transaction, which is what trigger installation relies on.
    fn batch_execute(
        &self,
        sql: &str,
    ) -> impl std::future::Future<Output = TriggerResult<()>> + Send;

    /// Whether statements run inside an explicit transaction.
    ///
    /// Plain connections report `false`; transactions report `true`.
    fn in_transaction(&self) -> bool {
        false
    }
}

impl GenericClient for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<Vec<Row>> {
        tokio_postgres::Client::query(self, sql, params)
            .await
            .map_err(TriggerError::from_db_error)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<u64> {
        tokio_postgres::Client::execute(self, sql, params)
            .await
            .map_err(TriggerError::from_db_error)
    }

    async fn batch_execute(&self, sql: &str) -> TriggerResult<()> {
        tokio_postgres::Client::batch_execute(self, sql)
            .await
            .map_err(TriggerError::from_db_error)
    }
}

impl GenericClient for tokio_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<Vec<Row>> {
        tokio_postgres::Transaction::query(self, sql, params)
            .await
            .map_err(TriggerError::from_db_error)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<u64> {
        tokio_postgres::Transaction::execute(self, sql, params)
            .await
            .map_err(TriggerError::from_db_error)
    }

    async fn batch_execute(&self, sql: &str) -> TriggerResult<()> {
        tokio_postgres::Transaction::batch_execute(self, sql)
            .await
            .map_err(TriggerError::from_db_error)
    }

    fn in_transaction(&self) -> bool {
        true
    }
}

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::Client {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<Vec<Row>> {
        // Delegate to the deref target (ClientWrapper / tokio_postgres::Client).
        GenericClient::query(&**self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<u64> {
        GenericClient::execute(&**self, sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> TriggerResult<()> {
        GenericClient::batch_execute(&**self, sql).await
    }
}

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::ClientWrapper {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<Vec<Row>> {
        GenericClient::query(&**self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<u64> {
        GenericClient::execute(&**self, sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> TriggerResult<()> {
        GenericClient::batch_execute(&**self, sql).await
    }
}

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<Vec<Row>> {
        GenericClient::query(&**self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<u64> {
        GenericClient::execute(&**self, sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> TriggerResult<()> {
        GenericClient::batch_execute(&**self, sql).await
    }

    fn in_transaction(&self) -> bool {
        true
    }
}

impl<C: GenericClient> GenericClient for &C {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<Vec<Row>> {
        (**self).query(sql, params).await
    }

    async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> TriggerResult<Option<Row>> {
        (**self).query_opt(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<u64> {
        (**self).execute(sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> TriggerResult<()> {
        (**self).batch_execute(sql).await
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }
}
