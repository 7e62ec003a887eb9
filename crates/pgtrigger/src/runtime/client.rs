use super::Runtime;
use super::scope::{IgnoreScope, SchemaScope};
use crate::client::GenericClient;
use crate::error::{TriggerError, TriggerResult};
use crate::hook::{CompositeHook, HookAction, QueryContext, QueryHook, QueryResult, QueryType};
use crate::registry::{self, Registry};
use crate::sql::{TxControl, is_concurrent_statement, split_first_statement, split_statements};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Transaction state of the wrapped connection, as far as the client saw it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionStatus {
    #[default]
    Idle,
    InTransaction,
    /// A statement failed; only ROLLBACK (TO) is accepted.
    InError,
}

#[derive(Debug, Default)]
pub(super) struct ConnState {
    pub(super) status: TransactionStatus,
    pub(super) ignore_sessions: usize,
    pub(super) schema_sessions: usize,
    pub(super) initial_search_path: Option<String>,
    /// A session-level (non-LOCAL) SET was sent and must be undone.
    pub(super) ignore_dirty: bool,
    pub(super) search_path_dirty: bool,
    /// Undo owed by a scope that was dropped without `release`.
    pub(super) pending_ignore_reset: bool,
    pub(super) pending_search_path_reset: bool,
    /// A reset of a session-level SET went out inside a transaction that has
    /// not committed; a rollback brings the SET back.
    pub(super) ignore_reset_uncommitted: bool,
    pub(super) search_path_reset_uncommitted: bool,
}

impl ConnState {
    fn ignore_reset_sent(&mut self) {
        self.pending_ignore_reset = false;
        if self.ignore_dirty {
            self.ignore_reset_uncommitted = true;
        }
    }

    fn search_path_reset_sent(&mut self) {
        self.pending_search_path_reset = false;
        if self.search_path_dirty {
            self.search_path_reset_uncommitted = true;
        }
    }

    fn resets_committed(&mut self) {
        if std::mem::take(&mut self.ignore_reset_uncommitted) {
            self.ignore_dirty = false;
        }
        if std::mem::take(&mut self.search_path_reset_uncommitted) {
            self.search_path_dirty = false;
        }
    }

    fn resets_rolled_back(&mut self) {
        if std::mem::take(&mut self.ignore_reset_uncommitted) {
            self.pending_ignore_reset = true;
        }
        if std::mem::take(&mut self.search_path_reset_uncommitted) {
            self.pending_search_path_reset = true;
        }
    }

    /// Resets still owed to the connection, whatever the scopes think.
    fn owed_resets(&self) -> String {
        let mut sql = String::new();
        if self.ignore_dirty || self.pending_ignore_reset {
            sql.push_str("RESET pgtrigger.ignore;");
        }
        if self.search_path_dirty || self.pending_search_path_reset {
            if let Some(initial) = &self.initial_search_path {
                sql.push_str(&format!("SET search_path={initial};"));
            }
        }
        sql
    }
}

/// A [`GenericClient`] that applies hooks and the runtime protocol to every
/// statement it sends.
///
/// Call [`into_inner`](Self::into_inner) to get the connection back; it
/// sends any reset a dropped scope still owes. A client dropped outright
/// skips that, which is why pooled connections are also reset on recycle.
///
/// ```ignore
/// let (client, connection) = tokio_postgres::connect(&url, NoTls).await?;
/// tokio::spawn(connection);
/// let client = TriggerClient::new(client).with_hook(TracingSqlHook::new());
/// ```
pub struct TriggerClient<C> {
    client: C,
    runtime: Runtime,
    hook: Option<Arc<dyn QueryHook>>,
    tag: Option<String>,
    state: Mutex<ConnState>,
}

impl<C: GenericClient> TriggerClient<C> {
    /// Wrap an idle connection with a fresh [`Runtime`].
    pub fn new(client: C) -> Self {
        Self {
            client,
            runtime: Runtime::new(),
            hook: None,
            tag: None,
            state: Mutex::new(ConnState::default()),
        }
    }

    /// Wrap a client that is already inside a transaction, such as a
    /// `tokio_postgres::Transaction`.
    pub fn for_transaction(client: C) -> Self {
        let this = Self::new(client);
        this.lock().status = TransactionStatus::InTransaction;
        this
    }

    /// Share `runtime` with other clients of the same worker.
    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_hook<H: QueryHook + 'static>(mut self, hook: H) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn with_hook_arc(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Add a hook after the existing ones.
    pub fn add_hook<H: QueryHook + 'static>(self, hook: H) -> Self {
        self.add_hook_arc(Arc::new(hook))
    }

    pub fn add_hook_arc(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.hook = Some(match self.hook.take() {
            None => hook,
            Some(existing) => Arc::new(CompositeHook::new().add_arc(existing).add_arc(hook)),
        });
        self
    }

    /// Tag handed to hooks with every statement.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn inner(&self) -> &C {
        &self.client
    }

    /// Unwrap the connection, first undoing any session setting the runtime
    /// left on it.
    ///
    /// A failed transaction is rolled back first, since nothing else can
    /// run on it.
    pub async fn into_inner(self) -> TriggerResult<C> {
        let (status, owed) = {
            let state = self.lock();
            (state.status, state.owed_resets())
        };
        if owed.is_empty() {
            return Ok(self.client);
        }
        if status == TransactionStatus::InError {
            tracing::warn!(
                target: "pgtrigger.runtime",
                "rolling back failed transaction to reset session settings"
            );
            self.client.batch_execute("ROLLBACK").await?;
            self.lock().resets_rolled_back();
        }
        let owed = self.lock().owed_resets();
        self.raw_batch(&owed).await?;
        Ok(self.client)
    }

    pub fn status(&self) -> TransactionStatus {
        self.lock().status
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn begin(&self) -> TriggerResult<()> {
        self.batch_execute("BEGIN").await
    }

    pub async fn commit(&self) -> TriggerResult<()> {
        self.batch_execute("COMMIT").await
    }

    pub async fn rollback(&self) -> TriggerResult<()> {
        self.batch_execute("ROLLBACK").await
    }

    pub async fn savepoint(&self, name: &str) -> TriggerResult<()> {
        self.batch_execute(&format!("SAVEPOINT {}", crate::ident::quote_ident(name)))
            .await
    }

    pub async fn release_savepoint(&self, name: &str) -> TriggerResult<()> {
        self.batch_execute(&format!(
            "RELEASE SAVEPOINT {}",
            crate::ident::quote_ident(name)
        ))
        .await
    }

    pub async fn rollback_to(&self, name: &str) -> TriggerResult<()> {
        self.batch_execute(&format!(
            "ROLLBACK TO SAVEPOINT {}",
            crate::ident::quote_ident(name)
        ))
        .await
    }

    /// Ignore registered triggers (all of them when `uris` is empty) on this
    /// connection until the scope is released.
    pub async fn ignore<S: AsRef<str>>(&self, uris: &[S]) -> TriggerResult<IgnoreScope<'_, C>> {
        let pgids = {
            let registry = registry::read();
            ignorable_pgids(&registry, uris)?
        };
        Ok(IgnoreScope::enter(self, pgids))
    }

    /// [`ignore`](Self::ignore) against an explicit registry.
    pub async fn ignore_in<S: AsRef<str>>(
        &self,
        registry: &Registry,
        uris: &[S],
    ) -> TriggerResult<IgnoreScope<'_, C>> {
        let pgids = ignorable_pgids(registry, uris)?;
        Ok(IgnoreScope::enter(self, pgids))
    }

    /// Append `schemas` to the search path on this connection until the
    /// scope is released.
    pub async fn schema<S: AsRef<str>>(&self, schemas: &[S]) -> TriggerResult<SchemaScope<'_, C>> {
        SchemaScope::enter(self, schemas).await
    }

    /// Capture `search_path` the first time a schema session opens.
    pub(super) async fn open_schema_session(&self) -> TriggerResult<()> {
        let first = self.lock().schema_sessions == 0;
        if first {
            let row = self.client.query_opt("SHOW search_path", &[]).await?;
            let path: String = match row {
                Some(row) => row.try_get(0).map_err(TriggerError::from_db_error)?,
                None => return Err(TriggerError::NotFound("search_path".into())),
            };
            let mut state = self.lock();
            if state.schema_sessions == 0 {
                state.initial_search_path = Some(path);
            }
            state.schema_sessions += 1;
        } else {
            self.lock().schema_sessions += 1;
        }
        Ok(())
    }

    /// Undo statement for a closing session, or `None` when nothing is owed.
    ///
    /// In a failed transaction the undo is queued for the next statement.
    pub(super) fn close_ignore_session(&self, queue_only: bool) -> Option<String> {
        let mut state = self.lock();
        state.ignore_sessions = state.ignore_sessions.saturating_sub(1);
        if state.ignore_sessions > 0 {
            return None;
        }
        let owed = state.status != TransactionStatus::Idle || state.ignore_dirty;
        if !owed {
            return None;
        }
        if queue_only || state.status == TransactionStatus::InError {
            state.pending_ignore_reset = true;
            return None;
        }
        state.ignore_reset_sent();
        Some("RESET pgtrigger.ignore;".to_string())
    }

    pub(super) fn close_schema_session(&self, queue_only: bool) -> Option<String> {
        let mut state = self.lock();
        state.schema_sessions = state.schema_sessions.saturating_sub(1);
        if state.schema_sessions > 0 {
            return None;
        }
        let owed = state.status != TransactionStatus::Idle || state.search_path_dirty;
        let initial = state.initial_search_path.clone()?;
        if !owed {
            return None;
        }
        if queue_only || state.status == TransactionStatus::InError {
            state.pending_search_path_reset = true;
            return None;
        }
        state.search_path_reset_sent();
        Some(format!("SET search_path={initial};"))
    }

    /// Send SQL straight to the connection, bypassing hooks and rewriting.
    async fn raw_batch(&self, sql: &str) -> TriggerResult<()> {
        tracing::trace!(target: "pgtrigger.runtime", sql, "runtime statement");
        self.client.batch_execute(sql).await
    }

    /// Send runtime statements (resets, a preamble) on their own.
    pub(super) async fn send_runtime_sql(&self, sql: &str) -> TriggerResult<()> {
        let result = self.raw_batch(sql).await;
        if result.is_err() {
            self.track("", false);
        }
        self.settle_resets(result.is_ok());
        result
    }

    /// Outside a transaction a statement commits or rolls back on its own.
    fn settle_resets(&self, ok: bool) {
        let mut state = self.lock();
        if state.status != TransactionStatus::Idle {
            return;
        }
        if ok {
            state.resets_committed();
        } else {
            state.resets_rolled_back();
        }
    }

    /// Statements owed before `statement`, given the current scopes.
    ///
    /// `local` selects `SET LOCAL`; it is true for simple-protocol batches,
    /// which run in a transaction of their own, and inside transactions.
    fn preamble(&self, statement: &str, batch: bool) -> Option<String> {
        let mut state = self.lock();
        if state.status == TransactionStatus::InError || is_concurrent_statement(statement) {
            return None;
        }

        let in_tx = state.status == TransactionStatus::InTransaction;
        let local = batch || in_tx;
        let mut sql = String::new();

        if state.pending_ignore_reset {
            sql.push_str("RESET pgtrigger.ignore;");
            state.ignore_reset_sent();
        }
        if state.pending_search_path_reset {
            if let Some(initial) = &state.initial_search_path {
                sql.push_str(&format!("SET search_path={initial};"));
            }
            state.search_path_reset_sent();
        }
        if state.ignore_sessions > 0 {
            sql.push_str(&self.runtime.ignore_sql(local));
            if !local {
                state.ignore_dirty = true;
                state.ignore_reset_uncommitted = false;
            }
        }
        if state.schema_sessions > 0 {
            if let Some(path) = self.runtime.search_path_sql(local) {
                sql.push_str(&path);
                if !local {
                    state.search_path_dirty = true;
                    state.search_path_reset_uncommitted = false;
                }
            }
        }

        (!sql.is_empty()).then_some(sql)
    }

    /// Batch with the preamble prepended, or placed after an opening
    /// BEGIN / SAVEPOINT so it lands inside that transaction.
    fn rewrite_batch(&self, sql: &str) -> Option<String> {
        let first = split_statements(sql).into_iter().next().unwrap_or("");
        match TxControl::detect(first) {
            None => self
                .preamble(sql, true)
                .map(|preamble| format!("{preamble}{sql}")),
            Some(TxControl::Begin | TxControl::Savepoint) => {
                let (head, rest) = split_first_statement(sql)?;
                if TxControl::detect(rest).is_some() {
                    return None;
                }
                self.preamble(rest, true)
                    .map(|preamble| format!("{head}{preamble}{rest}"))
            }
            Some(_) => None,
        }
    }

    /// Update the tracked transaction status after `sql` ran.
    fn track(&self, sql: &str, ok: bool) {
        let statements = split_statements(sql);
        let controls: Vec<TxControl> = statements
            .iter()
            .filter_map(|s| TxControl::detect(s))
            .collect();

        let mut state = self.lock();
        let before = state.status;

        if ok {
            for control in controls {
                match control {
                    TxControl::Begin => state.status = TransactionStatus::InTransaction,
                    // COMMIT of a failed transaction rolls it back.
                    TxControl::Commit if state.status == TransactionStatus::InError => {
                        state.resets_rolled_back();
                        state.status = TransactionStatus::Idle;
                    }
                    TxControl::Commit => {
                        state.resets_committed();
                        state.status = TransactionStatus::Idle;
                    }
                    TxControl::Rollback => {
                        state.resets_rolled_back();
                        state.status = TransactionStatus::Idle;
                    }
                    TxControl::RollbackTo => {
                        state.resets_rolled_back();
                        state.status = TransactionStatus::InTransaction;
                    }
                    TxControl::Savepoint | TxControl::Release => {}
                }
            }
            return;
        }

        let ends_transaction = statements.len() == 1
            && matches!(controls.first(), Some(TxControl::Commit | TxControl::Rollback));
        if ends_transaction {
            state.resets_rolled_back();
        }
        state.status = if ends_transaction {
            TransactionStatus::Idle
        } else if before != TransactionStatus::Idle || controls.contains(&TxControl::Begin) {
            TransactionStatus::InError
        } else {
            TransactionStatus::Idle
        };
    }

    fn apply_hook(&self, ctx: &mut QueryContext) -> TriggerResult<()> {
        let Some(hook) = &self.hook else {
            return Ok(());
        };

        match hook.before_query(ctx) {
            HookAction::Continue => Ok(()),
            HookAction::ModifySql {
                exec_sql,
                canonical_sql,
            } => {
                ctx.exec_sql = exec_sql;
                if let Some(canonical_sql) = canonical_sql {
                    ctx.canonical_sql = canonical_sql;
                }
                ctx.query_type = QueryType::from_sql(&ctx.canonical_sql);
                Ok(())
            }
            HookAction::Abort(reason) => Err(TriggerError::usage(format!(
                "Statement aborted by hook: {reason}"
            ))),
        }
    }

    fn context(&self, sql: &str, param_count: usize) -> QueryContext {
        let mut ctx = QueryContext::new(sql, param_count);
        if let Some(tag) = &self.tag {
            ctx = ctx.with_tag(tag.clone());
        }
        let (ignoring, scoping) = {
            let state = self.lock();
            (state.ignore_sessions > 0, state.schema_sessions > 0)
        };
        if ignoring {
            ctx = ctx.with_field("ignored", self.runtime.ignored().join(","));
        }
        if scoping {
            ctx = ctx.with_field("schemas", self.runtime.schemas().join(","));
        }
        ctx
    }

    fn report(&self, ctx: &QueryContext, started: Instant, result: &QueryResult) {
        if let Some(hook) = &self.hook {
            hook.after_query(ctx, started.elapsed(), result);
        }
    }

    /// Send the preamble ahead of a parameterised statement.
    async fn send_preamble(&self, ctx: &QueryContext) -> TriggerResult<()> {
        if TxControl::detect(&ctx.exec_sql).is_some() {
            return Ok(());
        }
        match self.preamble(&ctx.exec_sql, false) {
            Some(preamble) => self.send_runtime_sql(&preamble).await,
            None => Ok(()),
        }
    }

    async fn query_inner(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> TriggerResult<Vec<Row>> {
        let mut ctx = self.context(sql, params.len());
        self.apply_hook(&mut ctx)?;
        self.send_preamble(&ctx).await?;

        let started = Instant::now();
        let result = self.client.query(&ctx.exec_sql, params).await;
        self.track(&ctx.exec_sql, result.is_ok());
        let outcome = match &result {
            Ok(rows) => QueryResult::Rows(rows.len()),
            Err(e) => QueryResult::error(e.to_string()),
        };
        self.report(&ctx, started, &outcome);
        result
    }

    async fn execute_inner(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> TriggerResult<u64> {
        let mut ctx = self.context(sql, params.len());
        self.apply_hook(&mut ctx)?;
        self.send_preamble(&ctx).await?;

        let started = Instant::now();
        let result = self.client.execute(&ctx.exec_sql, params).await;
        self.track(&ctx.exec_sql, result.is_ok());
        let outcome = match &result {
            Ok(n) => QueryResult::Affected(*n),
            Err(e) => QueryResult::error(e.to_string()),
        };
        self.report(&ctx, started, &outcome);
        result
    }

    async fn batch_inner(&self, sql: &str) -> TriggerResult<()> {
        let mut ctx = self.context(sql, 0);
        self.apply_hook(&mut ctx)?;
        let exec_sql = match self.rewrite_batch(&ctx.exec_sql) {
            Some(rewritten) => {
                tracing::trace!(target: "pgtrigger.runtime", sql = %rewritten, "rewriting batch");
                rewritten
            }
            None => ctx.exec_sql.clone(),
        };

        let started = Instant::now();
        let result = self.client.batch_execute(&exec_sql).await;
        self.track(&ctx.exec_sql, result.is_ok());
        self.settle_resets(result.is_ok());
        let outcome = match &result {
            Ok(()) => QueryResult::Batch,
            Err(e) => QueryResult::error(e.to_string()),
        };
        self.report(&ctx, started, &outcome);
        result
    }
}

/// Ids to ignore for `uris`.
///
/// With no URIs every ignorable trigger is taken; naming a trigger that
/// cannot be ignored is an error.
fn ignorable_pgids<S: AsRef<str>>(registry: &Registry, uris: &[S]) -> TriggerResult<Vec<String>> {
    if uris.is_empty() {
        return Ok(registry
            .iter()
            .filter(|e| e.trigger.can_ignore())
            .map(|e| e.pgid.clone())
            .collect());
    }
    let targets = registry.resolve(uris)?;
    if let Some(entry) = targets.iter().find(|e| !e.trigger.can_ignore()) {
        return Err(TriggerError::usage(format!(
            "Cannot ignore {} triggers ({})",
            entry.trigger.kind().name(),
            entry.uri
        )));
    }
    Ok(targets.into_iter().map(|e| e.pgid.clone()).collect())
}

impl<C: GenericClient> GenericClient for TriggerClient<C> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<Vec<Row>> {
        self.query_inner(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> TriggerResult<u64> {
        self.execute_inner(sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> TriggerResult<()> {
        self.batch_inner(sql).await
    }

    fn in_transaction(&self) -> bool {
        self.status() != TransactionStatus::Idle
    }
}
