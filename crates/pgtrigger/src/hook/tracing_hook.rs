use super::truncate_sql_bytes;
use super::types::{HookAction, QueryContext, QueryHook, QueryResult};
use std::time::Duration;
use tracing::Level;

/// Emits every statement through `tracing` (target `pgtrigger.sql`).
///
/// The event fires before the statement runs, so the logged SQL is the
/// caller's statement without the runtime preamble. The preamble itself is
/// traced by the client at `TRACE`.
#[derive(Debug, Clone)]
pub struct TracingSqlHook {
    pub level: Level,
    /// Truncate long SQL (in bytes). `None` disables truncation.
    pub max_sql_length: Option<usize>,
    /// Also emit an event when the statement finishes.
    pub log_results: bool,
}

impl Default for TracingSqlHook {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            max_sql_length: Some(200),
            log_results: false,
        }
    }
}

/// Dispatch a tracing event at a runtime-determined level.
macro_rules! emit_at_level {
    ($level:expr, $($field:tt)*) => {
        match $level {
            Level::ERROR => tracing::error!($($field)*),
            Level::WARN => tracing::warn!($($field)*),
            Level::INFO => tracing::info!($($field)*),
            Level::DEBUG => tracing::debug!($($field)*),
            Level::TRACE => tracing::trace!($($field)*),
        }
    };
}

impl TracingSqlHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    pub fn log_results(mut self) -> Self {
        self.log_results = true;
        self
    }

    fn truncate_sql(&self, sql: &str) -> String {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }
}

impl QueryHook for TracingSqlHook {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        let sql = self.truncate_sql(&ctx.exec_sql);
        let tag = ctx.tag.as_deref().unwrap_or("-");
        let fields = tracing::field::debug(&ctx.fields);
        emit_at_level!(
            self.level,
            target: "pgtrigger.sql",
            query_type = ?ctx.query_type,
            tag,
            param_count = ctx.param_count,
            sql = %sql,
            fields = fields,
        );
        HookAction::Continue
    }

    fn after_query(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        if !self.log_results {
            return;
        }
        let tag = ctx.tag.as_deref().unwrap_or("-");
        emit_at_level!(
            self.level,
            target: "pgtrigger.sql",
            query_type = ?ctx.query_type,
            tag,
            elapsed_ms = duration.as_millis() as u64,
            result = %result,
        );
    }
}
