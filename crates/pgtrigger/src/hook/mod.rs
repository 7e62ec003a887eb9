//! Statement hooks.
//!
//! A [`QueryHook`] sees every statement a [`TriggerClient`](crate::TriggerClient)
//! sends, before the runtime preamble is added, and may rewrite or abort it.
//!
//! ```ignore
//! use pgtrigger::hook::TracingSqlHook;
//!
//! let client = pgtrigger::TriggerClient::new(client).with_hook(TracingSqlHook::new());
//! ```

mod composite;
mod tracing_hook;
mod types;

pub use composite::CompositeHook;
pub use tracing_hook::TracingSqlHook;
pub use types::{HookAction, QueryContext, QueryHook, QueryResult, QueryType};

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Append(&'static str);

    impl QueryHook for Append {
        fn before_query(&self, ctx: &QueryContext) -> HookAction {
            HookAction::ModifySql {
                exec_sql: format!("{} {}", ctx.exec_sql, self.0),
                canonical_sql: None,
            }
        }
    }

    struct Deny;

    impl QueryHook for Deny {
        fn before_query(&self, ctx: &QueryContext) -> HookAction {
            if ctx.query_type == QueryType::Delete {
                HookAction::Abort("deletes are disabled".into())
            } else {
                HookAction::Continue
            }
        }
    }

    struct Counter(Arc<AtomicUsize>);

    impl QueryHook for Counter {
        fn after_query(&self, _ctx: &QueryContext, _d: std::time::Duration, _r: &QueryResult) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn query_type_detection() {
        assert_eq!(QueryType::from_sql("select 1"), QueryType::Select);
        assert_eq!(QueryType::from_sql("  -- c\nINSERT INTO t VALUES (1)"), QueryType::Insert);
        assert_eq!(
            QueryType::from_sql("WITH x AS (SELECT 1) DELETE FROM t"),
            QueryType::Delete
        );
        assert_eq!(QueryType::from_sql("CREATE TRIGGER t"), QueryType::Ddl);
        assert_eq!(QueryType::from_sql("BEGIN"), QueryType::Transaction);
        assert_eq!(QueryType::from_sql("SET LOCAL x = 1"), QueryType::Other);
    }

    #[test]
    fn composite_folds_rewrites() {
        let hook = CompositeHook::new().add(Append("a")).add(Append("b"));
        let ctx = QueryContext::new("SELECT 1", 0);
        match hook.before_query(&ctx) {
            HookAction::ModifySql { exec_sql, canonical_sql } => {
                assert_eq!(exec_sql, "SELECT 1 a b");
                assert!(canonical_sql.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn composite_short_circuits_abort() {
        let hook = CompositeHook::new().add(Deny).add(Append("never"));
        let ctx = QueryContext::new("DELETE FROM t", 0);
        assert!(matches!(hook.before_query(&ctx), HookAction::Abort(_)));
        let ctx = QueryContext::new("SELECT 1", 0);
        assert!(matches!(hook.before_query(&ctx), HookAction::ModifySql { .. }));
    }

    #[test]
    fn composite_fans_out_after_query() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = CompositeHook::new()
            .add(Counter(count.clone()))
            .add(Counter(count.clone()));
        let ctx = QueryContext::new("SELECT 1", 0);
        hook.after_query(&ctx, std::time::Duration::ZERO, &QueryResult::Rows(1));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_sql_bytes("héllo", 2), "h");
        assert_eq!(truncate_sql_bytes("abc", 10), "abc");
    }

    #[test]
    fn result_errors_are_truncated() {
        let QueryResult::Error(msg) = QueryResult::error("x".repeat(1000)) else {
            panic!("expected error");
        };
        assert_eq!(msg.len(), 515);
    }
}
