use crate::sql::{TxControl, starts_with_keyword, strip_sql_prefix};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Kind of statement being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    /// CREATE / ALTER / DROP / COMMENT
    Ddl,
    /// BEGIN / COMMIT / ROLLBACK / SAVEPOINT
    Transaction,
    Other,
}

impl QueryType {
    /// Detect the statement kind from its leading keyword.
    ///
    /// For CTEs (`WITH ...`) the keyword after the last top-level
    /// parenthesised definition decides.
    pub fn from_sql(sql: &str) -> Self {
        let trimmed = strip_sql_prefix(sql);
        if TxControl::detect(trimmed).is_some() {
            return QueryType::Transaction;
        }
        Self::from_keyword(trimmed).unwrap_or_else(|| {
            if starts_with_keyword(trimmed, "WITH") {
                Self::detect_cte_dml(trimmed)
            } else {
                QueryType::Other
            }
        })
    }

    fn from_keyword(s: &str) -> Option<Self> {
        const KEYWORDS: &[(&str, QueryType)] = &[
            ("SELECT", QueryType::Select),
            ("INSERT", QueryType::Insert),
            ("UPDATE", QueryType::Update),
            ("DELETE", QueryType::Delete),
            ("CREATE", QueryType::Ddl),
            ("ALTER", QueryType::Ddl),
            ("DROP", QueryType::Ddl),
            ("COMMENT", QueryType::Ddl),
        ];
        KEYWORDS
            .iter()
            .find(|(kw, _)| starts_with_keyword(s, kw))
            .map(|(_, ty)| *ty)
    }

    fn detect_cte_dml(sql: &str) -> Self {
        let mut depth: i32 = 0;
        let mut last_top_level = 0;
        let bytes = sql.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        last_top_level = i + 1;
                    }
                }
                b'\'' => {
                    i += 1;
                    while i < bytes.len() {
                        if bytes[i] == b'\'' {
                            if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                                i += 1;
                            } else {
                                break;
                            }
                        }
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        match Self::from_keyword(sql[last_top_level..].trim_start()) {
            Some(ty @ (QueryType::Insert | QueryType::Update | QueryType::Delete)) => ty,
            _ => QueryType::Select,
        }
    }
}

/// What a hook sees about the statement being executed.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// SQL as written by the caller.
    pub canonical_sql: String,
    /// SQL actually sent, after hooks rewrote it.
    pub exec_sql: String,
    pub param_count: usize,
    pub query_type: QueryType,
    pub tag: Option<String>,
    /// Low-cardinality structured fields for observability.
    pub fields: BTreeMap<String, String>,
}

impl QueryContext {
    pub fn new(sql: &str, param_count: usize) -> Self {
        Self {
            canonical_sql: sql.to_string(),
            exec_sql: sql.to_string(),
            param_count,
            query_type: QueryType::from_sql(sql),
            tag: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

const MAX_ERROR_LEN: usize = 512;

/// Outcome handed to [`QueryHook::after_query`].
#[derive(Debug, Clone)]
pub enum QueryResult {
    Rows(usize),
    Affected(u64),
    /// A simple-protocol batch finished.
    Batch,
    /// Truncated to 512 bytes.
    Error(String),
}

impl QueryResult {
    pub fn error(msg: String) -> Self {
        if msg.len() > MAX_ERROR_LEN {
            Self::Error(format!(
                "{}...",
                super::truncate_sql_bytes(&msg, MAX_ERROR_LEN)
            ))
        } else {
            Self::Error(msg)
        }
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Rows(n) => write!(f, "{n} rows"),
            QueryResult::Affected(n) => write!(f, "{n} affected"),
            QueryResult::Batch => f.write_str("ok"),
            QueryResult::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Action to take after a hook inspected a statement.
#[derive(Debug, Clone)]
pub enum HookAction {
    Continue,
    ModifySql {
        exec_sql: String,
        /// Optional override for the canonical SQL.
        canonical_sql: Option<String>,
    },
    /// Fail the statement with a usage error.
    Abort(String),
}

/// Inspect, rewrite or abort statements before they run.
pub trait QueryHook: Send + Sync {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        let _ = ctx;
        HookAction::Continue
    }

    fn after_query(&self, _ctx: &QueryContext, _duration: Duration, _result: &QueryResult) {}
}
