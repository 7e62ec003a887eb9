//! Lightweight SQL sniffing used by the statement rewriter.
//!
//! Nothing here parses SQL. The helpers only need to find statement
//! boundaries and leading keywords, skipping quoted text, dollar-quoted
//! function bodies and comments.

/// Skip leading whitespace, comments and opening parentheses.
pub(crate) fn strip_sql_prefix(sql: &str) -> &str {
    let mut s = sql;
    loop {
        let before = s;
        s = s.trim_start();
        if s.starts_with("--") {
            match s.find('\n') {
                Some(pos) => {
                    s = &s[pos + 1..];
                    continue;
                }
                None => return "",
            }
        }
        if s.starts_with("/*") {
            match s.find("*/") {
                Some(pos) => {
                    s = &s[pos + 2..];
                    continue;
                }
                None => return "",
            }
        }
        if let Some(rest) = s.strip_prefix('(') {
            s = rest;
            continue;
        }
        if s == before {
            break;
        }
    }
    s
}

/// Case-insensitive keyword match that requires a word boundary after it.
pub(crate) fn starts_with_keyword(s: &str, keyword: &str) -> bool {
    match s.get(0..keyword.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(keyword) => s[keyword.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_')),
        _ => false,
    }
}

/// `CREATE ... CONCURRENTLY` cannot run inside a transaction block, so
/// nothing may be prepended to it.
pub(crate) fn is_concurrent_statement(sql: &str) -> bool {
    let sql = sql.trim().to_ascii_lowercase();
    sql.starts_with("create") && sql.contains("concurrently")
}

/// Split a simple-protocol batch into its statements.
pub(crate) fn split_statements(sql: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for end in terminators(sql) {
        let stmt = sql[start..end].trim();
        if !stmt.is_empty() {
            out.push(stmt);
        }
        start = end + 1;
    }
    let tail = sql.get(start..).unwrap_or("").trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Split after the `;` that ends the first statement, when more follows.
pub(crate) fn split_first_statement(sql: &str) -> Option<(&str, &str)> {
    let mut start = 0;
    for end in terminators(sql) {
        if !sql[start..end].trim().is_empty() {
            let (head, rest) = sql.split_at(end + 1);
            return (!rest.trim().is_empty()).then_some((head, rest));
        }
        start = end + 1;
    }
    None
}

/// Byte offsets of the top-level `;` terminators.
fn terminators(sql: &str) -> Vec<usize> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                if let Some(tag_len) = dollar_tag_len(&bytes[i..]) {
                    let tag = &sql[i..i + tag_len];
                    let body = i + tag_len;
                    match sql[body..].find(tag) {
                        Some(end) => i = body + end + tag_len - 1,
                        None => i = bytes.len(),
                    }
                }
            }
            b';' => out.push(i),
            _ => {}
        }
        i += 1;
    }
    out
}

/// Length of a `$tag$` opener at the start of `bytes`, if there is one.
fn dollar_tag_len(bytes: &[u8]) -> Option<usize> {
    let mut j = 1;
    while j < bytes.len() {
        match bytes[j] {
            b'$' => return Some(j + 1),
            c if c.is_ascii_alphanumeric() || c == b'_' => j += 1,
            _ => return None,
        }
    }
    None
}

/// Transaction-control statements the client tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxControl {
    Begin,
    Commit,
    Rollback,
    Savepoint,
    RollbackTo,
    Release,
}

impl TxControl {
    pub(crate) fn detect(statement: &str) -> Option<Self> {
        let s = strip_sql_prefix(statement);
        if starts_with_keyword(s, "BEGIN") || starts_with_keyword(s, "START") {
            Some(Self::Begin)
        } else if starts_with_keyword(s, "COMMIT") || starts_with_keyword(s, "END") {
            Some(Self::Commit)
        } else if starts_with_keyword(s, "ROLLBACK") || starts_with_keyword(s, "ABORT") {
            let rest = s.get(s.find(char::is_whitespace).unwrap_or(s.len())..).unwrap_or("");
            let rest = rest.trim_start();
            let rest = if starts_with_keyword(rest, "WORK") || starts_with_keyword(rest, "TRANSACTION") {
                rest.split_once(char::is_whitespace).map_or("", |(_, r)| r.trim_start())
            } else {
                rest
            };
            if starts_with_keyword(rest, "TO") {
                Some(Self::RollbackTo)
            } else {
                Some(Self::Rollback)
            }
        } else if starts_with_keyword(s, "SAVEPOINT") {
            Some(Self::Savepoint)
        } else if starts_with_keyword(s, "RELEASE") {
            Some(Self::Release)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_needs_boundary() {
        assert!(starts_with_keyword("begin;", "BEGIN"));
        assert!(starts_with_keyword("END", "END"));
        assert!(!starts_with_keyword("ENDPOINT", "END"));
    }

    #[test]
    fn split_skips_dollar_bodies_and_quotes() {
        let sql = "CREATE FUNCTION f() RETURNS int AS $$ BEGIN RETURN 1; END; $$ LANGUAGE plpgsql;\
                   SELECT ';'; -- trailing ; comment\nSELECT 2";
        let parts = split_statements(sql);
        assert_eq!(parts.len(), 3);
        assert!(parts[0].ends_with("plpgsql"));
        assert_eq!(parts[1], "SELECT ';'");
        assert!(parts[2].ends_with("SELECT 2"));
    }

    #[test]
    fn tagged_dollar_quotes() {
        let parts = split_statements("DO $body$ BEGIN PERFORM 1; END $body$; SELECT 1");
        assert_eq!(parts, vec!["DO $body$ BEGIN PERFORM 1; END $body$", "SELECT 1"]);
    }

    #[test]
    fn first_statement_split() {
        assert_eq!(
            split_first_statement("BEGIN; DELETE FROM t; COMMIT"),
            Some(("BEGIN;", " DELETE FROM t; COMMIT"))
        );
        assert_eq!(
            split_first_statement(";; SAVEPOINT \"a;b\"; SELECT 1"),
            Some((";; SAVEPOINT \"a;b\";", " SELECT 1"))
        );
        assert_eq!(split_first_statement("BEGIN;"), None);
        assert_eq!(split_first_statement("BEGIN"), None);
    }

    #[test]
    fn positional_params_are_not_dollar_quotes() {
        let parts = split_statements("UPDATE t SET a = $1 WHERE b = $2; SELECT 1");
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn transaction_control() {
        assert_eq!(TxControl::detect("BEGIN"), Some(TxControl::Begin));
        assert_eq!(TxControl::detect("start transaction"), Some(TxControl::Begin));
        assert_eq!(TxControl::detect("COMMIT"), Some(TxControl::Commit));
        assert_eq!(TxControl::detect("ROLLBACK"), Some(TxControl::Rollback));
        assert_eq!(TxControl::detect("ROLLBACK TO SAVEPOINT sp"), Some(TxControl::RollbackTo));
        assert_eq!(TxControl::detect("rollback work to sp"), Some(TxControl::RollbackTo));
        assert_eq!(TxControl::detect("SAVEPOINT sp"), Some(TxControl::Savepoint));
        assert_eq!(TxControl::detect("SELECT 1"), None);
    }

    #[test]
    fn concurrent_statements() {
        assert!(is_concurrent_statement("  CREATE INDEX CONCURRENTLY i ON t (a)"));
        assert!(!is_concurrent_statement("SELECT 'concurrently'"));
    }
}
