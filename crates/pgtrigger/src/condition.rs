//! Trigger conditions: declarative predicates over the `OLD` and `NEW` rows.
//!
//! A [`Condition`] compiles into the SQL placed after `WHEN (...)` in a
//! `CREATE TRIGGER` statement. Field references are resolved against an
//! [`EntityMeta`](crate::EntityMeta) and literal values are quoted by the
//! compiler, never interpolated raw.
//!
//! # Example
//! ```ignore
//! use pgtrigger::{Condition, F};
//!
//! // Fire only when the status changes to "published"
//! let cond = Condition::q("old__status__df", F::new("new__status"))
//!     & Condition::q("new__status", "published");
//!
//! // Fire when anything other than bookkeeping columns changes
//! let cond = Condition::from(pgtrigger::Change::any().exclude_auto());
//! ```

use crate::entity::EntityMeta;
use crate::error::{TriggerError, TriggerResult};
use crate::ident::{quote_ident, quote_literal};
use std::ops::{BitAnd, BitOr, Not};

/// Which row a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAlias {
    Old,
    New,
}

impl RowAlias {
    pub fn as_sql(self) -> &'static str {
        match self {
            RowAlias::Old => "OLD",
            RowAlias::New => "NEW",
        }
    }
}

/// Split `old__rest` / `new__rest` into its alias and remainder.
fn split_alias(reference: &str) -> TriggerResult<(RowAlias, &str)> {
    if let Some(rest) = reference.strip_prefix("old__") {
        Ok((RowAlias::Old, rest))
    } else if let Some(rest) = reference.strip_prefix("new__") {
        Ok((RowAlias::New, rest))
    } else {
        Err(TriggerError::InvalidReference(reference.to_string()))
    }
}

/// A reference to a field of the old or new row, e.g. `F::new("new__status")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct F(String);

impl F {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    fn resolve(&self, entity: &EntityMeta) -> TriggerResult<String> {
        let (alias, field) = split_alias(&self.0)?;
        column_ref(entity, alias, field)
    }
}

fn column_ref(entity: &EntityMeta, alias: RowAlias, field: &str) -> TriggerResult<String> {
    let column = entity
        .column_of(field)
        .ok_or_else(|| TriggerError::unknown_field(&entity.label, field))?;
    Ok(format!("{}.{}", alias.as_sql(), quote_ident(column)))
}

/// A literal compared against a row field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Render as a SQL literal.
    pub fn to_sql(&self) -> TriggerResult<String> {
        match self {
            Value::Null => Ok("NULL".to_string()),
            Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) if f.is_finite() => Ok(f.to_string()),
            Value::Float(f) => Err(TriggerError::definition(format!(
                "Cannot use non-finite number {f} in a trigger condition"
            ))),
            Value::Text(s) => quote_literal(s),
        }
    }
}

macro_rules! impl_value_from {
    ($($t:ty => $variant:ident($conv:expr)),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant($conv(v))
                }
            }

            impl From<$t> for Operand {
                fn from(v: $t) -> Self {
                    Operand::Value(Value::from(v))
                }
            }
        )*
    };
}

impl_value_from!(
    i8 => Int(i64::from),
    i16 => Int(i64::from),
    i32 => Int(i64::from),
    i64 => Int(i64::from),
    u8 => Int(i64::from),
    u16 => Int(i64::from),
    u32 => Int(i64::from),
    bool => Bool(bool::from),
    f32 => Float(f64::from),
    f64 => Float(f64::from),
    &str => Text(str::to_string),
    String => Text(String::from),
);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Right-hand side of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Values(Vec<Value>),
    Field(F),
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Operand {
    fn from(v: Option<T>) -> Self {
        Operand::Value(v.into())
    }
}

impl From<F> for Operand {
    fn from(f: F) -> Self {
        Operand::Field(f)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Operand {
    fn from(values: Vec<T>) -> Self {
        Operand::Values(values.into_iter().map(Into::into).collect())
    }
}

/// Lookup suffix on a `Q` key (`old__price__gt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Exact,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
    Contains,
    IContains,
    StartsWith,
    EndsWith,
    Df,
    Ndf,
}

impl LookupKind {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "exact" => Self::Exact,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "in" => Self::In,
            "isnull" => Self::IsNull,
            "contains" => Self::Contains,
            "icontains" => Self::IContains,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            "df" => Self::Df,
            "ndf" => Self::Ndf,
            _ => return None,
        })
    }
}

/// One comparison leaf, e.g. `old__status__df = F("new__status")`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub key: String,
    pub rhs: Operand,
}

impl Lookup {
    fn resolve(&self, entity: &EntityMeta) -> TriggerResult<String> {
        let (alias, rest) = split_alias(&self.key)?;
        let (field, kind) = match rest.rsplit_once("__") {
            Some((field, suffix)) => match LookupKind::parse(suffix) {
                Some(kind) => (field, kind),
                None => (rest, LookupKind::Exact),
            },
            None => (rest, LookupKind::Exact),
        };
        if field.contains("__") {
            return Err(TriggerError::unknown_field(&entity.label, field));
        }
        let lhs = column_ref(entity, alias, field)?;

        match (kind, &self.rhs) {
            (LookupKind::Exact, Operand::Value(Value::Null)) => Ok(format!("{lhs} IS NULL")),
            (LookupKind::IsNull, Operand::Value(Value::Bool(true))) => {
                Ok(format!("{lhs} IS NULL"))
            }
            (LookupKind::IsNull, Operand::Value(Value::Bool(false))) => {
                Ok(format!("{lhs} IS NOT NULL"))
            }
            (LookupKind::IsNull, _) => Err(TriggerError::definition(format!(
                "\"{}\" expects a boolean",
                self.key
            ))),
            (LookupKind::In, Operand::Values(values)) => {
                if values.is_empty() {
                    return Err(TriggerError::definition(format!(
                        "\"{}\" needs at least one value",
                        self.key
                    )));
                }
                let items = values
                    .iter()
                    .map(Value::to_sql)
                    .collect::<TriggerResult<Vec<_>>>()?;
                Ok(format!("{lhs} IN ({})", items.join(", ")))
            }
            (LookupKind::In, _) => Err(TriggerError::definition(format!(
                "\"{}\" expects a list of values",
                self.key
            ))),
            (
                LookupKind::Contains
                | LookupKind::IContains
                | LookupKind::StartsWith
                | LookupKind::EndsWith,
                Operand::Value(Value::Text(text)),
            ) => {
                let escaped = text
                    .replace('\\', "\\\\")
                    .replace('%', "\\%")
                    .replace('_', "\\_");
                let pattern = match kind {
                    LookupKind::StartsWith => format!("{escaped}%"),
                    LookupKind::EndsWith => format!("%{escaped}"),
                    _ => format!("%{escaped}%"),
                };
                let pattern = quote_literal(&pattern)?;
                if kind == LookupKind::IContains {
                    Ok(format!("UPPER({lhs}::text) LIKE UPPER({pattern})"))
                } else {
                    Ok(format!("{lhs}::text LIKE {pattern}"))
                }
            }
            (
                LookupKind::Contains
                | LookupKind::IContains
                | LookupKind::StartsWith
                | LookupKind::EndsWith,
                _,
            ) => Err(TriggerError::definition(format!(
                "\"{}\" expects a string",
                self.key
            ))),
            (kind, rhs) => {
                let rhs = match rhs {
                    Operand::Field(f) => f.resolve(entity)?,
                    Operand::Value(v) => v.to_sql()?,
                    Operand::Values(_) => {
                        return Err(TriggerError::definition(format!(
                            "\"{}\" does not accept a list",
                            self.key
                        )));
                    }
                };
                let op = match kind {
                    LookupKind::Gt => ">",
                    LookupKind::Gte => ">=",
                    LookupKind::Lt => "<",
                    LookupKind::Lte => "<=",
                    LookupKind::Df => "IS DISTINCT FROM",
                    LookupKind::Ndf => "IS NOT DISTINCT FROM",
                    _ => "=",
                };
                Ok(format!("{lhs} {op} {rhs}"))
            }
        }
    }
}

/// Which change predicate a [`Change`] expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// At least one field is distinct.
    AnyChange,
    /// Every field is distinct.
    AllChange,
    /// At least one field is not distinct.
    AnyDontChange,
    /// No field is distinct.
    AllDontChange,
}

/// Field-set sugar over pairwise `OLD.f` vs `NEW.f` comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub fields: Vec<String>,
    pub exclude: Vec<String>,
    pub exclude_auto: bool,
}

impl Change {
    pub fn new(kind: ChangeKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
            exclude: Vec::new(),
            exclude_auto: false,
        }
    }

    pub fn any() -> Self {
        Self::new(ChangeKind::AnyChange)
    }

    pub fn all() -> Self {
        Self::new(ChangeKind::AllChange)
    }

    pub fn any_dont() -> Self {
        Self::new(ChangeKind::AnyDontChange)
    }

    pub fn all_dont() -> Self {
        Self::new(ChangeKind::AllDontChange)
    }

    /// Restrict to these fields (default: every field of the entity).
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Drop auto-maintained fields before comparing.
    pub fn exclude_auto(mut self) -> Self {
        self.exclude_auto = true;
        self
    }

    /// Field names this predicate compares, in entity order.
    pub fn resolve_fields(&self, entity: &EntityMeta) -> TriggerResult<Vec<String>> {
        for name in self.fields.iter().chain(&self.exclude) {
            if entity.get_field(name).is_none() {
                return Err(TriggerError::unknown_field(&entity.label, name));
            }
        }
        let selected: Vec<String> = entity
            .fields
            .iter()
            .filter(|f| {
                self.fields.is_empty()
                    || self.fields.iter().any(|n| *n == f.name || *n == f.column)
            })
            .filter(|f| !self.exclude.iter().any(|n| *n == f.name || *n == f.column))
            .filter(|f| !(self.exclude_auto && f.auto))
            .map(|f| f.name.clone())
            .collect();
        if selected.is_empty() {
            return Err(TriggerError::definition(format!(
                "Change condition on {} selects no fields",
                entity.label
            )));
        }
        Ok(selected)
    }

    fn resolve(&self, entity: &EntityMeta) -> TriggerResult<String> {
        let fields = self.resolve_fields(entity)?;
        if self.kind == ChangeKind::AnyChange && fields.len() == entity.fields.len() {
            return Ok("OLD.* IS DISTINCT FROM NEW.*".to_string());
        }
        let (suffix, joiner) = match self.kind {
            ChangeKind::AnyChange => ("df", " OR "),
            ChangeKind::AllChange => ("df", " AND "),
            ChangeKind::AnyDontChange => ("ndf", " OR "),
            ChangeKind::AllDontChange => ("ndf", " AND "),
        };
        let parts = fields
            .iter()
            .map(|name| {
                Lookup {
                    key: format!("old__{name}__{suffix}"),
                    rhs: Operand::Field(F::new(format!("new__{name}"))),
                }
                .resolve(entity)
            })
            .collect::<TriggerResult<Vec<_>>>()?;
        Ok(wrap(parts, joiner))
    }
}

fn wrap(mut parts: Vec<String>, joiner: &str) -> String {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        format!("({})", parts.join(joiner))
    }
}

/// A trigger condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Free-form SQL, used verbatim.
    Sql(String),
    Lookup(Lookup),
    Change(Change),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Free-form SQL condition.
    pub fn sql(sql: impl Into<String>) -> Self {
        Condition::Sql(sql.into())
    }

    /// A lookup leaf: `key` is `{old|new}__{field}[__{lookup}]`.
    pub fn q(key: impl Into<String>, rhs: impl Into<Operand>) -> Self {
        Condition::Lookup(Lookup {
            key: key.into(),
            rhs: rhs.into(),
        })
    }

    /// AND of all given conditions.
    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::And(conditions.into_iter().collect())
    }

    /// OR of all given conditions.
    pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Or(conditions.into_iter().collect())
    }

    /// Compile into SQL for `entity`.
    pub fn resolve(&self, entity: &EntityMeta) -> TriggerResult<String> {
        match self {
            Condition::Sql(sql) if sql.trim().is_empty() => {
                Err(TriggerError::definition("Must provide SQL to condition"))
            }
            Condition::Sql(sql) => Ok(sql.clone()),
            Condition::Lookup(lookup) => lookup.resolve(entity),
            Condition::Change(change) => change.resolve(entity),
            Condition::And(children) | Condition::Or(children) => {
                if children.is_empty() {
                    return Err(TriggerError::definition("Empty condition group"));
                }
                let joiner = if matches!(self, Condition::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                let parts = children
                    .iter()
                    .map(|c| c.resolve(entity))
                    .collect::<TriggerResult<Vec<_>>>()?;
                Ok(wrap(parts, joiner))
            }
            Condition::Not(inner) => Ok(format!("NOT ({})", inner.resolve(entity)?)),
        }
    }
}

impl From<Change> for Condition {
    fn from(change: Change) -> Self {
        Condition::Change(change)
    }
}

impl BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Condition) -> Condition {
        match self {
            Condition::And(mut children) => {
                children.push(rhs);
                Condition::And(children)
            }
            lhs => Condition::And(vec![lhs, rhs]),
        }
    }
}

impl BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Condition) -> Condition {
        match self {
            Condition::Or(mut children) => {
                children.push(rhs);
                Condition::Or(children)
            }
            lhs => Condition::Or(vec![lhs, rhs]),
        }
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        Condition::Not(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FieldMeta;

    fn post() -> EntityMeta {
        EntityMeta::new("blog.Post", "blog_post")
            .field(FieldMeta::new("id"))
            .field(FieldMeta::new("status"))
            .field(FieldMeta::new("title"))
            .field(FieldMeta::foreign_key("author"))
            .field(FieldMeta::new("updated_at").auto())
    }

    #[test]
    fn distinct_from_leaf() {
        let sql = Condition::q("old__status__df", F::new("new__status"))
            .resolve(&post())
            .unwrap();
        assert_eq!(sql, r#"OLD."status" IS DISTINCT FROM NEW."status""#);

        let sql = Condition::q("old__status__ndf", F::new("new__status"))
            .resolve(&post())
            .unwrap();
        assert_eq!(sql, r#"OLD."status" IS NOT DISTINCT FROM NEW."status""#);
    }

    #[test]
    fn foreign_keys_compare_key_column() {
        let sql = Condition::q("old__author__df", F::new("new__author"))
            .resolve(&post())
            .unwrap();
        assert_eq!(sql, r#"OLD."author_id" IS DISTINCT FROM NEW."author_id""#);
    }

    #[test]
    fn literals_are_quoted() {
        let sql = Condition::q("new__title", "it's")
            .resolve(&post())
            .unwrap();
        assert_eq!(sql, r#"NEW."title" = 'it''s'"#);

        let sql = Condition::q("new__title", Value::Null)
            .resolve(&post())
            .unwrap();
        assert_eq!(sql, r#"NEW."title" IS NULL"#);

        let sql = Condition::q("new__status__in", vec!["a", "b"])
            .resolve(&post())
            .unwrap();
        assert_eq!(sql, r#"NEW."status" IN ('a', 'b')"#);
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        let sql = Condition::q("new__title__startswith", "50%")
            .resolve(&post())
            .unwrap();
        assert_eq!(sql, r#"NEW."title"::text LIKE E'50\\%%'"#);
    }

    #[test]
    fn composition_parenthesises() {
        let cond = (Condition::q("old__status", "draft") & Condition::q("new__status", "live"))
            | !Condition::q("new__id__gt", 10);
        let sql = cond.resolve(&post()).unwrap();
        assert_eq!(
            sql,
            r#"((OLD."status" = 'draft' AND NEW."status" = 'live') OR NOT (NEW."id" > 10))"#
        );
    }

    #[test]
    fn any_change_over_all_fields_collapses() {
        let sql = Condition::from(Change::any()).resolve(&post()).unwrap();
        assert_eq!(sql, "OLD.* IS DISTINCT FROM NEW.*");
    }

    #[test]
    fn any_change_excluding_auto_expands() {
        let sql = Condition::from(Change::any().exclude(["id"]).exclude_auto())
            .resolve(&post())
            .unwrap();
        assert_eq!(
            sql,
            concat!(
                r#"(OLD."status" IS DISTINCT FROM NEW."status" OR "#,
                r#"OLD."title" IS DISTINCT FROM NEW."title" OR "#,
                r#"OLD."author_id" IS DISTINCT FROM NEW."author_id")"#
            )
        );
    }

    #[test]
    fn all_dont_change_uses_ndf_and() {
        let sql = Condition::from(Change::all_dont().fields(["status", "title"]))
            .resolve(&post())
            .unwrap();
        assert_eq!(
            sql,
            r#"(OLD."status" IS NOT DISTINCT FROM NEW."status" AND OLD."title" IS NOT DISTINCT FROM NEW."title")"#
        );
    }

    #[test]
    fn all_dont_change_over_all_fields_does_not_collapse() {
        let sql = Condition::from(Change::all_dont()).resolve(&post()).unwrap();
        assert!(sql.starts_with(r#"(OLD."id" IS NOT DISTINCT FROM NEW."id" AND"#));
    }

    #[test]
    fn unknown_field_is_reported() {
        let err = Condition::q("old__nope", 1).resolve(&post()).unwrap_err();
        assert!(matches!(err, TriggerError::UnknownField { ref field, .. } if field == "nope"));

        let err = Condition::from(Change::any().fields(["nope"]))
            .resolve(&post())
            .unwrap_err();
        assert!(matches!(err, TriggerError::UnknownField { .. }));
    }

    #[test]
    fn references_need_row_prefix() {
        let err = Condition::q("status", 1).resolve(&post()).unwrap_err();
        assert!(matches!(err, TriggerError::InvalidReference(_)));

        let err = Condition::q("old__status", F::new("status"))
            .resolve(&post())
            .unwrap_err();
        assert!(matches!(err, TriggerError::InvalidReference(_)));
    }

    #[test]
    fn raw_sql_is_verbatim() {
        let sql = Condition::sql("OLD.x IS DISTINCT FROM NEW.x")
            .resolve(&post())
            .unwrap();
        assert_eq!(sql, "OLD.x IS DISTINCT FROM NEW.x");
        assert!(Condition::sql("  ").resolve(&post()).is_err());
    }
}
