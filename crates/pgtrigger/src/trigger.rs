//! Trigger definitions.
//!
//! A [`Trigger`] is an immutable value describing one trigger: when it fires,
//! on which operations, under which condition, and what it runs. It is bound
//! to a table only when registered against an [`EntityMeta`].
//!
//! # Example
//! ```ignore
//! use pgtrigger::{Operation, Trigger, When};
//!
//! let protect = Trigger::protect("protect_deletes", Operation::Delete).build()?;
//!
//! let audit = Trigger::builder("audit_status")
//!     .when(When::After)
//!     .operation(Operation::Update)
//!     .condition(Condition::q("old__status__df", F::new("new__status")))
//!     .func("INSERT INTO audit(status) VALUES (NEW.status); RETURN NULL;")
//!     .build()?;
//! ```

use crate::compiler::{CompiledTrigger, InstallParams, InstallSql};
use crate::condition::{Change, Condition, Value};
use crate::config::Settings;
use crate::entity::EntityMeta;
use crate::error::{TriggerError, TriggerResult};
use crate::ident::{quote, quote_ident, quote_literal};
use crate::runtime::ignore_func_name;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::ops::BitOr;

/// Maximum length of a trigger name.
pub const MAX_NAME_LENGTH: usize = 47;

/// Postgres truncates identifiers longer than this.
pub const MAX_PGID_LENGTH: usize = 63;

/// Prefix of every database object managed by this crate.
pub const PGID_PREFIX: &str = "pgtrigger_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Row,
    Statement,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Row => "ROW",
            Level::Statement => "STATEMENT",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum When {
    Before,
    After,
    InsteadOf,
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            When::Before => "BEFORE",
            When::After => "AFTER",
            When::InsteadOf => "INSTEAD OF",
        })
    }
}

/// Deferral mode of a constraint trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timing {
    Immediate,
    Deferred,
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Timing::Immediate => "IMMEDIATE",
            Timing::Deferred => "DEFERRED",
        })
    }
}

/// Operations a trigger fires on. Combine with `|`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Truncate,
    /// `UPDATE OF col, ...`
    UpdateOf(Vec<String>),
    Or(Vec<Operation>),
}

impl Operation {
    pub fn update_of<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Operation::UpdateOf(columns.into_iter().map(Into::into).collect())
    }

    /// Render against `entity`, resolving `UPDATE OF` field names to their
    /// columns. Names that are not fields are taken as column names.
    pub fn render(&self, entity: &EntityMeta) -> String {
        match self {
            Operation::UpdateOf(columns) => {
                let cols: Vec<String> = columns
                    .iter()
                    .map(|c| quote(entity.column_of(c).unwrap_or(c)))
                    .collect();
                format!("UPDATE OF {}", cols.join(", "))
            }
            Operation::Or(ops) => ops
                .iter()
                .map(|op| op.render(entity))
                .collect::<Vec<_>>()
                .join(" OR "),
            op => op.to_string(),
        }
    }

    fn flatten(self) -> Vec<Operation> {
        match self {
            Operation::Or(ops) => ops,
            op => vec![op],
        }
    }
}

impl BitOr for Operation {
    type Output = Operation;

    fn bitor(self, rhs: Operation) -> Operation {
        let mut ops = self.flatten();
        ops.extend(rhs.flatten());
        Operation::Or(ops)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => f.write_str("INSERT"),
            Operation::Update => f.write_str("UPDATE"),
            Operation::Delete => f.write_str("DELETE"),
            Operation::Truncate => f.write_str("TRUNCATE"),
            Operation::UpdateOf(columns) => {
                let cols: Vec<String> = columns.iter().map(|c| quote(c)).collect();
                write!(f, "UPDATE OF {}", cols.join(", "))
            }
            Operation::Or(ops) => {
                for (i, op) in ops.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" OR ")?;
                    }
                    write!(f, "{op}")?;
                }
                Ok(())
            }
        }
    }
}

/// Transition tables for statement-level triggers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Referencing {
    pub old: Option<String>,
    pub new: Option<String>,
}

impl Referencing {
    pub fn new(old: Option<&str>, new: Option<&str>) -> TriggerResult<Self> {
        if old.is_none() && new.is_none() {
            return Err(TriggerError::definition(
                "Must provide either \"old\" and/or \"new\" to referencing",
            ));
        }
        Ok(Self {
            old: old.map(str::to_string),
            new: new.map(str::to_string),
        })
    }
}

impl fmt::Display for Referencing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("REFERENCING")?;
        if let Some(old) = &self.old {
            write!(f, " OLD TABLE AS {old}")?;
        }
        if let Some(new) = &self.new {
            write!(f, " NEW TABLE AS {new}")?;
        }
        Ok(())
    }
}

/// What a trigger does when it fires.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerKind {
    /// Free-form PL/pgSQL body.
    Custom { func: String },
    /// Raise an exception for the trigger's operations.
    Protect,
    /// Raise when any of the selected fields change.
    ReadOnly {
        fields: Vec<String>,
        exclude: Vec<String>,
    },
    /// Turn deletes into an update of `field` to `value`.
    SoftDelete { field: String, value: Value },
    /// Only allow the listed `(from, to)` transitions of `field`.
    Fsm {
        field: String,
        transitions: Vec<(String, String)>,
    },
    /// Maintain a tsvector column with the builtin `tsvector_update_trigger`.
    UpdateSearchVector {
        vector_field: String,
        document_fields: Vec<String>,
        config_name: String,
    },
}

impl TriggerKind {
    /// Short kind name used in messages.
    pub fn name(&self) -> &'static str {
        match self {
            TriggerKind::Custom { .. } => "Trigger",
            TriggerKind::Protect => "Protect",
            TriggerKind::ReadOnly { .. } => "ReadOnly",
            TriggerKind::SoftDelete { .. } => "SoftDelete",
            TriggerKind::Fsm { .. } => "FSM",
            TriggerKind::UpdateSearchVector { .. } => "UpdateSearchVector",
        }
    }

    /// Whether the runtime may suppress this trigger.
    pub fn can_ignore(&self) -> bool {
        !matches!(self, TriggerKind::UpdateSearchVector { .. })
    }

    /// `(variable, type)` pairs the function declares.
    pub fn render_declare(&self, declare: &[(String, String)]) -> Vec<(String, String)> {
        match self {
            TriggerKind::Fsm { .. } => vec![("_is_valid_transition".into(), "BOOLEAN".into())],
            _ => declare.to_vec(),
        }
    }

    /// Body placed between `BEGIN` and `END`.
    pub fn render_body(
        &self,
        entity: &EntityMeta,
        operation: &Operation,
    ) -> TriggerResult<String> {
        match self {
            TriggerKind::Custom { func } => Ok(func.clone()),
            TriggerKind::Protect | TriggerKind::ReadOnly { .. } => Ok(format!(
                "RAISE EXCEPTION 'pgtrigger: Cannot {} rows from % table', TG_TABLE_NAME;",
                operation.to_string().to_lowercase().replace('\'', "''")
            )),
            TriggerKind::SoftDelete { field, value } => {
                let column = column(entity, field)?;
                let pk = quote_ident(&entity.primary_key);
                Ok(format!(
                    "UPDATE {} SET {} = {} WHERE {pk} = OLD.{pk}; RETURN NULL;",
                    quote(&entity.table),
                    quote_ident(column),
                    value.to_sql()?,
                ))
            }
            TriggerKind::Fsm { field, transitions } => {
                let col = quote_ident(column(entity, field)?);
                let uris: Vec<String> = transitions
                    .iter()
                    .map(|(old, new)| format!("{old}:{new}"))
                    .collect();
                let uris = quote_literal(&format!("{{{}}}", uris.join(",")))?;
                Ok(format!(
                    "SELECT CONCAT(OLD.{col}, ':', NEW.{col}) = ANY({uris}::text[]) \
                     INTO _is_valid_transition; \
                     IF (_is_valid_transition IS FALSE AND OLD.{col} IS DISTINCT FROM NEW.{col}) THEN \
                     RAISE EXCEPTION 'pgtrigger: Invalid transition of field \"{}\" from \"%\" to \"%\" on table %', \
                     OLD.{col}, NEW.{col}, TG_TABLE_NAME; \
                     ELSE RETURN NEW; END IF;",
                    field.replace('\'', "''"),
                ))
            }
            TriggerKind::UpdateSearchVector { .. } => Ok(String::new()),
        }
    }

    /// Condition implied by the kind, if any.
    pub fn condition(&self) -> Option<Condition> {
        match self {
            TriggerKind::ReadOnly { fields, exclude } => Some(Condition::from(
                Change::any().fields(fields.clone()).exclude(exclude.clone()),
            )),
            _ => None,
        }
    }

    /// Procedure call after `EXECUTE PROCEDURE`.
    pub fn render_execute(&self, entity: &EntityMeta, pgid: &str) -> TriggerResult<String> {
        match self {
            TriggerKind::UpdateSearchVector {
                vector_field,
                document_fields,
                config_name,
            } => {
                let docs = document_fields
                    .iter()
                    .map(|f| column(entity, f).map(quote))
                    .collect::<TriggerResult<Vec<_>>>()?;
                Ok(format!(
                    "tsvector_update_trigger({}, {}, {})",
                    quote(column(entity, vector_field)?),
                    quote(config_name),
                    docs.join(", ")
                ))
            }
            _ => Ok(format!("{}()", pgid_sql(pgid))),
        }
    }
}

fn column<'a>(entity: &'a EntityMeta, field: &str) -> TriggerResult<&'a str> {
    entity
        .column_of(field)
        .ok_or_else(|| TriggerError::unknown_field(&entity.label, field))
}

/// Whether the first `(` of `sql` closes at its last character.
fn is_parenthesised(sql: &str) -> bool {
    if !sql.starts_with('(') || !sql.ends_with(')') {
        return false;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    for (i, ch) in sql.char_indices() {
        match ch {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == sql.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Render a pgid for SQL, quoting it only when it is not a plain identifier.
pub fn pgid_sql(pgid: &str) -> String {
    if pgid
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        pgid.to_string()
    } else {
        quote_ident(pgid)
    }
}

/// A declared trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    name: String,
    level: Level,
    when: When,
    operation: Operation,
    condition: Option<Condition>,
    referencing: Option<Referencing>,
    declare: Vec<(String, String)>,
    timing: Option<Timing>,
    kind: TriggerKind,
}

impl Trigger {
    /// Start a free-form trigger.
    pub fn builder(name: impl Into<String>) -> TriggerBuilder {
        TriggerBuilder::new(name)
    }

    /// Raise an exception whenever `operation` happens.
    pub fn protect(name: impl Into<String>, operation: Operation) -> TriggerBuilder {
        TriggerBuilder::new(name)
            .when(When::Before)
            .operation(operation)
            .kind(TriggerKind::Protect)
    }

    /// Reject updates touching `fields` (all fields when empty) or anything but `exclude`.
    pub fn read_only<I, S>(name: impl Into<String>, fields: I, exclude: I) -> TriggerBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TriggerBuilder::new(name)
            .when(When::Before)
            .operation(Operation::Update)
            .kind(TriggerKind::ReadOnly {
                fields: fields.into_iter().map(Into::into).collect(),
                exclude: exclude.into_iter().map(Into::into).collect(),
            })
    }

    /// Convert deletes into `UPDATE ... SET field = value`.
    pub fn soft_delete(
        name: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> TriggerBuilder {
        TriggerBuilder::new(name)
            .when(When::Before)
            .operation(Operation::Delete)
            .kind(TriggerKind::SoftDelete {
                field: field.into(),
                value: value.into(),
            })
    }

    /// Enforce a finite state machine on `field`.
    pub fn fsm<I, A, B>(
        name: impl Into<String>,
        field: impl Into<String>,
        transitions: I,
    ) -> TriggerBuilder
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        TriggerBuilder::new(name)
            .when(When::Before)
            .operation(Operation::Update)
            .kind(TriggerKind::Fsm {
                field: field.into(),
                transitions: transitions
                    .into_iter()
                    .map(|(a, b)| (a.into(), b.into()))
                    .collect(),
            })
    }

    /// Keep `vector_field` in sync with `document_fields`.
    pub fn update_search_vector<I, S>(
        name: impl Into<String>,
        vector_field: impl Into<String>,
        document_fields: I,
    ) -> TriggerBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let document_fields: Vec<String> = document_fields.into_iter().map(Into::into).collect();
        TriggerBuilder::new(name)
            .when(When::Before)
            .operation(Operation::Insert | Operation::UpdateOf(document_fields.clone()))
            .kind(TriggerKind::UpdateSearchVector {
                vector_field: vector_field.into(),
                document_fields,
                config_name: "pg_catalog.english".to_string(),
            })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn when(&self) -> When {
        self.when
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn timing(&self) -> Option<Timing> {
        self.timing
    }

    pub fn kind(&self) -> &TriggerKind {
        &self.kind
    }

    pub fn can_ignore(&self) -> bool {
        self.kind.can_ignore()
    }

    /// Builder pre-filled with this definition, for host-side edits before re-registration.
    pub fn to_builder(&self) -> TriggerBuilder {
        TriggerBuilder {
            name: self.name.clone(),
            level: self.level,
            when: Some(self.when),
            operation: Some(self.operation.clone()),
            condition: self.condition.clone(),
            referencing: self.referencing.clone(),
            declare: self.declare.clone(),
            timing: self.timing,
            kind: Some(self.kind.clone()),
        }
    }

    /// `{entity-label}:{trigger-name}`
    pub fn uri(&self, entity: &EntityMeta) -> String {
        format!("{}:{}", entity.label, self.name)
    }

    /// Database identifier of the trigger and its function.
    pub fn pgid(&self, entity: &EntityMeta) -> TriggerResult<String> {
        let digest = hex::encode(Sha1::digest(self.uri(entity).as_bytes()));
        let pgid = format!("{PGID_PREFIX}{}_{}", self.name, &digest[..5]);
        if pgid.len() > MAX_PGID_LENGTH {
            return Err(TriggerError::definition(format!(
                "Trigger identifier \"{pgid}\" is greater than {MAX_PGID_LENGTH} chars"
            )));
        }
        // Postgres folds identifiers to lowercase; catalog lookups rely on it.
        Ok(pgid.to_lowercase())
    }

    /// Rendered `WHEN (...)` clause, or empty.
    pub fn render_condition(&self, entity: &EntityMeta) -> TriggerResult<String> {
        let condition = match (&self.condition, self.kind.condition()) {
            (Some(explicit), Some(implied)) => Some(explicit.clone() & implied),
            (Some(explicit), None) => Some(explicit.clone()),
            (None, implied) => implied,
        };
        let Some(condition) = condition else {
            return Ok(String::new());
        };
        let resolved = condition.resolve(entity)?;
        let resolved = resolved.trim();
        if is_parenthesised(resolved) {
            Ok(format!("WHEN {resolved}"))
        } else {
            Ok(format!("WHEN ({resolved})"))
        }
    }

    /// Rendered `DECLARE` block, or empty.
    pub fn render_declare(&self) -> String {
        let declare = self.kind.render_declare(&self.declare);
        if declare.is_empty() {
            return String::new();
        }
        let vars: Vec<String> = declare
            .iter()
            .map(|(name, ty)| format!("{name} {ty};"))
            .collect();
        format!("DECLARE \n{}", vars.join("\n"))
    }

    /// Template parameters for the install SQL.
    pub fn install_params(
        &self,
        entity: &EntityMeta,
        settings: &Settings,
    ) -> TriggerResult<InstallParams> {
        let pgid = self.pgid(entity)?;
        let mut params = InstallParams::new(
            pgid.clone(),
            self.kind.render_body(entity, &self.operation)?,
            entity.table.clone(),
            self.when.to_string(),
            self.operation.render(entity),
        );
        params.ignore_func_name = Some(ignore_func_name(&settings.schema));
        params.declare = Some(self.render_declare());
        params.constraint = self.timing.map(|_| "CONSTRAINT".to_string());
        params.timing = self.timing.map(|t| format!("DEFERRABLE INITIALLY {t}"));
        params.referencing = self.referencing.as_ref().map(ToString::to_string);
        params.level = Some(self.level.to_string());
        params.condition = Some(self.render_condition(entity)?);
        params.execute = Some(self.kind.render_execute(entity, &pgid)?);
        Ok(params)
    }

    /// Compile against `entity` into installable SQL.
    pub fn compile(
        &self,
        entity: &EntityMeta,
        settings: &Settings,
    ) -> TriggerResult<CompiledTrigger> {
        let sql = InstallSql::new(self.install_params(entity, settings)?);
        Ok(CompiledTrigger::new(self.name.clone(), sql))
    }

    pub fn render_install(&self, entity: &EntityMeta, settings: &Settings) -> TriggerResult<String> {
        Ok(self.compile(entity, settings)?.install_sql())
    }

    pub fn render_uninstall(&self, entity: &EntityMeta) -> TriggerResult<String> {
        Ok(crate::compiler::DropTriggerSql::new(&self.pgid(entity)?, &entity.table).to_string())
    }

    /// Content hash stored in the trigger's comment.
    pub fn hash(&self, entity: &EntityMeta, settings: &Settings) -> TriggerResult<String> {
        Ok(self.compile(entity, settings)?.hash().to_string())
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Builder for [`Trigger`]; `build` validates the definition.
#[derive(Debug, Clone)]
pub struct TriggerBuilder {
    name: String,
    level: Level,
    when: Option<When>,
    operation: Option<Operation>,
    condition: Option<Condition>,
    referencing: Option<Referencing>,
    declare: Vec<(String, String)>,
    timing: Option<Timing>,
    kind: Option<TriggerKind>,
}

impl TriggerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: Level::Row,
            when: None,
            operation: None,
            condition: None,
            referencing: None,
            declare: Vec::new(),
            timing: None,
            kind: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn when(mut self, when: When) -> Self {
        self.when = Some(when);
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn condition(mut self, condition: impl Into<Condition>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn referencing(mut self, referencing: Referencing) -> Self {
        self.referencing = Some(referencing);
        self
    }

    pub fn declare(mut self, variable: impl Into<String>, ty: impl Into<String>) -> Self {
        self.declare.push((variable.into(), ty.into()));
        self
    }

    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn func(mut self, func: impl Into<String>) -> Self {
        self.kind = Some(TriggerKind::Custom { func: func.into() });
        self
    }

    pub fn kind(mut self, kind: TriggerKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Override the text search configuration of an `UpdateSearchVector` trigger.
    pub fn config_name(mut self, name: impl Into<String>) -> Self {
        if let Some(TriggerKind::UpdateSearchVector { config_name, .. }) = &mut self.kind {
            *config_name = name.into();
        }
        self
    }

    pub fn build(self) -> TriggerResult<Trigger> {
        validate_name(&self.name)?;

        let when = self
            .when
            .ok_or_else(|| TriggerError::definition("Trigger must have \"when\" attribute"))?;
        let operation = self.operation.ok_or_else(|| {
            TriggerError::definition("Trigger must have \"operation\" attribute")
        })?;
        let kind = self.kind.ok_or_else(|| {
            TriggerError::definition("Must define func attribute or use a builtin trigger kind")
        })?;

        if let Operation::Or(ops) = &operation {
            if ops.is_empty() {
                return Err(TriggerError::definition("Empty operation list"));
            }
        }
        if self.level == Level::Row && self.referencing.is_some() {
            return Err(TriggerError::definition(
                "Row-level triggers cannot have a \"referencing\" attribute",
            ));
        }
        if self.timing.is_some() && self.level != Level::Row {
            return Err(TriggerError::definition(
                "Deferrable triggers must have \"level\" attribute as Row",
            ));
        }
        if self.timing.is_some() && when != When::After {
            return Err(TriggerError::definition(
                "Deferrable triggers must have \"when\" attribute as After",
            ));
        }

        validate_kind(&kind)?;

        Ok(Trigger {
            name: self.name,
            level: self.level,
            when,
            operation,
            condition: self.condition,
            referencing: self.referencing,
            declare: self.declare,
            timing: self.timing,
            kind,
        })
    }
}

fn validate_name(name: &str) -> TriggerResult<()> {
    if name.is_empty() {
        return Err(TriggerError::definition("Trigger must have \"name\" attribute"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(TriggerError::definition(format!(
            "Trigger name \"{name}\" > {MAX_NAME_LENGTH} characters."
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(TriggerError::definition(format!(
            "Trigger name \"{name}\" has invalid characters. Only alphanumeric characters, hyphens, and underscores are allowed."
        )));
    }
    Ok(())
}

fn validate_kind(kind: &TriggerKind) -> TriggerResult<()> {
    match kind {
        TriggerKind::Custom { func } if func.trim().is_empty() => {
            Err(TriggerError::definition("Must define func attribute"))
        }
        TriggerKind::ReadOnly { fields, exclude } if !fields.is_empty() && !exclude.is_empty() => {
            Err(TriggerError::definition(
                "Must provide only one of \"fields\" or \"exclude\" to ReadOnly trigger",
            ))
        }
        TriggerKind::SoftDelete { field, .. } if field.is_empty() => {
            Err(TriggerError::definition("Must provide \"field\" for soft delete"))
        }
        TriggerKind::Fsm { field, .. } if field.is_empty() => {
            Err(TriggerError::definition("Must provide \"field\" for FSM"))
        }
        TriggerKind::Fsm { transitions, .. } => {
            if transitions.is_empty() {
                return Err(TriggerError::definition("Must provide \"transitions\" for FSM"));
            }
            let reserved = [':', ',', '{', '}', '"', '\\', '\''];
            for (old, new) in transitions {
                if old.contains(reserved) || new.contains(reserved) {
                    return Err(TriggerError::definition(format!(
                        "FSM transition states cannot contain any of {reserved:?}: \"{old}\" -> \"{new}\""
                    )));
                }
            }
            Ok(())
        }
        TriggerKind::UpdateSearchVector {
            vector_field,
            document_fields,
            config_name,
        } => {
            if vector_field.is_empty() {
                return Err(TriggerError::definition(
                    "Must provide \"vector_field\" to update search vector",
                ));
            }
            if document_fields.is_empty() {
                return Err(TriggerError::definition(
                    "Must provide \"document_fields\" to update search vector",
                ));
            }
            if config_name.is_empty() {
                return Err(TriggerError::definition(
                    "Must provide \"config_name\" to update search vector",
                ));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::F;
    use crate::entity::FieldMeta;

    fn account() -> EntityMeta {
        EntityMeta::new("bank.Account", "bank_account")
            .field(FieldMeta::new("id"))
            .field(FieldMeta::new("owner"))
            .field(FieldMeta::new("status"))
            .field(FieldMeta::new("is_active"))
            .field(FieldMeta::new("search"))
            .field(FieldMeta::new("updated_at").auto())
    }

    #[test]
    fn operations_combine() {
        let op = Operation::Insert | Operation::Update | Operation::Delete;
        assert_eq!(op.to_string(), "INSERT OR UPDATE OR DELETE");
        assert_eq!(
            Operation::update_of(["a", "b"]).to_string(),
            r#"UPDATE OF "a", "b""#
        );
    }

    #[test]
    fn referencing_renders() {
        let r = Referencing::new(Some("old_values"), Some("new_values")).unwrap();
        assert_eq!(
            r.to_string(),
            "REFERENCING OLD TABLE AS old_values NEW TABLE AS new_values"
        );
        assert!(Referencing::new(None, None).is_err());
    }

    #[test]
    fn pgid_is_stable_and_lowercase() {
        let t = Trigger::protect("Protect_Deletes", Operation::Delete)
            .build()
            .unwrap();
        let pgid = t.pgid(&account()).unwrap();
        assert!(pgid.starts_with("pgtrigger_protect_deletes_"));
        assert_eq!(pgid.len(), "pgtrigger_protect_deletes_".len() + 5);
        assert_eq!(pgid, t.pgid(&account()).unwrap());
        assert_eq!(pgid, pgid.to_lowercase());
    }

    #[test]
    fn pgid_differs_per_entity() {
        let t = Trigger::protect("p", Operation::Delete).build().unwrap();
        let other = EntityMeta::new("bank.Ledger", "bank_ledger");
        assert_ne!(t.pgid(&account()).unwrap(), t.pgid(&other).unwrap());
    }

    #[test]
    fn name_validation() {
        let long = "x".repeat(MAX_NAME_LENGTH + 1);
        assert!(Trigger::protect(long, Operation::Delete).build().is_err());
        assert!(Trigger::protect("", Operation::Delete).build().is_err());
        assert!(Trigger::protect("bad name", Operation::Delete).build().is_err());
        assert!(Trigger::protect("ok-name_1", Operation::Delete).build().is_ok());
    }

    #[test]
    fn row_triggers_cannot_reference() {
        let err = Trigger::builder("t")
            .when(When::After)
            .operation(Operation::Update)
            .referencing(Referencing::new(Some("old"), None).unwrap())
            .func("RETURN NULL;")
            .build()
            .unwrap_err();
        assert!(err.is_definition());

        let ok = Trigger::builder("t")
            .level(Level::Statement)
            .when(When::After)
            .operation(Operation::Update)
            .referencing(Referencing::new(Some("old"), None).unwrap())
            .func("RETURN NULL;")
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn timing_requires_row_after() {
        let before = Trigger::builder("t")
            .when(When::Before)
            .operation(Operation::Update)
            .timing(Timing::Deferred)
            .func("RETURN NEW;")
            .build();
        assert!(before.is_err());

        let statement = Trigger::builder("t")
            .level(Level::Statement)
            .when(When::After)
            .operation(Operation::Update)
            .timing(Timing::Deferred)
            .func("RETURN NEW;")
            .build();
        assert!(statement.is_err());

        let ok = Trigger::builder("t")
            .when(When::After)
            .operation(Operation::Update)
            .timing(Timing::Deferred)
            .func("RETURN NEW;")
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn missing_parts_are_errors() {
        assert!(Trigger::builder("t").operation(Operation::Update).func("x").build().is_err());
        assert!(Trigger::builder("t").when(When::After).func("x").build().is_err());
        assert!(Trigger::builder("t").when(When::After).operation(Operation::Update).build().is_err());
        assert!(
            Trigger::read_only("t", vec!["a"], vec!["b"]).build().is_err()
        );
        assert!(
            Trigger::fsm("t", "status", Vec::<(&str, &str)>::new()).build().is_err()
        );
        assert!(Trigger::fsm("t", "status", [("a:b", "c")]).build().is_err());
    }

    #[test]
    fn protect_body_names_operation() {
        let t = Trigger::protect("p", Operation::Update | Operation::Delete)
            .build()
            .unwrap();
        let body = t.kind().render_body(&account(), t.operation()).unwrap();
        assert_eq!(
            body,
            "RAISE EXCEPTION 'pgtrigger: Cannot update or delete rows from % table', TG_TABLE_NAME;"
        );
    }

    #[test]
    fn soft_delete_body() {
        let t = Trigger::soft_delete("soft", "is_active", false).build().unwrap();
        let body = t.kind().render_body(&account(), t.operation()).unwrap();
        assert_eq!(
            body,
            r#"UPDATE "bank_account" SET "is_active" = false WHERE "id" = OLD."id"; RETURN NULL;"#
        );

        let t = Trigger::soft_delete("soft", "status", "gone").build().unwrap();
        let body = t.kind().render_body(&account(), t.operation()).unwrap();
        assert!(body.contains(r#"SET "status" = 'gone'"#));
    }

    #[test]
    fn fsm_body_and_declare() {
        let t = Trigger::fsm("fsm", "status", [("draft", "live"), ("live", "archived")])
            .build()
            .unwrap();
        let body = t.kind().render_body(&account(), t.operation()).unwrap();
        assert!(body.contains(r#"ANY('{draft:live,live:archived}'::text[])"#));
        assert!(body.contains(r#"Invalid transition of field "status""#));
        assert_eq!(t.render_declare(), "DECLARE \n_is_valid_transition BOOLEAN;");
    }

    #[test]
    fn read_only_condition() {
        let all = Trigger::read_only("ro", Vec::<String>::new(), Vec::new())
            .build()
            .unwrap();
        assert_eq!(
            all.render_condition(&account()).unwrap(),
            "WHEN (OLD.* IS DISTINCT FROM NEW.*)"
        );

        let some = Trigger::read_only("ro", vec!["owner"], vec![]).build().unwrap();
        assert_eq!(
            some.render_condition(&account()).unwrap(),
            r#"WHEN (OLD."owner" IS DISTINCT FROM NEW."owner")"#
        );
    }

    #[test]
    fn parenthesised_detection() {
        assert!(is_parenthesised("(a OR b)"));
        assert!(is_parenthesised("(a = ')(')"));
        assert!(!is_parenthesised("(a) OR (b)"));
        assert!(!is_parenthesised("a OR b"));
    }

    #[test]
    fn explicit_condition_is_wrapped() {
        let t = Trigger::builder("t")
            .when(When::After)
            .operation(Operation::Update)
            .condition(Condition::q("old__status__df", F::new("new__status")))
            .func("RETURN NULL;")
            .build()
            .unwrap();
        assert_eq!(
            t.render_condition(&account()).unwrap(),
            r#"WHEN (OLD."status" IS DISTINCT FROM NEW."status")"#
        );
    }

    #[test]
    fn search_vector_execute_and_suppression() {
        let t = Trigger::update_search_vector("sv", "search", ["owner", "status"])
            .build()
            .unwrap();
        assert!(!t.can_ignore());
        assert_eq!(
            t.operation().to_string(),
            r#"INSERT OR UPDATE OF "owner", "status""#
        );
        let pgid = t.pgid(&account()).unwrap();
        assert_eq!(
            t.kind().render_execute(&account(), &pgid).unwrap(),
            r#"tsvector_update_trigger("search", "pg_catalog.english", "owner", "status")"#
        );
        assert_eq!(t.kind().render_body(&account(), t.operation()).unwrap(), "");
    }

    #[test]
    fn update_of_resolves_field_columns() {
        let entity = EntityMeta::new("bank.Account", "bank_account")
            .field(FieldMeta::new("title").column("book_title"))
            .field(FieldMeta::new("search").column("search_doc"));
        let t = Trigger::update_search_vector("sv", "search", ["title"])
            .build()
            .unwrap();
        assert_eq!(
            t.operation().render(&entity),
            r#"INSERT OR UPDATE OF "book_title""#
        );
        let params = t.install_params(&entity, &Settings::default()).unwrap();
        assert_eq!(params.operation, r#"INSERT OR UPDATE OF "book_title""#);

        // Plain column names pass through.
        assert_eq!(
            Operation::update_of(["raw_col"]).render(&entity),
            r#"UPDATE OF "raw_col""#
        );
    }

    #[test]
    fn to_builder_round_trips() {
        let t = Trigger::protect("p", Operation::Delete).build().unwrap();
        assert_eq!(t.to_builder().build().unwrap(), t);
        let renamed = t.to_builder().name("p2").build().unwrap();
        assert_eq!(renamed.name(), "p2");
    }
}
