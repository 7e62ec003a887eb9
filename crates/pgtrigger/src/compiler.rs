//! Trigger compiler: deterministic DDL and drift hashes.
//!
//! [`InstallSql`] renders a versioned template from a flat set of string
//! parameters. The hash stored in the trigger's comment is the SHA-1 of the
//! template rendered with an empty hash, so it only changes when the rendered
//! definition does.
//!
//! Shipped templates are never edited. Persisted [`CompiledTrigger`]s (e.g. in
//! migrations) carry their [`TemplateVersion`] and their hash, and re-render
//! byte-for-byte regardless of later releases. New rendering behavior gets a
//! new version.

use crate::error::{TriggerError, TriggerResult};
use crate::ident::quote;
use crate::trigger::pgid_sql;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Install template revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateVersion {
    #[default]
    V1,
}

/// Default schema-qualified name of the shared ignore function.
pub const DEFAULT_IGNORE_FUNC_NAME: &str = "\"public\"._pgtrigger_should_ignore";

/// Parameters of the install template.
///
/// Optional fields fall back to the template defaults; [`InstallParams::normalized`]
/// drops values equal to their default so persisted parameters stay minimal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_func_name: Option<String>,
    pub pgid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declare: Option<String>,
    pub func: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    pub when: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referencing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<String>,
}

impl InstallParams {
    pub fn new(
        pgid: impl Into<String>,
        func: impl Into<String>,
        table: impl Into<String>,
        when: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            ignore_func_name: None,
            pgid: pgid.into(),
            declare: None,
            func: func.into(),
            table: table.into(),
            constraint: None,
            when: when.into(),
            operation: operation.into(),
            timing: None,
            referencing: None,
            level: None,
            condition: None,
            execute: None,
        }
    }

    fn default_execute(&self) -> String {
        format!("{}()", pgid_sql(&self.pgid))
    }

    /// Drop values that equal the template defaults.
    pub fn normalized(mut self) -> Self {
        fn drop_default(slot: &mut Option<String>, default: &str) {
            if slot.as_deref() == Some(default) {
                *slot = None;
            }
        }
        let default_execute = self.default_execute();
        drop_default(&mut self.ignore_func_name, DEFAULT_IGNORE_FUNC_NAME);
        drop_default(&mut self.declare, "");
        drop_default(&mut self.constraint, "");
        drop_default(&mut self.timing, "");
        drop_default(&mut self.referencing, "");
        drop_default(&mut self.level, "ROW");
        drop_default(&mut self.condition, "");
        drop_default(&mut self.execute, &default_execute);
        self
    }

    fn render_v1(&self, hash: &str) -> String {
        let ignore_func_name = self
            .ignore_func_name
            .as_deref()
            .unwrap_or(DEFAULT_IGNORE_FUNC_NAME);
        let pgid = pgid_sql(&self.pgid);
        let declare = self.declare.as_deref().unwrap_or("");
        let func = &self.func;
        let table = quote(&self.table);
        let constraint = self.constraint.as_deref().unwrap_or("");
        let when = &self.when;
        let operation = &self.operation;
        let timing = self.timing.as_deref().unwrap_or("");
        let referencing = self.referencing.as_deref().unwrap_or("");
        let level = self.level.as_deref().unwrap_or("ROW");
        let condition = self.condition.as_deref().unwrap_or("");
        let execute = self
            .execute
            .clone()
            .unwrap_or_else(|| self.default_execute());

        format!(
            r#"
            CREATE OR REPLACE FUNCTION {ignore_func_name}(
                trigger_name NAME
            )
            RETURNS BOOLEAN AS $$
                DECLARE
                    _pgtrigger_ignore TEXT[];
                    _result BOOLEAN;
                BEGIN
                    BEGIN
                        SELECT INTO _pgtrigger_ignore
                            CURRENT_SETTING('pgtrigger.ignore');
                        EXCEPTION WHEN OTHERS THEN
                    END;
                    IF _pgtrigger_ignore IS NOT NULL THEN
                        SELECT trigger_name = ANY(_pgtrigger_ignore)
                        INTO _result;
                        RETURN _result;
                    ELSE
                        RETURN FALSE;
                    END IF;
                END;
            $$ LANGUAGE plpgsql;

            CREATE OR REPLACE FUNCTION {pgid}()
            RETURNS TRIGGER AS $$
                {declare}
                BEGIN
                    IF ({ignore_func_name}(TG_NAME) IS TRUE) THEN
                        IF (TG_OP = 'DELETE') THEN
                            RETURN OLD;
                        ELSE
                            RETURN NEW;
                        END IF;
                    END IF;
                    {func}
                END;
            $$ LANGUAGE plpgsql;

            DROP TRIGGER IF EXISTS {pgid} ON {table};
            CREATE {constraint} TRIGGER {pgid}
                {when} {operation} ON {table}
                {timing}
                {referencing}
                FOR EACH {level} {condition}
                EXECUTE PROCEDURE {execute};

            COMMENT ON TRIGGER {pgid} ON {table} IS '{hash}';
        "#
        )
    }
}

/// Installation SQL for one trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSql {
    #[serde(default)]
    pub version: TemplateVersion,
    #[serde(flatten)]
    pub params: InstallParams,
    pub hash: String,
}

impl InstallSql {
    /// Build from parameters, computing the hash.
    pub fn new(params: InstallParams) -> Self {
        let params = params.normalized();
        let version = TemplateVersion::default();
        let hash = compute_hash(&render(version, &params, ""));
        Self {
            version,
            params,
            hash,
        }
    }

    /// Rebuild persisted SQL, trusting the stored hash verbatim.
    pub fn with_hash(version: TemplateVersion, params: InstallParams, hash: impl Into<String>) -> Self {
        Self {
            version,
            params: params.normalized(),
            hash: hash.into(),
        }
    }

    pub fn pgid(&self) -> &str {
        &self.params.pgid
    }

    pub fn table(&self) -> &str {
        &self.params.table
    }

    /// Hash of this SQL recomputed from scratch; differs from [`InstallSql::hash`]
    /// only when the stored hash was tampered with or belongs to other SQL.
    pub fn computed_hash(&self) -> String {
        compute_hash(&render(self.version, &self.params, ""))
    }
}

impl fmt::Display for InstallSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self.version, &self.params, &self.hash))
    }
}

fn render(version: TemplateVersion, params: &InstallParams, hash: &str) -> String {
    match version {
        TemplateVersion::V1 => params.render_v1(hash),
    }
}

fn compute_hash(rendered: &str) -> String {
    hex::encode(Sha1::digest(rendered.as_bytes()))
}

/// `DROP TRIGGER IF EXISTS {pgid} ON {table};`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTriggerSql(String);

impl DropTriggerSql {
    pub fn new(pgid: &str, table: &str) -> Self {
        Self(format!(
            "DROP TRIGGER IF EXISTS {} ON {};",
            pgid_sql(pgid),
            quote(table)
        ))
    }
}

/// `ALTER TABLE {table} ENABLE TRIGGER {pgid};`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableTriggerSql(String);

impl EnableTriggerSql {
    pub fn new(pgid: &str, table: &str) -> Self {
        Self(format!(
            "ALTER TABLE {} ENABLE TRIGGER {};",
            quote(table),
            pgid_sql(pgid)
        ))
    }
}

/// `ALTER TABLE {table} DISABLE TRIGGER {pgid};`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisableTriggerSql(String);

impl DisableTriggerSql {
    pub fn new(pgid: &str, table: &str) -> Self {
        Self(format!(
            "ALTER TABLE {} DISABLE TRIGGER {};",
            quote(table),
            pgid_sql(pgid)
        ))
    }
}

macro_rules! impl_display_for_ddl {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

impl_display_for_ddl!(DropTriggerSql, EnableTriggerSql, DisableTriggerSql);

/// A trigger compiled for one table, as handed to migration tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledTrigger {
    pub name: String,
    pub sql: InstallSql,
}

impl CompiledTrigger {
    pub fn new(name: impl Into<String>, sql: InstallSql) -> Self {
        Self {
            name: name.into(),
            sql,
        }
    }

    /// Reconstruct from persisted parts; `hash` is reused as-is.
    pub fn from_parts(
        name: impl Into<String>,
        version: TemplateVersion,
        params: InstallParams,
        hash: impl Into<String>,
    ) -> Self {
        Self::new(name, InstallSql::with_hash(version, params, hash))
    }

    pub fn from_json(raw: &str) -> TriggerResult<Self> {
        serde_json::from_str(raw).map_err(|e| TriggerError::Other(format!("invalid compiled trigger: {e}")))
    }

    pub fn to_json(&self) -> TriggerResult<String> {
        serde_json::to_string(self).map_err(|e| TriggerError::Other(e.to_string()))
    }

    pub fn pgid(&self) -> &str {
        self.sql.pgid()
    }

    pub fn table(&self) -> &str {
        self.sql.table()
    }

    pub fn install_sql(&self) -> String {
        self.sql.to_string()
    }

    pub fn uninstall_sql(&self) -> String {
        DropTriggerSql::new(self.pgid(), self.table()).to_string()
    }

    pub fn enable_sql(&self) -> String {
        EnableTriggerSql::new(self.pgid(), self.table()).to_string()
    }

    pub fn disable_sql(&self) -> String {
        DisableTriggerSql::new(self.pgid(), self.table()).to_string()
    }

    pub fn hash(&self) -> &str {
        &self.sql.hash
    }

    /// Forward (install) and backward (uninstall) refinery migrations.
    ///
    /// Refinery only runs forward migrations; the backward one is returned
    /// for hosts that keep down-migrations alongside.
    #[cfg(feature = "migrate")]
    pub fn to_migrations(
        &self,
        version: i64,
        label: &str,
    ) -> TriggerResult<(refinery::Migration, refinery::Migration)> {
        let slug: String = format!("{label}_{}", self.name)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        let up = refinery::Migration::unapplied(
            &format!("V{version}__install_{slug}"),
            &self.install_sql(),
        )?;
        let down = refinery::Migration::unapplied(
            &format!("V{version}__uninstall_{slug}"),
            &self.uninstall_sql(),
        )?;
        Ok((up, down))
    }
}
