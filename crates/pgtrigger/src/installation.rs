//! Installation reconciler: compares the registry with `pg_trigger` and
//! installs, uninstalls, enables, disables and prunes to close the gap.
//!
//! Every function takes the connection of one database. Single-trigger
//! operations are free functions; [`Reconciler`] runs them over the registry
//! the way the management commands do.

use crate::client::GenericClient;
use crate::compiler::{DisableTriggerSql, DropTriggerSql, EnableTriggerSql};
use crate::config::Settings;
use crate::entity::{DEFAULT_DATABASE, DefaultRouter, EntityMeta, Router};
use crate::error::{TriggerError, TriggerResult};
use crate::ident::quote;
use crate::registry::{RegisteredTrigger, Registry};
use crate::transaction::{run_isolated, with_savepoint};
use crate::trigger::Trigger;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

/// Where a registered trigger stands relative to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallState {
    Installed,
    Uninstalled,
    /// Installed with a different hash than the current definition.
    Outdated,
    /// The router does not allow this entity on the database.
    Unallowed,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstallState::Installed => "INSTALLED",
            InstallState::Uninstalled => "UNINSTALLED",
            InstallState::Outdated => "OUTDATED",
            InstallState::Unallowed => "UNALLOWED",
        })
    }
}

/// Installation state plus the enabled flag (`None` unless installed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub state: InstallState,
    pub enabled: Option<bool>,
}

impl Status {
    pub const UNINSTALLED: Status = Status {
        state: InstallState::Uninstalled,
        enabled: None,
    };

    pub const UNALLOWED: Status = Status {
        state: InstallState::Unallowed,
        enabled: None,
    };
}

/// A `pgtrigger_*` trigger in the catalog that nothing registered owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneCandidate {
    /// Relation as rendered by `regclass`.
    pub table: String,
    pub pgid: String,
    pub enabled: bool,
}

const STATUS_SQL: &str = "SELECT obj_description(t.oid, 'pg_trigger'), t.tgenabled::text \
     FROM pg_trigger t \
     WHERE t.tgname = $1 AND t.tgrelid = to_regclass($2)";

// Unqualified relations only: those are the ones in the current search path.
// Partition clones carry a parent and go with it.
const PRUNABLE_SQL: &str = "SELECT t.tgrelid::regclass::text, t.tgname::text, t.tgenabled::text \
     FROM pg_trigger t \
     WHERE t.tgname LIKE 'pgtrigger_%' \
       AND t.tgparentid = 0 \
       AND array_length(parse_ident(t.tgrelid::regclass::text), 1) = 1 \
     ORDER BY 1, 2";

/// Catalog row for one trigger: `(hash comment, enabled)`.
pub async fn catalog_entry<C: GenericClient>(
    client: &C,
    table: &str,
    pgid: &str,
) -> TriggerResult<Option<(Option<String>, bool)>> {
    let table = quote(table);
    let row = match client.query_opt(STATUS_SQL, &[&pgid, &table]).await {
        Ok(row) => row,
        Err(e) if e.is_undefined_table() => return Ok(None),
        Err(e) => return Err(e),
    };
    let Some(row) = row else {
        return Ok(None);
    };
    let hash: Option<String> = row.try_get(0).map_err(TriggerError::from_db_error)?;
    let enabled: String = row.try_get(1).map_err(TriggerError::from_db_error)?;
    Ok(Some((hash, is_enabled(&enabled))))
}

/// Installation status of `trigger` on `entity`.
///
/// A missing table reports `UNINSTALLED`.
pub async fn status<C: GenericClient>(
    client: &C,
    entity: &EntityMeta,
    trigger: &Trigger,
    settings: &Settings,
) -> TriggerResult<Status> {
    let pgid = trigger.pgid(entity)?;
    let Some((installed_hash, enabled)) = catalog_entry(client, &entity.table, &pgid).await? else {
        return Ok(Status::UNINSTALLED);
    };
    let state = if installed_hash.as_deref() == Some(trigger.hash(entity, settings)?.as_str()) {
        InstallState::Installed
    } else {
        InstallState::Outdated
    };
    Ok(Status {
        state,
        enabled: Some(enabled),
    })
}

/// Create or replace the trigger and its function. Safe to re-run.
pub async fn install<C: GenericClient>(
    client: &C,
    entity: &EntityMeta,
    trigger: &Trigger,
    settings: &Settings,
) -> TriggerResult<()> {
    let sql = trigger.render_install(entity, settings)?;
    run_isolated(client, &sql).await
}

/// Drop the trigger. The shared ignore helper function stays.
pub async fn uninstall<C: GenericClient>(
    client: &C,
    entity: &EntityMeta,
    trigger: &Trigger,
) -> TriggerResult<()> {
    let sql = trigger.render_uninstall(entity)?;
    run_isolated(client, &sql).await
}

pub async fn enable<C: GenericClient>(
    client: &C,
    entity: &EntityMeta,
    trigger: &Trigger,
) -> TriggerResult<()> {
    let sql = EnableTriggerSql::new(&trigger.pgid(entity)?, &entity.table).to_string();
    run_isolated(client, &sql).await
}

pub async fn disable<C: GenericClient>(
    client: &C,
    entity: &EntityMeta,
    trigger: &Trigger,
) -> TriggerResult<()> {
    let sql = DisableTriggerSql::new(&trigger.pgid(entity)?, &entity.table).to_string();
    run_isolated(client, &sql).await
}

/// Catalog triggers following the naming convention that `registry` does
/// not account for.
pub async fn prunable<C: GenericClient>(
    client: &C,
    registry: &Registry,
) -> TriggerResult<Vec<PruneCandidate>> {
    let installed = registry.installed_pairs();
    let rows = client.query(PRUNABLE_SQL, &[]).await?;
    let mut candidates = Vec::new();
    for row in rows {
        let table: String = row.try_get(0).map_err(TriggerError::from_db_error)?;
        let pgid: String = row.try_get(1).map_err(TriggerError::from_db_error)?;
        let enabled: String = row.try_get(2).map_err(TriggerError::from_db_error)?;
        if !installed.contains(&(quote(&table), pgid.clone())) {
            candidates.push(PruneCandidate {
                table,
                pgid,
                enabled: is_enabled(&enabled),
            });
        }
    }
    Ok(candidates)
}

/// `tgenabled` is `D` when disabled. `O`, `R` and `A` each fire under some
/// replication role.
fn is_enabled(tgenabled: &str) -> bool {
    tgenabled != "D"
}

fn trigger_dependency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^trigger "?([^"\s]+)"? on table (.+?) depends on column"#)
            .expect("invalid built-in trigger dependency regex")
    })
}

/// Trigger id named in a "column used in a trigger definition" error.
pub fn blocking_trigger(err: &TriggerError) -> Option<String> {
    if !err.is_column_used_in_trigger() {
        return None;
    }
    let detail = err.db_detail()?;
    trigger_dependency_re()
        .captures(detail)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Run a column alteration that registered triggers may block.
///
/// When Postgres refuses because a registered trigger depends on the column,
/// that trigger is dropped and the alteration retried, at most once per
/// distinct trigger. Dropped triggers are reinstalled once the alteration
/// succeeds. Everything runs in one transaction (the caller's, or one opened
/// here), so a failure leaves the schema untouched.
///
/// Returns the ids of the triggers that were recreated.
pub async fn alter_column<C: GenericClient>(
    client: &C,
    registry: &Registry,
    settings: &Settings,
    alter_sql: &str,
) -> TriggerResult<Vec<String>> {
    let own_transaction = !client.in_transaction();
    if own_transaction {
        client.batch_execute("BEGIN").await?;
    }

    let result = alter_with_retries(client, registry, settings, alter_sql).await;

    if own_transaction {
        match &result {
            Ok(_) => client.batch_execute("COMMIT").await?,
            Err(_) => {
                if let Err(rollback_err) = client.batch_execute("ROLLBACK").await {
                    tracing::warn!(target: "pgtrigger", error = %rollback_err, "rollback failed");
                }
            }
        }
    }
    result
}

async fn alter_with_retries<C: GenericClient>(
    client: &C,
    registry: &Registry,
    settings: &Settings,
    alter_sql: &str,
) -> TriggerResult<Vec<String>> {
    let mut dropped: Vec<&RegisteredTrigger> = Vec::new();
    let mut seen = BTreeSet::new();

    loop {
        let err = match with_savepoint(client, alter_sql).await {
            Ok(()) => break,
            Err(err) => err,
        };
        let Some(pgid) = blocking_trigger(&err) else {
            return Err(err);
        };
        if !seen.insert(pgid.clone()) {
            return Err(err);
        }
        let Some(entry) = registry.by_pgid(&pgid) else {
            return Err(err);
        };
        tracing::info!(
            target: "pgtrigger",
            pgid = %pgid,
            table = %entry.entity.table,
            "Dropping trigger {} to alter column on {} table.",
            pgid,
            entry.entity.table
        );
        with_savepoint(client, &entry.trigger.render_uninstall(&entry.entity)?).await?;
        dropped.push(entry);
    }

    let mut recreated = Vec::with_capacity(dropped.len());
    for entry in dropped {
        with_savepoint(client, &entry.trigger.render_install(&entry.entity, settings)?).await?;
        recreated.push(entry.pgid.clone());
    }
    Ok(recreated)
}

static DEFAULT_ROUTER: DefaultRouter = DefaultRouter;

/// Bulk reconciliation of the registry against one database.
///
/// With no URIs, operations act only on triggers not already in the target
/// state, and install/uninstall prune orphans afterwards (unless disabled in
/// [`Settings`]). Each trigger is installed in its own transaction; a
/// failure stops the run and leaves earlier triggers in place.
pub struct Reconciler<'a> {
    registry: &'a Registry,
    settings: &'a Settings,
    router: &'a dyn Router,
    database: String,
}

impl<'a> Reconciler<'a> {
    pub fn new(registry: &'a Registry, settings: &'a Settings) -> Self {
        Self {
            registry,
            settings,
            router: &DEFAULT_ROUTER,
            database: DEFAULT_DATABASE.to_string(),
        }
    }

    pub fn with_router(mut self, router: &'a dyn Router) -> Self {
        self.router = router;
        self
    }

    /// Database alias the connection belongs to.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Registered triggers living on this database, or the ones named.
    pub fn entries<S: AsRef<str>>(&self, uris: &[S]) -> TriggerResult<Vec<&'a RegisteredTrigger>> {
        if uris.is_empty() {
            let databases = [self.database.clone()];
            self.registry.select(uris, Some(&databases[..]), self.router)
        } else {
            self.registry.resolve(uris)
        }
    }

    fn allowed(&self, entry: &RegisteredTrigger) -> bool {
        self.router.allow_migrate(&self.database, &entry.entity)
    }

    pub async fn status<C: GenericClient>(
        &self,
        client: &C,
        entry: &RegisteredTrigger,
    ) -> TriggerResult<Status> {
        if !self.allowed(entry) {
            return Ok(Status::UNALLOWED);
        }
        status(client, &entry.entity, &entry.trigger, self.settings).await
    }

    /// Status of every targeted trigger.
    pub async fn ls<C: GenericClient, S: AsRef<str>>(
        &self,
        client: &C,
        uris: &[S],
    ) -> TriggerResult<Vec<(&'a RegisteredTrigger, Status)>> {
        let mut out = Vec::new();
        for entry in self.entries(uris)? {
            let status = self.status(client, entry).await?;
            out.push((entry, status));
        }
        Ok(out)
    }

    /// Entries to act on: the named ones, or those whose status `needs` action.
    async fn targets<C, S, F>(
        &self,
        client: &C,
        uris: &[S],
        needs: F,
    ) -> TriggerResult<Vec<&'a RegisteredTrigger>>
    where
        C: GenericClient,
        S: AsRef<str>,
        F: Fn(&Status) -> bool,
    {
        let mut targets = Vec::new();
        for entry in self.entries(uris)? {
            if !self.allowed(entry) {
                tracing::debug!(target: "pgtrigger", uri = %entry.uri, database = %self.database, "not allowed on database, skipping");
                continue;
            }
            if uris.is_empty() && !needs(&self.status(client, entry).await?) {
                continue;
            }
            targets.push(entry);
        }
        Ok(targets)
    }

    pub async fn install<C: GenericClient, S: AsRef<str>>(
        &self,
        client: &C,
        uris: &[S],
    ) -> TriggerResult<()> {
        self.install_with(client, uris, self.settings.prune_on_install)
            .await
    }

    /// [`install`](Self::install) with pruning chosen explicitly.
    pub async fn install_with<C: GenericClient, S: AsRef<str>>(
        &self,
        client: &C,
        uris: &[S],
        prune: bool,
    ) -> TriggerResult<()> {
        let targets = self
            .targets(client, uris, |s| s.state != InstallState::Installed)
            .await?;
        for entry in targets {
            tracing::info!(
                target: "pgtrigger",
                uri = %entry.uri,
                "Installing {} trigger for {} table on {} database.",
                entry.trigger,
                entry.entity.table,
                self.database
            );
            install(client, &entry.entity, &entry.trigger, self.settings).await?;
        }
        if uris.is_empty() && prune {
            self.prune(client).await?;
        }
        Ok(())
    }

    pub async fn uninstall<C: GenericClient, S: AsRef<str>>(
        &self,
        client: &C,
        uris: &[S],
    ) -> TriggerResult<()> {
        self.uninstall_with(client, uris, self.settings.prune_on_install)
            .await
    }

    pub async fn uninstall_with<C: GenericClient, S: AsRef<str>>(
        &self,
        client: &C,
        uris: &[S],
        prune: bool,
    ) -> TriggerResult<()> {
        let targets = self
            .targets(client, uris, |s| s.state != InstallState::Uninstalled)
            .await?;
        for entry in targets {
            tracing::info!(
                target: "pgtrigger",
                uri = %entry.uri,
                "Uninstalling {} trigger for {} table on {} database.",
                entry.trigger,
                entry.entity.table,
                self.database
            );
            uninstall(client, &entry.entity, &entry.trigger).await?;
        }
        if uris.is_empty() && prune {
            self.prune(client).await?;
        }
        Ok(())
    }

    pub async fn enable<C: GenericClient, S: AsRef<str>>(
        &self,
        client: &C,
        uris: &[S],
    ) -> TriggerResult<()> {
        let targets = self
            .targets(client, uris, |s| s.enabled == Some(false))
            .await?;
        for entry in targets {
            tracing::info!(
                target: "pgtrigger",
                uri = %entry.uri,
                "Enabling {} trigger for {} table on {} database.",
                entry.trigger,
                entry.entity.table,
                self.database
            );
            enable(client, &entry.entity, &entry.trigger).await?;
        }
        Ok(())
    }

    pub async fn disable<C: GenericClient, S: AsRef<str>>(
        &self,
        client: &C,
        uris: &[S],
    ) -> TriggerResult<()> {
        let targets = self
            .targets(client, uris, |s| s.enabled == Some(true))
            .await?;
        for entry in targets {
            tracing::info!(
                target: "pgtrigger",
                uri = %entry.uri,
                "Disabling {} trigger for {} table on {} database.",
                entry.trigger,
                entry.entity.table,
                self.database
            );
            disable(client, &entry.entity, &entry.trigger).await?;
        }
        Ok(())
    }

    pub async fn prunable<C: GenericClient>(&self, client: &C) -> TriggerResult<Vec<PruneCandidate>> {
        prunable(client, self.registry).await
    }

    /// Drop orphaned triggers; returns what was dropped.
    pub async fn prune<C: GenericClient>(&self, client: &C) -> TriggerResult<Vec<PruneCandidate>> {
        let candidates = self.prunable(client).await?;
        for candidate in &candidates {
            tracing::info!(
                target: "pgtrigger",
                "Pruning trigger {} for table {} on {} database.",
                candidate.pgid,
                candidate.table,
                self.database
            );
            let sql = DropTriggerSql::new(&candidate.pgid, &candidate.table).to_string();
            run_isolated(client, &sql).await?;
        }
        Ok(candidates)
    }

    /// Hook for hosts that run their own migrations first.
    pub async fn after_migrate<C: GenericClient>(&self, client: &C) -> TriggerResult<()> {
        if !self.settings.install_on_migrate {
            return Ok(());
        }
        let none: &[&str] = &[];
        self.install(client, none).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::Operation;

    #[test]
    fn states_display_in_caps() {
        assert_eq!(InstallState::Outdated.to_string(), "OUTDATED");
        assert_eq!(
            serde_json::to_string(&InstallState::Unallowed).unwrap(),
            "\"UNALLOWED\""
        );
    }

    #[test]
    fn dependency_detail_parsing() {
        let re = trigger_dependency_re();
        let caps = re
            .captures("trigger pgtrigger_protect_ab12c on table library_book depends on column \"title\"")
            .unwrap();
        assert_eq!(&caps[1], "pgtrigger_protect_ab12c");
        assert_eq!(&caps[2], "library_book");
        assert!(re.captures("view v depends on column \"title\"").is_none());
    }

    #[test]
    fn only_disabled_triggers_report_disabled() {
        assert!(is_enabled("O"));
        assert!(is_enabled("A"));
        assert!(is_enabled("R"));
        assert!(!is_enabled("D"));
    }

    #[test]
    fn non_database_errors_name_no_blocker() {
        assert_eq!(blocking_trigger(&TriggerError::usage("x")), None);
    }

    struct OnlyDefault;

    impl Router for OnlyDefault {
        fn allow_migrate(&self, database: &str, _entity: &EntityMeta) -> bool {
            database == DEFAULT_DATABASE
        }
    }

    #[test]
    fn entries_filter_by_database() {
        let mut registry = Registry::new();
        let book = EntityMeta::new("library.Book", "library_book");
        let log = EntityMeta::new("audit.Log", "audit_log").database("audit");
        let protect = Trigger::protect("p", Operation::Delete).build().unwrap();
        registry.register(&book, protect.clone()).unwrap();
        registry.register(&log, protect).unwrap();

        let settings = Settings::default();
        let none: &[&str] = &[];
        let rec = Reconciler::new(&registry, &settings);
        let uris: Vec<&str> = rec.entries(none).unwrap().iter().map(|e| e.uri.as_str()).collect();
        assert_eq!(uris, vec!["library.Book:p"]);

        let rec = rec.with_database("audit");
        let uris: Vec<&str> = rec.entries(none).unwrap().iter().map(|e| e.uri.as_str()).collect();
        assert_eq!(uris, vec!["audit.Log:p"]);
        assert_eq!(rec.entries(&["library.Book:p"]).unwrap().len(), 1);

        let router = OnlyDefault;
        let rec = Reconciler::new(&registry, &settings)
            .with_router(&router)
            .with_database("audit");
        assert!(!rec.allowed(rec.entries(&["audit.Log:p"]).unwrap()[0]));
    }
}
