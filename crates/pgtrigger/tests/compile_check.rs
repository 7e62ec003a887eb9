//! Compile-only tests for core API patterns.
//!
//! These tests verify that key API surfaces compile correctly.
//! They do NOT execute against a database; they only check types and signatures.

#![allow(dead_code)]

use pgtrigger::{
    Change, Condition, Entity, F, GenericClient, Operation, Reconciler, Registry, Settings, Timing,
    Trigger, TriggerClient, TriggerError, TriggerResult, When,
};

// ── Entity definitions ───────────────────────────────────────────────────────

#[derive(Entity)]
#[entity(app = "compile", table = "compile_book", database = "default")]
struct CompileBook {
    #[entity(id)]
    id: i64,
    title: String,
    status: String,
    #[entity(fk)]
    author: i64,
    #[entity(auto)]
    updated_at: String,
    #[entity(skip)]
    cached_len: usize,
}

pgtrigger::register_triggers!(CompileBook => [
    Trigger::protect("protect_deletes", Operation::Delete),
    Trigger::soft_delete("soft_delete", "status", "deleted"),
    Trigger::builder("deferred_check")
        .when(When::After)
        .operation(Operation::Insert | Operation::Update)
        .timing(Timing::Deferred)
        .func("RETURN NULL;"),
]);

#[test]
fn derived_meta() {
    let meta = CompileBook::meta();
    assert_eq!(meta.label, "compile.CompileBook");
    assert_eq!(meta.table, "compile_book");
    assert_eq!(meta.primary_key, "id");
    assert_eq!(meta.database.as_deref(), Some("default"));
    assert_eq!(meta.column_of("author"), Some("author_id"));
    assert!(meta.get_field("cached_len").is_none());
    let auto: Vec<&str> = meta.auto_fields().map(|f| f.name.as_str()).collect();
    assert_eq!(auto, vec!["updated_at"]);
}

#[test]
fn submitted_registrations_bootstrap() {
    pgtrigger::registry::bootstrap().unwrap();
    let registry = pgtrigger::registry::read();
    assert!(registry.get("compile.CompileBook:protect_deletes").is_some());
    assert!(registry.get("compile.CompileBook:deferred_check").is_some());
}

#[test]
fn conditions_compose() {
    let cond = Condition::q("old__status__df", F::new("new__status"))
        & Condition::q("new__status", "published")
        | !Condition::from(Change::any().exclude_auto());
    let sql = cond.resolve(&CompileBook::meta()).unwrap();
    assert!(sql.contains("IS DISTINCT FROM"), "{sql}");
}

// ── Runtime scopes ───────────────────────────────────────────────────────────

async fn _ignore_macro_compiles(client: tokio_postgres::Client) -> TriggerResult<()> {
    let client = TriggerClient::new(client);
    pgtrigger::ignore!(client, ["compile.CompileBook:protect_deletes"], {
        client.execute("DELETE FROM compile_book", &[]).await?;
        Ok::<(), TriggerError>(())
    })?;
    Ok(())
}

async fn _schema_macro_compiles(client: tokio_postgres::Client) -> TriggerResult<()> {
    let client = TriggerClient::new(client);
    let count: i64 = pgtrigger::schema!(client, ["tenant_a", "public"], {
        let row = client
            .query_opt("SELECT count(*) FROM compile_book", &[])
            .await?
            .ok_or_else(|| TriggerError::NotFound("count".into()))?;
        Ok::<i64, TriggerError>(row.get(0))
    })?;
    let _ = count;
    Ok(())
}

async fn _atomic_with_constraints_compiles(
    client: tokio_postgres::Client,
    registry: &Registry,
) -> TriggerResult<()> {
    let client = TriggerClient::new(client);
    pgtrigger::atomic!(client, {
        pgtrigger::constraints(
            &client,
            registry,
            Timing::Immediate,
            &["compile.CompileBook:deferred_check"],
        )
        .await?;
        client.execute("UPDATE compile_book SET title = $1", &[&"x"]).await?;
        Ok::<(), TriggerError>(())
    })?;
    Ok(())
}

async fn _sessions_compile(
    a: tokio_postgres::Client,
    b: tokio_postgres::Client,
) -> TriggerResult<()> {
    let runtime = pgtrigger::Runtime::new();
    let a = TriggerClient::new(a).with_runtime(runtime.clone());
    let b = TriggerClient::new(b).with_runtime(runtime);
    let session = pgtrigger::IgnoreSession::enter(&[&a, &b]);
    let scope = a.ignore(&["compile.CompileBook:protect_deletes"]).await?;
    b.execute("DELETE FROM compile_book", &[]).await?;
    scope.release().await?;
    session.release().await?;

    let schemas = pgtrigger::SchemaSession::enter(&[&a, &b]).await?;
    schemas.release().await?;
    Ok(())
}

async fn _transaction_client_compiles(client: &mut tokio_postgres::Client) -> TriggerResult<()> {
    let tx = client.transaction().await.map_err(TriggerError::from_db_error)?;
    let tx = TriggerClient::for_transaction(tx);
    let scope = tx.ignore(&["compile.CompileBook:protect_deletes"]).await?;
    tx.execute("DELETE FROM compile_book", &[]).await?;
    scope.release().await?;
    tx.into_inner().await?.commit().await.map_err(TriggerError::from_db_error)?;
    Ok(())
}

// ── Reconciliation ───────────────────────────────────────────────────────────

async fn _reconciler_compiles(client: &tokio_postgres::Client) -> TriggerResult<()> {
    let registry = pgtrigger::registry::snapshot();
    let settings = Settings::default();
    let reconciler = Reconciler::new(&registry, &settings).with_database("default");
    for (entry, status) in reconciler.ls(client, &[] as &[&str]).await? {
        println!("{}\t{}\t{:?}", entry.uri, status.state, status.enabled);
    }
    reconciler.install_with(client, &[] as &[&str], false).await?;
    reconciler.disable(client, &["compile.CompileBook:protect_deletes"]).await?;
    reconciler.after_migrate(client).await?;
    let _ = reconciler.prune(client).await?;
    Ok(())
}

#[cfg(feature = "pool")]
async fn _pool_checkout_compiles() -> TriggerResult<()> {
    let pool = pgtrigger::create_pool("postgres://localhost/app")?;
    let runtime = pgtrigger::Runtime::new();
    let client = pgtrigger::pool::checkout(&pool, &runtime).await?;
    client.execute("SELECT 1", &[]).await?;
    Ok(())
}

#[cfg(feature = "migrate")]
fn _migrations_compile() -> TriggerResult<()> {
    let compiled = Trigger::protect("protect_deletes", Operation::Delete)
        .build()?
        .compile(&CompileBook::meta(), &Settings::default())?;
    let (_up, _down) = compiled.to_migrations(1, "compile.CompileBook")?;
    Ok(())
}
