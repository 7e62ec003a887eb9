//! Trigger behaviour against a live database.

mod common;

use common::{TestDb, db_message, registry};
use pgtrigger::{
    EntityMeta, FieldMeta, GenericClient, InstallState, Operation, Reconciler, Trigger,
    TriggerClient, TriggerResult,
};

const NONE: &[&str] = &[];

fn book() -> EntityMeta {
    EntityMeta::new("library.Book", "book")
        .field(FieldMeta::new("id"))
        .field(FieldMeta::new("title"))
        .field(FieldMeta::new("status"))
        .field(FieldMeta::new("is_active"))
}

async fn create_book_table(db: &TestDb) -> TriggerResult<()> {
    db.client
        .batch_execute(
            "CREATE TABLE book (
                id SERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                is_active BOOLEAN NOT NULL DEFAULT TRUE
            );
            INSERT INTO book (title) VALUES ('one'), ('two');",
        )
        .await
        .map_err(pgtrigger::TriggerError::from_db_error)
}

#[tokio::test]
async fn protect_blocks_deletes_until_ignored() -> TriggerResult<()> {
    let Some(db) = TestDb::connect("protect").await? else {
        return Ok(());
    };
    create_book_table(&db).await?;

    let entity = book();
    let registry = registry(
        &entity,
        vec![Trigger::protect("protect_deletes", Operation::Delete).build()?],
    );
    let settings = db.settings();
    let reconciler = Reconciler::new(&registry, &settings);

    reconciler.install(&db.client, NONE).await?;
    let (_, status) = reconciler.ls(&db.client, NONE).await?.remove(0);
    assert_eq!(status.state, InstallState::Installed);
    assert_eq!(status.enabled, Some(true));

    let client = TriggerClient::new(db.connect_again().await?);
    let err = client
        .execute("DELETE FROM book WHERE title = $1", &[&"one"])
        .await
        .unwrap_err();
    assert!(db_message(&err).contains("Cannot delete rows from book table"), "{err}");

    let scope = client
        .ignore_in(&registry, &["library.Book:protect_deletes"])
        .await?;
    let deleted = client
        .execute("DELETE FROM book WHERE title = $1", &[&"one"])
        .await?;
    assert_eq!(deleted, 1);
    scope.release().await?;

    // The session variable was reset: the trigger fires again.
    assert!(client.execute("DELETE FROM book", &[]).await.is_err());

    // Disabled triggers do not fire; enabling restores protection.
    reconciler.disable(&db.client, NONE).await?;
    let (_, status) = reconciler.ls(&db.client, NONE).await?.remove(0);
    assert_eq!(status.enabled, Some(false));
    reconciler.enable(&db.client, NONE).await?;
    assert!(client.execute("DELETE FROM book", &[]).await.is_err());

    drop(client);
    db.drop_schema().await
}

#[tokio::test]
async fn ignore_inside_a_transaction_uses_local_settings() -> TriggerResult<()> {
    let Some(db) = TestDb::connect("ignore_tx").await? else {
        return Ok(());
    };
    create_book_table(&db).await?;

    let entity = book();
    let registry = registry(
        &entity,
        vec![
            Trigger::protect("protect_deletes", Operation::Delete).build()?,
            Trigger::protect("protect_updates", Operation::Update).build()?,
        ],
    );
    let settings = db.settings();
    Reconciler::new(&registry, &settings)
        .install(&db.client, NONE)
        .await?;

    let client = TriggerClient::new(db.connect_again().await?);
    client.begin().await?;
    let outer = client
        .ignore_in(&registry, &["library.Book:protect_updates"])
        .await?;
    client.execute("UPDATE book SET title = 'x'", &[]).await?;
    {
        let inner = client
            .ignore_in(
                &registry,
                &["library.Book:protect_updates", "library.Book:protect_deletes"],
            )
            .await?;
        // Already ignored by the outer scope.
        assert_eq!(inner.added(), &[registry.get("library.Book:protect_deletes").unwrap().pgid.clone()]);
        client.execute("DELETE FROM book WHERE title = 'x' AND id = 1", &[]).await?;
        inner.release().await?;
    }
    // Inner release kept the outer scope's trigger ignored.
    client.execute("UPDATE book SET title = 'y'", &[]).await?;
    assert!(client.execute("DELETE FROM book", &[]).await.is_err());
    client.rollback().await?;
    outer.release().await?;

    let rows = client.query("SELECT title FROM book ORDER BY id", &[]).await?;
    let titles: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
    assert_eq!(titles, vec!["one", "two"]);

    drop(client);
    db.drop_schema().await
}

#[tokio::test]
async fn soft_delete_updates_instead() -> TriggerResult<()> {
    let Some(db) = TestDb::connect("softdel").await? else {
        return Ok(());
    };
    create_book_table(&db).await?;

    let entity = book();
    let registry = registry(
        &entity,
        vec![Trigger::soft_delete("soft_delete", "is_active", false).build()?],
    );
    let settings = db.settings();
    Reconciler::new(&registry, &settings)
        .install(&db.client, NONE)
        .await?;

    let deleted = db
        .client
        .execute("DELETE FROM book WHERE title = 'one'", &[])
        .await
        .map_err(pgtrigger::TriggerError::from_db_error)?;
    assert_eq!(deleted, 0);

    let row = db
        .client
        .query_one("SELECT is_active FROM book WHERE title = 'one'", &[])
        .await
        .map_err(pgtrigger::TriggerError::from_db_error)?;
    assert!(!row.get::<_, bool>(0));

    db.drop_schema().await
}

#[tokio::test]
async fn fsm_rejects_unlisted_transitions() -> TriggerResult<()> {
    let Some(db) = TestDb::connect("fsm").await? else {
        return Ok(());
    };
    create_book_table(&db).await?;

    let entity = book();
    let registry = registry(
        &entity,
        vec![
            Trigger::fsm(
                "status_fsm",
                "status",
                [("draft", "published"), ("published", "archived")],
            )
            .build()?,
        ],
    );
    let settings = db.settings();
    Reconciler::new(&registry, &settings)
        .install(&db.client, NONE)
        .await?;

    db.client
        .execute("UPDATE book SET status = 'published' WHERE title = 'one'", &[])
        .await
        .map_err(pgtrigger::TriggerError::from_db_error)?;
    // Unchanged values are always allowed.
    db.client
        .execute("UPDATE book SET status = 'published' WHERE title = 'one'", &[])
        .await
        .map_err(pgtrigger::TriggerError::from_db_error)?;

    let err = db
        .client
        .execute("UPDATE book SET status = 'draft' WHERE title = 'one'", &[])
        .await
        .map_err(pgtrigger::TriggerError::from_db_error)
        .unwrap_err();
    assert!(
        db_message(&err).contains("Invalid transition of field \"status\" from \"published\" to \"draft\""),
        "{err}"
    );

    // Transitions are not transitive.
    let err = db
        .client
        .execute("UPDATE book SET status = 'archived' WHERE title = 'two'", &[])
        .await
        .map_err(pgtrigger::TriggerError::from_db_error)
        .unwrap_err();
    assert!(db_message(&err).contains("from \"draft\" to \"archived\""), "{err}");

    db.drop_schema().await
}

#[tokio::test]
async fn changed_definitions_are_outdated_until_reinstalled() -> TriggerResult<()> {
    let Some(db) = TestDb::connect("drift").await? else {
        return Ok(());
    };
    create_book_table(&db).await?;
    let entity = book();
    let settings = db.settings();

    let uninstalled = registry(
        &entity,
        vec![Trigger::protect("protect", Operation::Delete).build()?],
    );
    let reconciler = Reconciler::new(&uninstalled, &settings);
    let (_, status) = reconciler.ls(&db.client, NONE).await?.remove(0);
    assert_eq!(status.state, InstallState::Uninstalled);
    assert_eq!(status.enabled, None);
    reconciler.install(&db.client, NONE).await?;

    let changed = registry(
        &entity,
        vec![Trigger::protect("protect", Operation::Delete | Operation::Update).build()?],
    );
    let reconciler = Reconciler::new(&changed, &settings);
    let (_, status) = reconciler.ls(&db.client, NONE).await?.remove(0);
    assert_eq!(status.state, InstallState::Outdated);

    // Reinstalling twice is harmless.
    reconciler.install(&db.client, NONE).await?;
    reconciler.install(&db.client, &["library.Book:protect"]).await?;
    let (_, status) = reconciler.ls(&db.client, NONE).await?.remove(0);
    assert_eq!(status.state, InstallState::Installed);

    reconciler.uninstall(&db.client, NONE).await?;
    let (_, status) = reconciler.ls(&db.client, NONE).await?.remove(0);
    assert_eq!(status.state, InstallState::Uninstalled);

    db.drop_schema().await
}

#[tokio::test]
async fn missing_tables_report_uninstalled() -> TriggerResult<()> {
    let Some(db) = TestDb::connect("notable").await? else {
        return Ok(());
    };
    let entity = EntityMeta::new("library.Ghost", "ghost");
    let registry = registry(
        &entity,
        vec![Trigger::protect("protect", Operation::Delete).build()?],
    );
    let settings = db.settings();
    let (_, status) = Reconciler::new(&registry, &settings)
        .ls(&db.client, NONE)
        .await?
        .remove(0);
    assert_eq!(status.state, InstallState::Uninstalled);

    db.drop_schema().await
}

#[tokio::test]
async fn prune_drops_unregistered_triggers_once() -> TriggerResult<()> {
    let Some(db) = TestDb::connect("prune").await? else {
        return Ok(());
    };
    create_book_table(&db).await?;
    let entity = book();
    let settings = db.settings();

    let old = registry(
        &entity,
        vec![
            Trigger::protect("keep", Operation::Delete).build()?,
            Trigger::protect("stale", Operation::Update).build()?,
        ],
    );
    Reconciler::new(&old, &settings)
        .install(&db.client, NONE)
        .await?;

    let current = registry(
        &entity,
        vec![Trigger::protect("keep", Operation::Delete).build()?],
    );
    let reconciler = Reconciler::new(&current, &settings);
    let candidates = reconciler.prunable(&db.client).await?;
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].pgid, old.get("library.Book:stale").unwrap().pgid);
    assert_eq!(candidates[0].table, "book");
    assert!(candidates[0].enabled);

    assert_eq!(reconciler.prune(&db.client).await?.len(), 1);
    assert!(reconciler.prune(&db.client).await?.is_empty());
    let (_, status) = reconciler.ls(&db.client, NONE).await?.remove(0);
    assert_eq!(status.state, InstallState::Installed);

    db.drop_schema().await
}

#[tokio::test]
async fn schema_scope_restores_search_path() -> TriggerResult<()> {
    let Some(db) = TestDb::connect("schema").await? else {
        return Ok(());
    };
    let client = TriggerClient::new(db.connect_again().await?);
    let show = |rows: Vec<tokio_postgres::Row>| -> String { rows[0].get(0) };

    let before = show(client.query("SHOW search_path", &[]).await?);
    let scope = client.schema(&["public"]).await?;
    let during = show(client.query("SHOW search_path", &[]).await?);
    assert!(during.contains("public"), "{during}");
    {
        let nested = client.schema(&["public"]).await?;
        assert!(nested.added().is_empty());
        nested.release().await?;
    }
    scope.release().await?;
    let after = show(client.query("SHOW search_path", &[]).await?);
    assert_eq!(before, after);

    drop(client);
    db.drop_schema().await
}

#[tokio::test]
async fn alter_column_recreates_blocking_triggers() -> TriggerResult<()> {
    let Some(db) = TestDb::connect("alter").await? else {
        return Ok(());
    };
    create_book_table(&db).await?;
    let entity = book();
    let settings = db.settings();
    let registry = registry(
        &entity,
        vec![Trigger::protect("title_frozen", Operation::update_of(["title"])).build()?],
    );
    let reconciler = Reconciler::new(&registry, &settings);
    reconciler.install(&db.client, NONE).await?;

    let recreated = pgtrigger::alter_column(
        &db.client,
        &registry,
        &settings,
        "ALTER TABLE book ALTER COLUMN title TYPE VARCHAR(200)",
    )
    .await?;
    assert_eq!(
        recreated,
        vec![registry.get("library.Book:title_frozen").unwrap().pgid.clone()]
    );
    let (_, status) = reconciler.ls(&db.client, NONE).await?.remove(0);
    assert_eq!(status.state, InstallState::Installed);

    // Failures other than trigger dependencies roll everything back.
    let err = pgtrigger::alter_column(
        &db.client,
        &registry,
        &settings,
        "ALTER TABLE book ALTER COLUMN title TYPE INTEGER",
    )
    .await
    .unwrap_err();
    assert!(err.sqlstate().is_some(), "{err}");
    let (_, status) = reconciler.ls(&db.client, NONE).await?.remove(0);
    assert_eq!(status.state, InstallState::Installed);

    db.drop_schema().await
}
