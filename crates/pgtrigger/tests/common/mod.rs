//! Shared setup for database tests.
//!
//! Every test gets its own schema, first on the connection's search path,
//! and its own copy of the ignore helper function inside it, so tests can
//! run in parallel against one database.

#![allow(dead_code)]

use pgtrigger::{Registry, Settings, TriggerError, TriggerResult};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_postgres::NoTls;

pub struct TestDb {
    pub client: tokio_postgres::Client,
    pub database_url: String,
    pub schema: String,
}

impl TestDb {
    /// `None` when `DATABASE_URL` is unset.
    pub async fn connect(test: &str) -> TriggerResult<Option<Self>> {
        let _ = dotenvy::dotenv();
        let database_url = match std::env::var("DATABASE_URL") {
            Ok(v) => v,
            Err(_) => {
                eprintln!("DATABASE_URL is not set; skipping {test}");
                return Ok(None);
            }
        };

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before UNIX_EPOCH")
            .as_nanos();
        let schema = format!(
            "pgtrigger_test_{test}_{}_{}",
            std::process::id(),
            nanos % 1_000_000_000_000
        );

        let client = connect(&database_url, &schema).await?;
        client
            .batch_execute(&format!("CREATE SCHEMA \"{schema}\"; SET search_path TO \"{schema}\";"))
            .await
            .map_err(TriggerError::from_db_error)?;

        Ok(Some(Self {
            client,
            database_url,
            schema,
        }))
    }

    /// A second connection on the same schema.
    pub async fn connect_again(&self) -> TriggerResult<tokio_postgres::Client> {
        let client = connect(&self.database_url, &self.schema).await?;
        client
            .batch_execute(&format!("SET search_path TO \"{}\";", self.schema))
            .await
            .map_err(TriggerError::from_db_error)?;
        Ok(client)
    }

    pub fn settings(&self) -> Settings {
        Settings::default().with_schema(self.schema.clone())
    }

    pub async fn drop_schema(self) -> TriggerResult<()> {
        self.client
            .batch_execute(&format!("DROP SCHEMA \"{}\" CASCADE;", self.schema))
            .await
            .map_err(TriggerError::from_db_error)
    }
}

async fn connect(database_url: &str, schema: &str) -> TriggerResult<tokio_postgres::Client> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls)
        .await
        .map_err(TriggerError::from_db_error)?;
    let schema = schema.to_string();
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            eprintln!("connection error ({schema}): {err}");
        }
    });
    Ok(client)
}

/// Register `triggers` for `entity` into a fresh registry.
pub fn registry(entity: &pgtrigger::EntityMeta, triggers: Vec<pgtrigger::Trigger>) -> Registry {
    let mut registry = Registry::new();
    for trigger in triggers {
        registry
            .register(entity, trigger)
            .expect("trigger registers");
    }
    registry
}

/// Message of a database error raised by a trigger body.
pub fn db_message(err: &TriggerError) -> String {
    match err {
        TriggerError::Query(e) => e
            .as_db_error()
            .map(|db| db.message().to_string())
            .unwrap_or_else(|| e.to_string()),
        other => other.to_string(),
    }
}
