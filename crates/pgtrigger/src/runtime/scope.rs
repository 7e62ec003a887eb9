use super::client::TriggerClient;
use crate::client::GenericClient;
use crate::error::{TriggerError, TriggerResult};
use crate::ident::{Ident, IdentPart};

/// Triggers ignored on one connection.
///
/// Await [`release`](Self::release) when done. Dropping the scope instead
/// unwinds the in-memory state and queues the database reset for the next
/// statement sent through the client, or for
/// [`TriggerClient::into_inner`].
#[must_use = "the scope ends as soon as it is dropped"]
pub struct IgnoreScope<'a, C: GenericClient> {
    client: &'a TriggerClient<C>,
    added: Vec<String>,
    released: bool,
}

impl<'a, C: GenericClient> IgnoreScope<'a, C> {
    pub(super) fn enter(client: &'a TriggerClient<C>, pgids: Vec<String>) -> Self {
        client.lock().ignore_sessions += 1;
        let added = client.runtime().add_ignored(pgids);
        tracing::debug!(target: "pgtrigger.runtime", ignored = ?added, "ignore scope entered");
        Self {
            client,
            added,
            released: false,
        }
    }

    /// Ids this scope added; ids already ignored by an outer scope are not
    /// listed and stay ignored after release.
    pub fn added(&self) -> &[String] {
        &self.added
    }

    pub async fn release(mut self) -> TriggerResult<()> {
        self.released = true;
        self.client.runtime().remove_ignored(&self.added);
        match self.client.close_ignore_session(false) {
            Some(sql) => self.client.send_runtime_sql(&sql).await,
            None => Ok(()),
        }
    }
}

impl<C: GenericClient> Drop for IgnoreScope<'_, C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.client.runtime().remove_ignored(&self.added);
        let _ = self.client.close_ignore_session(true);
    }
}

/// Schema name as Postgres resolves it: one identifier, unquoted names
/// folded to lowercase.
pub(super) fn schema_name(raw: &str) -> TriggerResult<String> {
    let invalid =
        |reason: String| TriggerError::usage(format!("Invalid schema name {raw:?}: {reason}"));
    let ident = Ident::parse(raw.trim()).map_err(|e| match e {
        TriggerError::Usage(reason) => invalid(reason),
        other => other,
    })?;
    match ident.parts.as_slice() {
        [IdentPart::Unquoted(name)] => Ok(name.to_lowercase()),
        [IdentPart::Quoted(name)] => Ok(name.clone()),
        _ => Err(invalid("expected a single identifier".to_string())),
    }
}

/// Schemas appended to the search path on one connection.
///
/// The search path captured when the first schema session opened on the
/// connection is restored when the last one closes.
#[must_use = "the scope ends as soon as it is dropped"]
pub struct SchemaScope<'a, C: GenericClient> {
    client: &'a TriggerClient<C>,
    added: Vec<String>,
    released: bool,
}

impl<'a, C: GenericClient> SchemaScope<'a, C> {
    pub(super) async fn enter<S: AsRef<str>>(
        client: &'a TriggerClient<C>,
        schemas: &[S],
    ) -> TriggerResult<Self> {
        let names = schemas
            .iter()
            .map(|s| schema_name(s.as_ref()))
            .collect::<TriggerResult<Vec<_>>>()?;
        client.open_schema_session().await?;
        let added = client.runtime().add_schemas(names);
        tracing::debug!(target: "pgtrigger.runtime", schemas = ?added, "schema scope entered");
        Ok(Self {
            client,
            added,
            released: false,
        })
    }

    pub fn added(&self) -> &[String] {
        &self.added
    }

    pub async fn release(mut self) -> TriggerResult<()> {
        self.released = true;
        self.client.runtime().remove_schemas(&self.added);
        match self.client.close_schema_session(false) {
            Some(sql) => self.client.send_runtime_sql(&sql).await,
            None => Ok(()),
        }
    }
}

impl<C: GenericClient> Drop for SchemaScope<'_, C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.client.runtime().remove_schemas(&self.added);
        let _ = self.client.close_schema_session(true);
    }
}

/// Arms several connections for ignoring at once.
///
/// Ids added later by an [`IgnoreScope`] on any client sharing the same
/// [`Runtime`](super::Runtime) are then applied on all of them.
#[must_use = "the session ends as soon as it is dropped"]
pub struct IgnoreSession<'a, C: GenericClient> {
    clients: Vec<&'a TriggerClient<C>>,
    released: bool,
}

impl<'a, C: GenericClient> IgnoreSession<'a, C> {
    pub fn enter(clients: &[&'a TriggerClient<C>]) -> Self {
        for client in clients {
            client.lock().ignore_sessions += 1;
        }
        Self {
            clients: clients.to_vec(),
            released: false,
        }
    }

    /// Close the session on every connection, reporting the first failure.
    pub async fn release(mut self) -> TriggerResult<()> {
        self.released = true;
        let mut first_err = None;
        for client in &self.clients {
            if let Some(sql) = client.close_ignore_session(false) {
                if let Err(e) = client.send_runtime_sql(&sql).await {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<C: GenericClient> Drop for IgnoreSession<'_, C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for client in &self.clients {
            let _ = client.close_ignore_session(true);
        }
    }
}

/// Arms several connections for search-path scoping at once.
#[must_use = "the session ends as soon as it is dropped"]
pub struct SchemaSession<'a, C: GenericClient> {
    clients: Vec<&'a TriggerClient<C>>,
    released: bool,
}

impl<'a, C: GenericClient> SchemaSession<'a, C> {
    pub async fn enter(clients: &[&'a TriggerClient<C>]) -> TriggerResult<Self> {
        let mut opened: Vec<&'a TriggerClient<C>> = Vec::with_capacity(clients.len());
        for client in clients {
            if let Err(e) = client.open_schema_session().await {
                for done in &opened {
                    let _ = done.close_schema_session(true);
                }
                return Err(e);
            }
            opened.push(client);
        }
        Ok(Self {
            clients: opened,
            released: false,
        })
    }

    pub async fn release(mut self) -> TriggerResult<()> {
        self.released = true;
        let mut first_err = None;
        for client in &self.clients {
            if let Some(sql) = client.close_schema_session(false) {
                if let Err(e) = client.send_runtime_sql(&sql).await {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<C: GenericClient> Drop for SchemaSession<'_, C> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for client in &self.clients {
            let _ = client.close_schema_session(true);
        }
    }
}
