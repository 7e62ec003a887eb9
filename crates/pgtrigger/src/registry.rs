//! The declared world: which triggers exist on which entities.
//!
//! [`Registry`] is a plain value keyed by trigger URI (`{entity}:{trigger}`).
//! The process-wide instance lives behind [`global`] and is filled at startup
//! by [`bootstrap`], which applies every registration submitted with
//! [`register_triggers!`](crate::register_triggers) or `#[derive(Entity)]`.
//!
//! Tests and embedding hosts mutate the global registry through
//! [`register_scoped`] / [`unregister_scoped`], whose guards undo the change
//! when dropped.

use crate::entity::{EntityMeta, Router, write_database};
use crate::error::{TriggerError, TriggerResult};
use crate::ident::quote;
use crate::trigger::{Trigger, TriggerBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One registered (entity, trigger) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTrigger {
    pub uri: String,
    pub pgid: String,
    pub entity: EntityMeta,
    pub trigger: Trigger,
}

impl RegisteredTrigger {
    pub fn table(&self) -> &str {
        &self.entity.table
    }

    /// Database alias the trigger lives in.
    pub fn database(&self, router: &dyn Router) -> String {
        write_database(router, &self.entity)
    }
}

/// Registered triggers keyed by URI.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, RegisteredTrigger>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredTrigger> {
        self.entries.values()
    }

    pub fn get(&self, uri: &str) -> Option<&RegisteredTrigger> {
        self.entries.get(uri)
    }

    pub fn by_pgid(&self, pgid: &str) -> Option<&RegisteredTrigger> {
        self.entries.values().find(|e| e.pgid == pgid)
    }

    /// Register `trigger` on `entity`.
    ///
    /// Registering an identical definition again is a no-op. A different
    /// trigger with the same name on the same table, or any trigger whose
    /// pgid is already taken, is rejected.
    pub fn register(&mut self, entity: &EntityMeta, trigger: Trigger) -> TriggerResult<()> {
        let uri = trigger.uri(entity);
        let pgid = trigger.pgid(entity)?;

        let same_name = self
            .entries
            .values()
            .find(|e| e.entity.table == entity.table && e.trigger.name() == trigger.name());

        match same_name {
            Some(existing) if existing.trigger == trigger => {}
            Some(existing) => {
                return Err(TriggerError::NameAlreadyUsed {
                    name: trigger.name().to_string(),
                    table: entity.table.clone(),
                    existing: existing.uri.clone(),
                });
            }
            None => {
                if let Some(existing) = self.by_pgid(&pgid) {
                    return Err(TriggerError::FunctionNameAlreadyUsed {
                        pgid,
                        existing: existing.uri.clone(),
                    });
                }
            }
        }

        self.entries.insert(
            uri.clone(),
            RegisteredTrigger {
                uri,
                pgid,
                entity: entity.clone(),
                trigger,
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, uri: &str) -> Option<RegisteredTrigger> {
        self.entries.remove(uri)
    }

    /// Look up every URI, failing on the first malformed or unknown one.
    pub fn resolve<S: AsRef<str>>(&self, uris: &[S]) -> TriggerResult<Vec<&RegisteredTrigger>> {
        uris.iter()
            .map(|uri| {
                let uri = uri.as_ref();
                if !uri.contains(':') {
                    return Err(TriggerError::InvalidUri(uri.to_string()));
                }
                self.entries
                    .get(uri)
                    .ok_or_else(|| TriggerError::NotRegistered(uri.to_string()))
            })
            .collect()
    }

    /// Triggers matching `uris`, or every trigger living in one of `databases`.
    ///
    /// With neither, every registered trigger is returned.
    pub fn select<S: AsRef<str>>(
        &self,
        uris: &[S],
        databases: Option<&[String]>,
        router: &dyn Router,
    ) -> TriggerResult<Vec<&RegisteredTrigger>> {
        if !uris.is_empty() {
            if databases.is_some_and(|d| !d.is_empty()) {
                return Err(TriggerError::usage(
                    "Cannot supply both trigger URIs and a database",
                ));
            }
            return self.resolve(uris);
        }
        Ok(self
            .entries
            .values()
            .filter(|e| match databases {
                Some(dbs) if !dbs.is_empty() => dbs.contains(&e.database(router)),
                _ => true,
            })
            .collect())
    }

    /// Every database alias that holds at least one trigger.
    pub fn databases(&self, router: &dyn Router) -> BTreeSet<String> {
        self.entries.values().map(|e| e.database(router)).collect()
    }

    /// `(quoted table, pgid)` pairs the catalog is expected to contain.
    pub fn installed_pairs(&self) -> BTreeSet<(String, String)> {
        self.entries
            .values()
            .map(|e| (quote(&e.entity.table), e.pgid.clone()))
            .collect()
    }
}

/// Anything that can be turned into a validated [`Trigger`].
pub trait IntoTrigger {
    fn into_trigger(self) -> TriggerResult<Trigger>;
}

impl IntoTrigger for Trigger {
    fn into_trigger(self) -> TriggerResult<Trigger> {
        Ok(self)
    }
}

impl IntoTrigger for TriggerBuilder {
    fn into_trigger(self) -> TriggerResult<Trigger> {
        self.build()
    }
}

impl IntoTrigger for TriggerResult<Trigger> {
    fn into_trigger(self) -> TriggerResult<Trigger> {
        self
    }
}

/// Startup registration collected with `inventory`.
pub struct TriggerRegistration {
    pub register_fn: fn(&mut Registry) -> TriggerResult<()>,
}

inventory::collect!(TriggerRegistration);

/// Register triggers for an [`Entity`](crate::Entity) at startup.
///
/// ```ignore
/// pgtrigger::register_triggers!(Book => [
///     Trigger::protect("protect_deletes", Operation::Delete),
///     Trigger::soft_delete("soft_delete", "is_active", false),
/// ]);
/// ```
#[macro_export]
macro_rules! register_triggers {
    ($entity:ty => [$($trigger:expr),* $(,)?]) => {
        $crate::inventory::submit! {
            $crate::registry::TriggerRegistration {
                register_fn: |registry| {
                    let meta = <$entity as $crate::Entity>::meta();
                    $(
                        registry.register(
                            &meta,
                            $crate::registry::IntoTrigger::into_trigger($trigger)?,
                        )?;
                    )*
                    Ok(())
                },
            }
        }
    };
}

static GLOBAL: OnceLock<RwLock<Registry>> = OnceLock::new();

/// The process-wide registry.
pub fn global() -> &'static RwLock<Registry> {
    GLOBAL.get_or_init(|| RwLock::new(Registry::new()))
}

/// Shared read access to the global registry.
pub fn read() -> RwLockReadGuard<'static, Registry> {
    global().read().unwrap_or_else(PoisonError::into_inner)
}

fn write() -> RwLockWriteGuard<'static, Registry> {
    global().write().unwrap_or_else(PoisonError::into_inner)
}

/// Copy of the global registry.
pub fn snapshot() -> Registry {
    read().clone()
}

/// Apply every `inventory` registration to the global registry.
///
/// Safe to call more than once. Returns the number of registered triggers.
pub fn bootstrap() -> TriggerResult<usize> {
    let mut registry = write();
    for registration in inventory::iter::<TriggerRegistration> {
        (registration.register_fn)(&mut registry)?;
    }
    tracing::debug!(target: "pgtrigger", count = registry.len(), "registry bootstrapped");
    Ok(registry.len())
}

/// Remove everything from the global registry.
pub fn reset() {
    *write() = Registry::new();
}

/// Register on the global registry.
pub fn register(entity: &EntityMeta, trigger: impl IntoTrigger) -> TriggerResult<()> {
    write().register(entity, trigger.into_trigger()?)
}

/// Unregister from the global registry.
pub fn unregister(uri: &str) -> Option<RegisteredTrigger> {
    write().unregister(uri)
}

/// Restores the global registry entry it replaced when dropped.
#[must_use = "the registration is undone as soon as the guard is dropped"]
pub struct RegistrationGuard {
    uri: String,
    previous: Option<RegisteredTrigger>,
}

impl RegistrationGuard {
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let mut registry = write();
        registry.entries.remove(&self.uri);
        if let Some(previous) = self.previous.take() {
            registry.entries.insert(previous.uri.clone(), previous);
        }
    }
}

/// Register on the global registry until the guard drops.
pub fn register_scoped(
    entity: &EntityMeta,
    trigger: impl IntoTrigger,
) -> TriggerResult<RegistrationGuard> {
    let trigger = trigger.into_trigger()?;
    let uri = trigger.uri(entity);
    let mut registry = write();
    let previous = registry.get(&uri).cloned();
    registry.register(entity, trigger)?;
    Ok(RegistrationGuard { uri, previous })
}

/// Unregister from the global registry until the guard drops.
pub fn unregister_scoped(uri: &str) -> TriggerResult<RegistrationGuard> {
    let mut registry = write();
    let previous = registry
        .unregister(uri)
        .ok_or_else(|| TriggerError::NotRegistered(uri.to_string()))?;
    Ok(RegistrationGuard {
        uri: uri.to_string(),
        previous: Some(previous),
    })
}
