use crate::cli::TriggerArgs;
use crate::config::ProjectConfig;
use anyhow::Context;
use colored::Colorize;
use pgtrigger::{
    DefaultRouter, GenericClient, InstallState, PruneCandidate, Reconciler, Registry, Settings,
    Status, TracingSqlHook, TriggerClient,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ls,
    Install { prune: bool },
    Uninstall { prune: bool },
    Enable,
    Disable,
    Prune,
}

impl Action {
    /// Command name, used to tag the statements it sends.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Ls => "ls",
            Action::Install { .. } => "install",
            Action::Uninstall { .. } => "uninstall",
            Action::Enable => "enable",
            Action::Disable => "disable",
            Action::Prune => "prune",
        }
    }

    /// Pruning after a bulk run also needs `prune_on_install`.
    fn with_settings(self, settings: &Settings) -> Self {
        match self {
            Action::Install { prune } => Action::Install {
                prune: prune && settings.prune_on_install,
            },
            Action::Uninstall { prune } => Action::Uninstall {
                prune: prune && settings.prune_on_install,
            },
            other => other,
        }
    }
}

/// Database alias -> URIs to act on there (empty: every trigger).
pub fn plan(
    args: &TriggerArgs,
    project: &ProjectConfig,
    registry: &Registry,
) -> anyhow::Result<BTreeMap<String, Vec<String>>> {
    let mut targets: BTreeMap<String, Vec<String>> = BTreeMap::new();

    if !args.uris.is_empty() {
        for entry in registry.resolve(&args.uris)? {
            targets
                .entry(entry.database(&DefaultRouter))
                .or_default()
                .push(entry.uri.clone());
        }
    } else if !args.databases.is_empty() {
        for name in &args.databases {
            targets.entry(name.clone()).or_default();
        }
    } else {
        for db in &project.file.databases {
            targets.entry(db.name.clone()).or_default();
        }
    }

    for name in targets.keys() {
        project.database(name)?;
    }
    Ok(targets)
}

pub async fn run(action: Action, args: TriggerArgs) -> anyhow::Result<()> {
    let project = ProjectConfig::load(&args.config)?;
    let count = pgtrigger::registry::bootstrap()?;
    tracing::debug!(triggers = count, config = ?project.config_path, "registry bootstrapped");
    let registry = pgtrigger::registry::snapshot();
    let settings = &project.file.settings;
    let action = action.with_settings(settings);

    for (database, uris) in plan(&args, &project, &registry)? {
        let db = project.database(&database)?;
        let client = TriggerClient::new(connect(&db.url).await?)
            .with_tag(action.name())
            .with_hook(TracingSqlHook::new());
        let reconciler = Reconciler::new(&registry, settings).with_database(database.as_str());

        if args.schemas.is_empty() {
            apply(action, &client, &reconciler, &uris).await?;
        } else {
            let scope = client.schema(&args.schemas).await?;
            let result = apply(action, &client, &reconciler, &uris).await;
            let released = scope.release().await;
            result?;
            released?;
        }
    }
    Ok(())
}

async fn connect(database_url: &str) -> anyhow::Result<tokio_postgres::Client> {
    let (client, connection) = tokio_postgres::connect(database_url, tokio_postgres::NoTls)
        .await
        .context("failed to connect to database")?;

    tokio::spawn(async move {
        if let Err(err) = connection.await {
            eprintln!("connection error: {err}");
        }
    });

    Ok(client)
}

async fn apply<C: GenericClient>(
    action: Action,
    client: &C,
    reconciler: &Reconciler<'_>,
    uris: &[String],
) -> anyhow::Result<()> {
    match action {
        Action::Ls => {
            for (entry, status) in reconciler.ls(client, uris).await? {
                println!("{}", status_line(&entry.uri, reconciler.database(), &status));
            }
            if uris.is_empty() {
                for candidate in reconciler.prunable(client).await? {
                    println!("{}", prune_line(&candidate, reconciler.database()));
                }
            }
        }
        Action::Install { prune } => reconciler.install_with(client, uris, prune).await?,
        Action::Uninstall { prune } => reconciler.uninstall_with(client, uris, prune).await?,
        Action::Enable => reconciler.enable(client, uris).await?,
        Action::Disable => reconciler.disable(client, uris).await?,
        Action::Prune => {
            reconciler.prune(client).await?;
        }
    }
    Ok(())
}

fn enabled_label(enabled: Option<bool>) -> colored::ColoredString {
    match enabled {
        Some(true) => "ENABLED".green(),
        Some(false) => "DISABLED".red(),
        None => "".normal(),
    }
}

/// `{uri}\t{database}\t{STATE}\t{ENABLED}`
pub fn status_line(uri: &str, database: &str, status: &Status) -> String {
    let state = status.state.to_string();
    let state = match status.state {
        InstallState::Installed => state.green(),
        InstallState::Outdated => state.yellow(),
        InstallState::Uninstalled => state.red(),
        InstallState::Unallowed => state.dimmed(),
    };
    format!("{uri}\t{database}\t{state}\t{}", enabled_label(status.enabled))
}

pub fn prune_line(candidate: &PruneCandidate, database: &str) -> String {
    format!(
        "{}:{}\t{database}\t{}\t{}",
        candidate.table,
        candidate.pgid,
        "PRUNE".magenta(),
        enabled_label(Some(candidate.enabled))
    )
}
