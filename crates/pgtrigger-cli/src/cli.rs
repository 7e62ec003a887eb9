use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Root,
    Ls,
    Install,
    Uninstall,
    Enable,
    Disable,
    Prune,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help(HelpTopic),
    Ls(TriggerArgs),
    Install(TriggerArgs),
    Uninstall(TriggerArgs),
    Enable(TriggerArgs),
    Disable(TriggerArgs),
    Prune(TriggerArgs),
}

/// Options shared by every management command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerArgs {
    pub config: PathBuf,
    /// `entity:trigger` URIs; empty means every registered trigger.
    pub uris: Vec<String>,
    pub databases: Vec<String>,
    /// Schemas put on the search path while the command runs.
    pub schemas: Vec<String>,
    pub no_prune: bool,
}

impl Default for TriggerArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from("pgtrigger.toml"),
            uris: Vec::new(),
            databases: Vec::new(),
            schemas: Vec::new(),
            no_prune: false,
        }
    }
}

pub fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut it = args.iter().skip(1);
    let Some(first) = it.next() else {
        return Ok(Command::Help(HelpTopic::Root));
    };

    let (topic, build): (HelpTopic, fn(TriggerArgs) -> Command) = match first.as_str() {
        "-h" | "--help" | "help" => return Ok(Command::Help(HelpTopic::Root)),
        "ls" => (HelpTopic::Ls, Command::Ls),
        "install" => (HelpTopic::Install, Command::Install),
        "uninstall" => (HelpTopic::Uninstall, Command::Uninstall),
        "enable" => (HelpTopic::Enable, Command::Enable),
        "disable" => (HelpTopic::Disable, Command::Disable),
        "prune" => (HelpTopic::Prune, Command::Prune),
        _ => anyhow::bail!("unknown command: {first}"),
    };

    let mut parsed = TriggerArgs::default();
    while let Some(token) = it.next() {
        match token.as_str() {
            "-h" | "--help" => return Ok(Command::Help(topic)),
            "--config" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("--config requires a value");
                };
                parsed.config = PathBuf::from(v);
            }
            _ if token.starts_with("--config=") => {
                parsed.config = PathBuf::from(token.trim_start_matches("--config="));
            }
            "-d" | "--database" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("{token} requires a value");
                };
                parsed.databases.push(v.to_string());
            }
            _ if token.starts_with("--database=") => {
                parsed
                    .databases
                    .push(token.trim_start_matches("--database=").to_string());
            }
            "-s" | "--schema" => {
                let Some(v) = it.next() else {
                    anyhow::bail!("{token} requires a value");
                };
                parsed.schemas.push(v.to_string());
            }
            _ if token.starts_with("--schema=") => {
                parsed
                    .schemas
                    .push(token.trim_start_matches("--schema=").to_string());
            }
            "--no-prune" => {
                if !matches!(topic, HelpTopic::Install | HelpTopic::Uninstall) {
                    anyhow::bail!("--no-prune only applies to install and uninstall");
                }
                parsed.no_prune = true;
            }
            _ if token.starts_with('-') => anyhow::bail!("unknown option: {token}"),
            _ => parsed.uris.push(token.to_string()),
        }
    }

    if topic == HelpTopic::Prune && !parsed.uris.is_empty() {
        anyhow::bail!("prune does not take trigger URIs");
    }
    if !parsed.uris.is_empty() && !parsed.databases.is_empty() {
        anyhow::bail!("cannot supply both trigger URIs and a database");
    }

    Ok(build(parsed))
}

pub fn print_help(topic: HelpTopic) {
    match topic {
        HelpTopic::Root => {
            println!(
                "\
pgtrigger - manage registered Postgres triggers

USAGE:
  <app> <COMMAND> [URIS...] [OPTIONS]

COMMANDS:
  ls            List trigger status (and orphans that would be pruned)
  install       Install triggers
  uninstall     Uninstall triggers
  enable        Enable triggers
  disable       Disable triggers
  prune         Drop installed triggers that are no longer registered

OPTIONS:
  --config <FILE>         Config file path (default: pgtrigger.toml)
  -d, --database <NAME>   Only act on this database (repeatable)
  -s, --schema <NAME>     Add a schema to the search path (repeatable)
  -h, --help              Print help

URIs have the form <entity>:<trigger>, e.g. library.Book:protect_deletes.
Run `<app> <command> --help` for more."
            );
        }
        HelpTopic::Ls => {
            println!(
                "\
USAGE:
  <app> ls [URIS...] [OPTIONS]

Prints one line per trigger:
  <uri>  <database>  INSTALLED|UNINSTALLED|OUTDATED|UNALLOWED  ENABLED|DISABLED

Without URIs, installed triggers that nothing registers are listed as PRUNE."
            );
        }
        HelpTopic::Install | HelpTopic::Uninstall => {
            let verb = if topic == HelpTopic::Install {
                "install"
            } else {
                "uninstall"
            };
            println!(
                "\
USAGE:
  <app> {verb} [URIS...] [OPTIONS]

Without URIs, acts on every trigger not already {verb}ed and prunes
orphaned triggers afterwards.

OPTIONS:
  --no-prune              Skip pruning after a bulk {verb}"
            );
        }
        HelpTopic::Enable | HelpTopic::Disable => {
            let verb = if topic == HelpTopic::Enable {
                "enable"
            } else {
                "disable"
            };
            println!(
                "\
USAGE:
  <app> {verb} [URIS...] [OPTIONS]

Flips the enabled flag of installed triggers. Without URIs, acts on every
installed trigger that needs it."
            );
        }
        HelpTopic::Prune => {
            println!(
                "\
USAGE:
  <app> prune [OPTIONS]

Drops pgtrigger_* triggers on tables in the search path that no registered
trigger accounts for."
            );
        }
    }
}
