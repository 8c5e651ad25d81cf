//! Command line surface.
//!
//! The fixed part (target, subcommands, dataset options) is derived with
//! clap; one option per configurable attribute is generated from
//! [`crate::schema`] on top of it. Universal attributes are global options,
//! synthetic ones exist only on the `synthetic` subcommand.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use serde_json::{Map, Value as JsonValue};

use crate::backend::{BackendConfig, StorageBackedConfig, SyntheticConfig};
use crate::error::LaunchError;
use crate::launcher::LaunchPlan;
use crate::overrides::OverrideRule;
use crate::schema::{attributes_in_scope, AttributeScope, AttributeSpec};
use crate::transport::{PlatformCapability, TargetAddress};

/// Reserved prefix of generated argument ids.
pub const OVERRIDE_PREFIX: &str = "override:";

#[derive(Parser, Debug)]
#[command(
    name = "vecu",
    version,
    about = "Virtual diagnostic ECU: serve UDS responses over TCP, ISO-TP or local sockets"
)]
pub struct Cli {
    /// JSON configuration file (log filter, transport tuning, overrides).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log filter directive, e.g. "debug" or "vecu=trace". VECU_LOG wins.
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,

    /// Target address: tcp://HOST:PORT, unix-lines:///PATH or
    /// isotp://IFACE?src_addr=ID&dst_addr=ID.
    pub target: String,

    #[command(subcommand)]
    pub command: BackendCommand,
}

#[derive(Subcommand, Debug)]
pub enum BackendCommand {
    /// Replay responses recorded in a dataset file.
    #[command(name = "storage-backed", visible_alias = "db")]
    StorageBacked(StorageArgs),
    /// Derive plausible responses from a seed.
    #[command(visible_alias = "rng")]
    Synthetic(SyntheticArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Dataset file with recorded request/response pairs.
    pub path: PathBuf,
    /// Only use records of this unit.
    #[arg(long)]
    pub unit_name: Option<String>,
    /// JSON object merged over the dataset's own properties.
    #[arg(long, value_name = "JSON", value_parser = parse_properties)]
    pub properties: Option<Map<String, JsonValue>>,
}

#[derive(Args, Debug, Clone)]
pub struct SyntheticArgs {
    /// Seed for every random draw; generated and logged when omitted.
    #[arg(long)]
    pub seed: Option<u64>,
}

fn parse_properties(raw: &str) -> Result<Map<String, JsonValue>, String> {
    match serde_json::from_str(raw) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

fn override_id(spec: &AttributeSpec) -> String {
    format!("{OVERRIDE_PREFIX}{}", spec.name)
}

fn override_arg(spec: &AttributeSpec, heading: &'static str) -> Arg {
    Arg::new(override_id(spec))
        .long(spec.flag())
        .alias(spec.name)
        .value_name("EXPR")
        .action(ArgAction::Append)
        .help(format!("{} [{}]", spec.help, spec.kind))
        .help_heading(heading)
}

/// Full command: derived arguments plus one option per attribute.
pub fn command() -> clap::Command {
    let universal = attributes_in_scope(AttributeScope::Universal);
    let cmd = universal.iter().fold(Cli::command(), |cmd, spec| {
        cmd.arg(override_arg(spec, "Default responses").global(true))
    });
    cmd.mut_subcommand("synthetic", |sub| {
        attributes_in_scope(AttributeScope::Synthetic)
            .iter()
            .fold(sub, |sub, spec| sub.arg(override_arg(spec, "Synthetic backend")))
    })
}

/// Parsed command line.
#[derive(Debug)]
pub struct Invocation {
    pub cli: Cli,
    pub overrides: Vec<OverrideRule>,
}

impl Invocation {
    /// Typed launch plan. Fails on a malformed target address.
    pub fn into_plan(self, capability: PlatformCapability) -> Result<LaunchPlan, LaunchError> {
        let target: TargetAddress = self.cli.target.parse()?;
        let backend = match self.cli.command {
            BackendCommand::StorageBacked(args) => BackendConfig::StorageBacked(StorageBackedConfig {
                path: args.path,
                unit_name: args.unit_name,
                properties: args.properties,
            }),
            BackendCommand::Synthetic(args) => BackendConfig::Synthetic(
                args.seed
                    .map(|seed| SyntheticConfig { seed })
                    .unwrap_or_default(),
            ),
        };
        Ok(LaunchPlan {
            target,
            backend,
            overrides: self.overrides,
            capability,
        })
    }
}

/// Parse `args` (including the program name).
///
/// # Errors
/// clap's usage error for unknown options, missing arguments, `--help` and
/// `--version`.
pub fn parse_from<I, T>(args: I) -> Result<Invocation, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    let cli = Cli::from_arg_matches(&matches)?;
    let overrides = collect_overrides(&matches);
    Ok(Invocation { cli, overrides })
}

/// One rule per given attribute, holding its last occurrence, in argv order.
pub fn collect_overrides(matches: &ArgMatches) -> Vec<OverrideRule> {
    let scopes: Vec<&ArgMatches> = matches
        .subcommand()
        .map(|(_, sub)| sub)
        .into_iter()
        .chain(std::iter::once(matches))
        .collect();

    let mut rules = Vec::new();
    let declared = attributes_in_scope(AttributeScope::Universal)
        .iter()
        .chain(attributes_in_scope(AttributeScope::Synthetic));
    for spec in declared {
        let id = override_id(spec);
        for scope in &scopes {
            let Ok(Some(values)) = scope.try_get_many::<String>(&id) else {
                continue;
            };
            let Some(expression) = values.last() else {
                continue;
            };
            let position = scope
                .indices_of(&id)
                .and_then(|indices| indices.last())
                .unwrap_or(0);
            rules.push(OverrideRule::new(spec.name, expression.as_str(), position));
            break;
        }
    }
    rules.sort_by_key(|rule| rule.position);
    rules
}
