//! campaign-tags: inspect the built-in vendor adaptors and dry-run their
//! lifecycle against the in-memory sandbox.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use campaign_adaptors::builtin_catalog;
use campaign_core::config::AppConfig;
use campaign_core::event_bus::{capture_sink, LifecycleEvent};
use campaign_core::{Call, VendorCall};
use campaign_tags::{
    Catalog, CompletionSource, InitOutcome, Integration, LifecycleState, SandboxEnvironment,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-tags")]
#[command(about = "Inspect and dry-run analytics tag integrations")]
#[command(version)]
struct Cli {
    /// Base name of an optional config file (overrides `campaign-tags`)
    #[arg(long, env = "CAMPAIGN_TAGS_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in integrations
    List,
    /// Print an integration's declaration as JSON
    Describe { name: String },
    /// Render the tag an integration would inject
    Render {
        name: String,
        /// Option override, `key=value` (value parsed as JSON, else a string)
        #[arg(short = 'o', long = "option", value_parser = parse_option)]
        options: Vec<(String, Value)>,
        /// Render this named tag instead of the one the adaptor selects
        #[arg(long)]
        tag: Option<String>,
    },
    /// Initialize an integration in the sandbox, replay calls and settle it
    Simulate {
        name: String,
        #[arg(short = 'o', long = "option", value_parser = parse_option)]
        options: Vec<(String, Value)>,
        /// JSON file holding an array of calls, e.g. `[{"method":"track","event":"Signed Up"}]`
        #[arg(long)]
        calls: Option<PathBuf>,
        /// How the injected tag settles
        #[arg(long, value_enum, default_value_t = Settle::Load)]
        settle: Settle,
        /// Advance the virtual clock before settling
        #[arg(long, default_value_t = 0)]
        advance_ms: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Settle {
    /// Fire the script load event (and the vendor callback, if any)
    Load,
    /// Fire the script error event
    Error,
    /// Leave the load outstanding
    None,
}

fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty option name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[derive(Serialize)]
struct Description<'a> {
    name: &'a str,
    globals: &'a [String],
    options: Map<String, Value>,
    tags: Vec<TagView<'a>>,
    assumes_pageview: bool,
    completion: String,
    load_timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct TagView<'a> {
    name: &'a str,
    template: &'a str,
    placeholders: &'a [String],
    loaded_when: &'a [String],
}

#[derive(Serialize)]
struct SimulationReport {
    integration: String,
    outcome: String,
    state: LifecycleState,
    injected: Vec<String>,
    events: Vec<LifecycleEvent>,
    invocations: Vec<String>,
    raw_invocations: Vec<VendorCall>,
    queued: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campaign_tags=info,campaign_tags_cli=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let loaded = match cli.config.as_deref() {
        Some(file) => AppConfig::load_from(file),
        None => AppConfig::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    info!(
        script_timeout_ms = ?config.loader.script_timeout_ms,
        vendor_callback_timeout_ms = config.loader.vendor_callback_timeout_ms,
        max_redrain = config.queue.max_redrain,
        "Configuration loaded"
    );

    let catalog = builtin_catalog()?;

    match cli.command {
        Command::List => {
            for name in catalog.names() {
                println!("{name}");
            }
        }
        Command::Describe { name } => {
            let entry = catalog
                .get(&name)
                .ok_or_else(|| anyhow!("unknown integration '{name}'"))?;
            let descriptor = &entry.descriptor;
            let description = Description {
                name: descriptor.name(),
                globals: descriptor.globals(),
                options: descriptor
                    .options()
                    .iter()
                    .map(|o| (o.name.clone(), o.default.clone()))
                    .collect(),
                tags: descriptor
                    .tags()
                    .iter()
                    .map(|t| TagView {
                        name: &t.name,
                        template: t.template.source(),
                        placeholders: t.template.placeholders(),
                        loaded_when: descriptor.presence(Some(&t.name)),
                    })
                    .collect(),
                assumes_pageview: descriptor.assumes_pageview(),
                completion: match descriptor.completion() {
                    CompletionSource::ScriptLoad => "script_load".to_string(),
                    CompletionSource::VendorCallback { callback } => {
                        format!("vendor_callback:{callback}")
                    }
                },
                load_timeout_ms: descriptor.load_timeout().map(|t| t.as_millis() as u64),
            };
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        Command::Render { name, options, tag } => {
            let entry = catalog
                .get(&name)
                .ok_or_else(|| anyhow!("unknown integration '{name}'"))?;
            let overrides: Map<String, Value> = options.into_iter().collect();
            let resolved = entry.descriptor.resolve_options(&overrides);
            let selected = tag.or_else(|| entry.mapping.select_tag(&resolved));
            let named = entry
                .descriptor
                .tag(selected.as_deref())
                .ok_or_else(|| anyhow!("{name} has no tag {selected:?}"))?;
            let rendered = named.template.render(&resolved)?;
            println!("{rendered}");
            if let Some(url) = rendered.url()? {
                info!(integration = %name, tag = %named.name, %url, "tag rendered");
            }
        }
        Command::Simulate {
            name,
            options,
            calls,
            settle,
            advance_ms,
        } => {
            let calls = match calls {
                Some(path) => read_calls(&path)?,
                None => Vec::new(),
            };
            let report = simulate(
                &catalog,
                &config,
                &name,
                options.into_iter().collect(),
                calls,
                settle,
                Duration::from_millis(advance_ms),
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn read_calls(path: &Path) -> anyhow::Result<Vec<Call>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading calls from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing calls in {}", path.display()))
}

/// Calls issued before settlement are buffered by the integration, so the
/// report shows exactly what the vendor would have received.
fn simulate(
    catalog: &Catalog,
    config: &AppConfig,
    name: &str,
    settings: Map<String, Value>,
    calls: Vec<Call>,
    settle: Settle,
    advance: Duration,
) -> anyhow::Result<SimulationReport> {
    let env = Arc::new(SandboxEnvironment::new());
    let sink = capture_sink();
    let integration: Integration = catalog.instantiate(name, &settings, env.clone(), config)?;
    integration.set_event_sink(sink.clone());

    let outcome = integration.initialize();
    for call in calls {
        integration.call(call);
    }

    if !advance.is_zero() {
        env.advance(advance);
    }
    if outcome == InitOutcome::Loading {
        match settle {
            Settle::Load => {
                env.fire_load("");
                if let CompletionSource::VendorCallback { callback } =
                    integration.descriptor().completion()
                {
                    env.fire_vendor_ready(callback);
                }
            }
            Settle::Error => {
                env.fire_error("", "simulated error event");
            }
            Settle::None => {}
        }
    }

    let invocations = env.invocations();
    Ok(SimulationReport {
        integration: integration.name().to_string(),
        outcome: format!("{outcome:?}"),
        state: integration.state(),
        injected: env.injected().iter().map(ToString::to_string).collect(),
        events: sink.events(),
        invocations: invocations.iter().map(ToString::to_string).collect(),
        raw_invocations: invocations,
        queued: integration.queued(),
    })
}
