//! Cardwire CLI - check, sample and run dashboard manifests.

#![allow(
    clippy::needless_pass_by_value,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::print_stdout
)]

use anyhow::{bail, Context, Result};
use cardwire::yaml::Manifest;
use cardwire::{available_paths, Platform, RuntimeConfig};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cardwire")]
#[command(about = "Data binding and interaction runtime for dashboard widgets")]
#[command(version)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a manifest and list its problems
    Check {
        /// Path to manifest file
        #[arg(default_value = "dashboard.yaml")]
        manifest: PathBuf,
    },

    /// List the reachable paths of a JSON document (`-` reads stdin)
    Paths {
        /// Path to JSON file
        json: PathBuf,
    },

    /// Generate sample data for a widget type
    Sample {
        /// Path to manifest file
        manifest: PathBuf,

        /// Widget type declared in the manifest
        widget_type: String,
    },

    /// Execute every data pipeline once and print the results
    Run {
        /// Path to manifest file
        manifest: PathBuf,

        /// Only run the bindings of this instance
        #[arg(short, long)]
        instance: Option<String>,

        /// Runtime settings (TOML), replacing the manifest's runtime section
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = match cli.command {
        Commands::Check { manifest } => check(&manifest)?,
        Commands::Paths { json } => paths(&read_source(&json)?)?,
        Commands::Sample {
            manifest,
            widget_type,
        } => sample(&load_manifest(&manifest)?, &widget_type)?,
        Commands::Run {
            manifest,
            instance,
            config,
        } => {
            let manifest = load_manifest(&manifest)?;
            let config = match config {
                Some(path) => RuntimeConfig::load(&path)
                    .with_context(|| format!("cannot load config {}", path.display()))?,
                None => manifest.runtime_config(),
            };
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("cannot start async runtime")?;
            runtime.block_on(run(&manifest, config, instance.as_deref()))?
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "cardwire=debug" } else { "cardwire=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("cannot read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::load(path).with_context(|| format!("invalid manifest {}", path.display()))
}

/// Parse and validate; problems make the command fail after printing them.
fn check(path: &Path) -> Result<Value> {
    let manifest = load_manifest(path)?;
    let issues = manifest.issues();
    for issue in &issues {
        tracing::error!(manifest = %path.display(), %issue, "manifest problem");
    }
    if !issues.is_empty() {
        bail!("{} problem(s) in {}", issues.len(), path.display());
    }
    Ok(summary(&manifest))
}

fn summary(manifest: &Manifest) -> Value {
    let bindings = manifest
        .instances
        .iter()
        .filter(|i| i.data.is_some())
        .count();
    json!({
        "name": manifest.name,
        "widgets": manifest.widgets.keys().collect::<Vec<_>>(),
        "instances": manifest.instances.len(),
        "bindings": bindings,
    })
}

fn paths(document: &str) -> Result<Value> {
    let data: Value = serde_json::from_str(document).context("input is not JSON")?;
    Ok(serde_json::to_value(available_paths(&data))?)
}

fn sample(manifest: &Manifest, widget_type: &str) -> Result<Value> {
    let definition = manifest
        .widgets
        .get(widget_type)
        .with_context(|| format!("manifest declares no widget type '{widget_type}'"))?;
    let platform = Platform::init(manifest.runtime_config())?;
    if let Err(err) = platform.register_widget(widget_type, definition) {
        tracing::warn!(%widget_type, error = %err, "sampling the fallback requirement");
    }
    let sample = platform.requirements().generate_sample_data(widget_type)?;
    Ok(Value::Object(sample))
}

async fn run(manifest: &Manifest, config: RuntimeConfig, instance: Option<&str>) -> Result<Value> {
    let platform = Platform::init(config)?;
    platform.load_manifest(manifest)?;
    if let Some(id) = instance {
        if !platform.interactions().has_instance(id) {
            bail!("manifest declares no instance '{id}'");
        }
    }

    let outcomes = platform.run_once(instance).await;
    let results: Vec<Value> = outcomes
        .into_iter()
        .map(|outcome| match outcome.result {
            Ok(fields) => json!({
                "binding": outcome.binding_id,
                "instance": outcome.instance_id,
                "fields": fields,
            }),
            Err(err) => json!({
                "binding": outcome.binding_id,
                "instance": outcome.instance_id,
                "error": err.to_string(),
            }),
        })
        .collect();
    let ids = instance.map_or_else(
        || platform.interactions().registered_instances(),
        |id| vec![id.to_string()],
    );
    let state: serde_json::Map<String, Value> = ids
        .into_iter()
        .filter_map(|id| platform.state(&id).map(|s| (id, Value::Object(s))))
        .collect();
    Ok(json!({ "results": results, "state": state }))
}
