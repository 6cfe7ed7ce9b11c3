//! CLI subcommands: init, validate, synth, plan, apply, destroy, drift,
//! status, outputs, graph, schema, completions.

use crate::core::codegen::{self, TemplateFormat};
use crate::core::executor::{self, ApplyConfig, DestroyConfig};
use crate::core::stack::App;
use crate::core::{assembly, planner, resolver, state, types};
use crate::error::{Error, Result};
use crate::stacks;
use crate::tripwire::{drift, eventlog};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "wwapi",
    version,
    about = "Resource graph for the WWAPI retrieval chatbot: synth, plan, record, drift"
)]
pub struct Cli {
    /// More log output (repeatable; RUST_LOG overrides)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Template output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Json,
    Yaml,
}

impl From<Format> for TemplateFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => TemplateFormat::Json,
            Format::Yaml => TemplateFormat::Yaml,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new wwapi project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Parse wwapi.yaml, build the graph, and check every invariant
    Validate {
        /// Path to wwapi.yaml
        #[arg(short, long, default_value = "wwapi.yaml")]
        file: PathBuf,
    },

    /// Write the cloud assembly (templates, manifest, staged assets)
    Synth {
        #[arg(short, long, default_value = "wwapi.yaml")]
        file: PathBuf,

        /// Assembly output directory
        #[arg(short, long, default_value = "cdk.out")]
        out: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },

    /// Show execution plan (diff desired graph vs state locks)
    Plan {
        #[arg(short, long, default_value = "wwapi.yaml")]
        file: PathBuf,

        /// Target a single stack
        #[arg(short, long)]
        stack: Option<String>,

        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Synthesize, then record each stack in dependency order
    Apply {
        #[arg(short, long, default_value = "wwapi.yaml")]
        file: PathBuf,

        /// Target a single stack (its dependencies must be recorded)
        #[arg(short, long)]
        stack: Option<String>,

        /// Assembly output directory
        #[arg(short, long, default_value = "cdk.out")]
        out: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Re-record unchanged resources
        #[arg(long)]
        force: bool,

        /// Show what would be recorded without writing anything
        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Tear down recorded stacks in reverse dependency order
    Destroy {
        #[arg(short, long, default_value = "wwapi.yaml")]
        file: PathBuf,

        #[arg(short, long)]
        stack: Option<String>,

        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Compare written templates to lock hashes
    Drift {
        #[arg(short, long)]
        stack: Option<String>,

        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Exit non-zero on any drift and log findings (for CI/cron)
        #[arg(long)]
        tripwire: bool,
    },

    /// Show current state from lock files
    Status {
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Print declared stack outputs
    Outputs {
        #[arg(short, long, default_value = "wwapi.yaml")]
        file: PathBuf,

        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Print stack and resource orders
    Graph {
        #[arg(short, long, default_value = "wwapi.yaml")]
        file: PathBuf,

        /// Graphviz DOT output
        #[arg(long)]
        dot: bool,
    },

    /// Print the JSON schema of wwapi.yaml
    Schema,

    /// Print a shell completion script
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Synth { file, out, format } => cmd_synth(&file, &out, format.into()),
        Commands::Plan {
            file,
            stack,
            state_dir,
        } => cmd_plan(&file, &state_dir, stack.as_deref()),
        Commands::Apply {
            file,
            stack,
            out,
            format,
            force,
            dry_run,
            state_dir,
        } => cmd_apply(
            &file,
            &state_dir,
            &out,
            format.into(),
            stack.as_deref(),
            force,
            dry_run,
        ),
        Commands::Destroy {
            file,
            stack,
            dry_run,
            state_dir,
        } => cmd_destroy(&file, &state_dir, stack.as_deref(), dry_run),
        Commands::Drift {
            stack,
            state_dir,
            tripwire,
        } => cmd_drift(&state_dir, stack.as_deref(), tripwire),
        Commands::Status { state_dir, stack } => cmd_status(&state_dir, stack.as_deref()),
        Commands::Outputs { file, stack } => cmd_outputs(&file, stack.as_deref()),
        Commands::Graph { file, dot } => cmd_graph(&file, dot),
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "wwapi", &mut std::io::stdout());
            Ok(())
        }
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
name: wwapi
description: "Retrieval chatbot infrastructure"

backend:
  stack_name: WwapiStack
  functions:
    code_dir: lambda/function
    layer_dir: lambda/layer
  search:
    credentials:
      source: secret

frontend:
  stack_name: WwapiFrontendStack
  build_dir: frontend
  max_azs: 2

policy:
  failure: stop_on_first
  tripwire: true
  lock_file: true
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join("wwapi.yaml");
    if config_path.exists() {
        return Err(Error::Other(format!(
            "{} already exists",
            config_path.display()
        )));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| Error::io("create", &state_dir, e))?;
    std::fs::write(&config_path, INIT_TEMPLATE).map_err(|e| Error::io("write", &config_path, e))?;

    println!("Initialized wwapi project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<()> {
    let (config, app) = stacks::load(file)?;
    let resources: usize = app.stacks.values().map(|s| s.resources.len()).sum();
    println!(
        "OK: {} ({} stacks, {} resources)",
        config.name,
        app.stacks.len(),
        resources
    );
    Ok(())
}

fn cmd_synth(file: &Path, out: &Path, format: TemplateFormat) -> Result<()> {
    let (_, app) = stacks::load(file)?;
    let synths = codegen::synth_app(&app)?;
    let written = assembly::write_assembly(out, &app.name, &synths, format)?;
    for w in &written {
        println!("{}: {} ({})", w.stack, w.path.display(), w.hash);
    }
    println!(
        "Assembly written to {} ({} stacks)",
        out.display(),
        written.len()
    );
    Ok(())
}

/// Load lock files for the app's stacks.
fn load_locks(app: &App, state_dir: &Path) -> Result<HashMap<String, types::StateLock>> {
    let mut locks = HashMap::new();
    if !state_dir.exists() {
        return Ok(locks);
    }
    for name in app.stacks.keys() {
        if let Some(lock) = state::load_lock(state_dir, name)? {
            locks.insert(name.clone(), lock);
        }
    }
    Ok(locks)
}

fn cmd_plan(file: &Path, state_dir: &Path, stack_filter: Option<&str>) -> Result<()> {
    let (_, app) = stacks::load(file)?;
    if let Some(filter) = stack_filter {
        app.stack(filter)?;
    }
    let synths = codegen::synth_app(&app)?;
    let locks = load_locks(&app, state_dir)?;
    let plan = planner::plan(&app.name, &synths, &locks);
    print_plan(&plan, stack_filter);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan, stack_filter: Option<&str>) {
    let changes: Vec<&types::PlannedChange> = plan
        .changes
        .iter()
        .filter(|c| stack_filter.is_none_or(|f| c.stack == f))
        .collect();
    println!("Planning: {} ({} resources)", plan.name, changes.len());
    println!();

    let mut current_stack = String::new();
    for change in &changes {
        if change.stack != current_stack {
            current_stack.clone_from(&change.stack);
            println!("{}:", current_stack);
        }
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::Retain => "!",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!("{}", plan_summary(&changes));
}

/// Summary line counted over the displayed changes.
fn plan_summary(changes: &[&types::PlannedChange]) -> String {
    let count = |action: types::PlanAction| changes.iter().filter(|c| c.action == action).count();
    format!(
        "Plan: {} to add, {} to change, {} to destroy, {} to retain, {} unchanged.",
        count(types::PlanAction::Create),
        count(types::PlanAction::Update),
        count(types::PlanAction::Destroy),
        count(types::PlanAction::Retain),
        count(types::PlanAction::NoOp)
    )
}

fn cmd_apply(
    file: &Path,
    state_dir: &Path,
    out: &Path,
    format: TemplateFormat,
    stack_filter: Option<&str>,
    force: bool,
    dry_run: bool,
) -> Result<()> {
    let (config, app) = stacks::load(file)?;
    let cfg = ApplyConfig {
        app: &app,
        policy: &config.policy,
        state_dir,
        out_dir: out,
        format,
        force,
        dry_run,
        stack_filter,
    };
    let results = executor::apply(&cfg)?;
    report(&results, if dry_run { "Dry run" } else { "Apply" })
}

fn cmd_destroy(
    file: &Path,
    state_dir: &Path,
    stack_filter: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    let (config, app) = stacks::load(file)?;
    let results = executor::destroy(&DestroyConfig {
        app: &app,
        policy: &config.policy,
        state_dir,
        dry_run,
        stack_filter,
    })?;
    report(&results, if dry_run { "Dry run" } else { "Destroy" })
}

fn report(results: &[types::ApplyResult], label: &str) -> Result<()> {
    let mut recorded = 0;
    let mut unchanged = 0;
    let mut destroyed = 0;
    let mut retained = 0;
    let mut failed = 0;
    for r in results {
        println!(
            "{}: {} recorded, {} unchanged, {} destroyed, {} retained, {} failed ({:.1}s)",
            r.stack,
            r.resources_recorded,
            r.resources_unchanged,
            r.resources_destroyed,
            r.resources_retained,
            r.resources_failed,
            r.total_duration.as_secs_f64()
        );
        recorded += r.resources_recorded;
        unchanged += r.resources_unchanged;
        destroyed += r.resources_destroyed;
        retained += r.resources_retained;
        failed += r.resources_failed;
    }

    println!();
    if failed > 0 {
        println!(
            "{} completed with errors: {} recorded, {} unchanged, {} FAILED",
            label, recorded, unchanged, failed
        );
        return Err(Error::ApplyFailed(failed));
    }
    println!(
        "{} complete: {} recorded, {} unchanged, {} destroyed, {} retained.",
        label, recorded, unchanged, destroyed, retained
    );
    Ok(())
}

/// Stack names with a lock under `state_dir`, sorted.
fn recorded_stacks(state_dir: &Path, stack_filter: Option<&str>) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(state_dir).map_err(|e| Error::io("read", state_dir, e))?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| stack_filter.is_none_or(|f| name == f))
        .filter(|name| state::lock_file_path(state_dir, name).exists())
        .collect();
    names.sort();
    Ok(names)
}

fn cmd_drift(state_dir: &Path, stack_filter: Option<&str>, tripwire_mode: bool) -> Result<()> {
    let mut total_drift = 0;

    for name in recorded_stacks(state_dir, stack_filter)? {
        let Some(mut lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        println!("Checking {} ({} resources)...", name, lock.resources.len());
        let findings = drift::detect_drift(&lock);

        if findings.is_empty() {
            println!("  No drift detected.");
            continue;
        }
        for f in &findings {
            println!("  DRIFTED: {} ({})", f.resource_id, f.detail);
            println!("    Expected: {}", f.expected_hash);
            println!("    Actual:   {}", f.actual_hash);
            if tripwire_mode {
                eventlog::append_event(
                    state_dir,
                    &name,
                    types::ProvenanceEvent::DriftDetected {
                        stack: f.stack.clone(),
                        resource: f.resource_id.clone(),
                        expected_hash: f.expected_hash.clone(),
                        actual_hash: f.actual_hash.clone(),
                    },
                )?;
            }
        }
        if tripwire_mode && drift::mark_drifted(&mut lock, &findings) > 0 {
            state::save_lock(state_dir, &lock)?;
        }
        total_drift += findings.len();
    }

    if total_drift > 0 {
        println!();
        println!("Drift detected: {} finding(s)", total_drift);
        if tripwire_mode {
            return Err(Error::Drift(total_drift));
        }
    } else {
        println!("No drift detected.");
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> Result<()> {
    let mut found = false;
    if state_dir.exists() {
        for name in recorded_stacks(state_dir, stack_filter)? {
            let Some(lock) = state::load_lock(state_dir, &name)? else {
                continue;
            };
            found = true;
            println!("Stack: {}", lock.stack);
            println!("  Generated: {}", lock.generated_at);
            println!("  Generator: {}", lock.generator);
            if let (Some(path), Some(hash)) = (&lock.template_path, &lock.template_hash) {
                println!("  Template:  {} ({})", path, hash);
            }
            println!("  Resources: {}", lock.resources.len());
            for (id, rl) in &lock.resources {
                println!("    {}: {} [{}]", id, rl.status, rl.resource_type);
            }
            println!();
        }
    }

    if !found {
        println!("No state found. Run `wwapi apply` first.");
    }
    Ok(())
}

fn cmd_outputs(file: &Path, stack_filter: Option<&str>) -> Result<()> {
    let (_, app) = stacks::load(file)?;
    if let Some(filter) = stack_filter {
        app.stack(filter)?;
    }
    for name in resolver::build_stack_order(&app)? {
        if stack_filter.is_some_and(|f| name != f) {
            continue;
        }
        let stack = app.stack(&name)?;
        println!("{}:", name);
        for (id, output) in &stack.outputs {
            let export = output
                .export_name
                .as_deref()
                .map(|e| format!(" [export {}]", e))
                .unwrap_or_default();
            println!("  {}{} = {}", id, export, output.value);
            if let Some(description) = &output.description {
                println!("    {}", description);
            }
        }
    }
    Ok(())
}

fn cmd_graph(file: &Path, dot: bool) -> Result<()> {
    let (_, app) = stacks::load(file)?;
    let synths = codegen::synth_app(&app)?;
    if dot {
        print!("{}", render_dot(&app.name, &synths)?);
        return Ok(());
    }
    let names: Vec<&str> = synths.iter().map(|s| s.name.as_str()).collect();
    println!("Stack order: {}", names.join(" -> "));
    for synth in &synths {
        println!();
        println!("{} ({} resources):", synth.name, synth.order.len());
        for (i, id) in synth.order.iter().enumerate() {
            let kind = synth
                .resources
                .get(id)
                .map(|d| d.resource_type.provider_type())
                .unwrap_or_default();
            println!("  {:>3}. {} [{}]", i + 1, id, kind);
        }
    }
    Ok(())
}

/// Graphviz rendering: one cluster per stack, resource edges inside,
/// stack edges between cluster anchors.
fn render_dot(app: &str, synths: &[codegen::SynthesizedStack]) -> Result<String> {
    let mut out = format!("digraph \"{}\" {{\n  rankdir=LR;\n  compound=true;\n", app);
    for synth in synths {
        out.push_str(&format!(
            "  subgraph \"cluster_{0}\" {{\n    label=\"{0}\";\n",
            synth.name
        ));
        for id in &synth.order {
            out.push_str(&format!("    \"{}/{}\" [label=\"{}\"];\n", synth.name, id, id));
        }
        for (from, to) in resolver::resource_edges(&synth.resources)? {
            out.push_str(&format!(
                "    \"{0}/{1}\" -> \"{0}/{2}\";\n",
                synth.name, from, to
            ));
        }
        out.push_str("  }\n");
    }
    for synth in synths {
        for dep in &synth.dependencies {
            let (Some(from), Some(to)) = (
                synths
                    .iter()
                    .find(|s| &s.name == dep)
                    .and_then(|s| s.order.last()),
                synth.order.first(),
            ) else {
                continue;
            };
            out.push_str(&format!(
                "  \"{}/{}\" -> \"{}/{}\" [ltail=\"cluster_{}\", lhead=\"cluster_{}\", style=bold];\n",
                dep, from, synth.name, to, dep, synth.name
            ));
        }
    }
    out.push_str("}\n");
    Ok(out)
}

fn cmd_schema() -> Result<()> {
    let schema = schemars::schema_for!(types::WwapiConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
