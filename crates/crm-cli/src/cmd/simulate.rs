use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use clap::Args;
use crm_core::document::GraphDocument;
use crm_core::simulate::{SimOutcome, SimulationOptions, Simulator, DEFAULT_MAX_PASSES};
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct SimulateArgs {
    /// Graph document (JSON or YAML)
    pub graph: PathBuf,

    /// Pretend this action (id or operation key) fails; repeatable
    #[arg(long, value_name = "ACTION")]
    pub fail: Vec<String>,

    /// Pretend dispatching this action id fails; repeatable
    #[arg(long, value_name = "ID")]
    pub fail_dispatch: Vec<i32>,

    /// Give up after this many passes
    #[arg(long, default_value_t = DEFAULT_MAX_PASSES)]
    pub max_passes: usize,
}

fn outcome_str(outcome: SimOutcome) -> &'static str {
    match outcome {
        SimOutcome::Confirmed => "ok",
        SimOutcome::Failed => "FAILED",
        SimOutcome::Ignored => "failed (ignored)",
        SimOutcome::NotDispatched => "NOT DISPATCHED",
    }
}

pub fn run(config_path: &Path, args: SimulateArgs, json: bool) -> anyhow::Result<()> {
    let config = super::load_config_or_default(config_path)?;
    let doc = GraphDocument::load(&args.graph)
        .with_context(|| format!("failed to load graph {}", args.graph.display()))?;
    let mut graph = doc
        .into_graph_with(&config)
        .context("invalid transition graph")?;

    let options = SimulationOptions {
        fail: args.fail,
        fail_dispatch: args.fail_dispatch,
        max_passes: args.max_passes,
    };
    let report = Simulator::new(options).run(&mut graph);

    if json {
        return print_json(&report);
    }

    let rows = report
        .executed
        .iter()
        .map(|a| {
            vec![
                a.pass.to_string(),
                a.id.to_string(),
                a.kind.to_string(),
                a.label.clone(),
                or_dash(a.target.as_deref()),
                outcome_str(a.outcome).to_string(),
            ]
        })
        .collect();
    print_table(&["PASS", "ACTION", "TYPE", "LABEL", "TARGET", "OUTCOME"], rows);
    println!();
    println!(
        "Transition {}: {} after {} pass(es)",
        report.transition, report.result, report.passes
    );
    if let Some(reason) = &report.notification.reason {
        println!("  aborted: {reason} (priority {})", report.abort_priority);
    }
    if !report.skipped.is_empty() {
        println!("  skipped synapses: {:?}", report.skipped);
    }
    if !report.blocked.is_empty() {
        println!("  blocked synapses: {:?}", report.blocked);
    }
    match report.notification.event {
        Some(event) => println!("  next: {event:?}"),
        None => println!("  next: nothing"),
    }
    Ok(())
}
