use crate::output::{or_dash, print_json, print_table};
use anyhow::Context;
use crm_core::document::GraphDocument;
use std::path::Path;

pub fn run(config_path: &Path, graph_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config_or_default(config_path)?;
    let doc = GraphDocument::load(graph_path)
        .with_context(|| format!("failed to load graph {}", graph_path.display()))?;
    let graph = doc
        .into_graph_with(&config)
        .context("invalid transition graph")?;

    if json {
        #[derive(serde::Serialize)]
        struct ActionRow<'a> {
            id: i32,
            #[serde(rename = "type")]
            kind: String,
            label: String,
            target: Option<&'a str>,
            timeout_ms: i64,
            can_fail: bool,
        }

        #[derive(serde::Serialize)]
        struct SynapseRow<'a> {
            id: i32,
            priority: i32,
            actions: Vec<ActionRow<'a>>,
            inputs: Vec<i32>,
        }

        #[derive(serde::Serialize)]
        struct GraphOutput<'a> {
            transition: i32,
            source: &'a str,
            batch_limit: i32,
            migration_limit: i32,
            network_delay_ms: i64,
            stonith_timeout_ms: i64,
            synapses: Vec<SynapseRow<'a>>,
        }

        let synapses = graph
            .synapses()
            .iter()
            .map(|s| SynapseRow {
                id: s.id,
                priority: s.priority,
                actions: s
                    .actions
                    .iter()
                    .map(|&slot| {
                        let a = graph.action_at(slot);
                        ActionRow {
                            id: a.id.0,
                            kind: a.kind.to_string(),
                            label: a.label(),
                            target: a.target(),
                            timeout_ms: a.op.timeout_ms,
                            can_fail: a.can_fail,
                        }
                    })
                    .collect(),
                inputs: s.inputs.iter().map(|i| graph.action_at(i.slot).id.0).collect(),
            })
            .collect();

        print_json(&GraphOutput {
            transition: graph.id,
            source: &graph.source,
            batch_limit: graph.batch_limit,
            migration_limit: graph.migration_limit,
            network_delay_ms: graph.network_delay,
            stonith_timeout_ms: graph.stonith_timeout,
            synapses,
        })?;
        return Ok(());
    }

    println!("Transition {} ({})", graph.id, graph.source);
    println!(
        "  batch limit {}, migration limit {}, network delay {}ms",
        graph.batch_limit, graph.migration_limit, graph.network_delay
    );
    println!();

    let mut rows = Vec::new();
    for synapse in graph.synapses() {
        let inputs = synapse
            .inputs
            .iter()
            .map(|i| graph.action_at(i.slot).id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        for &slot in &synapse.actions {
            let action = graph.action_at(slot);
            rows.push(vec![
                synapse.id.to_string(),
                synapse.priority.to_string(),
                action.id.to_string(),
                action.kind.to_string(),
                action.label(),
                or_dash(action.target()),
                if inputs.is_empty() {
                    "-".to_string()
                } else {
                    inputs.clone()
                },
            ]);
        }
    }
    print_table(
        &["SYNAPSE", "PRIORITY", "ACTION", "TYPE", "LABEL", "TARGET", "INPUTS"],
        rows,
    );
    Ok(())
}
