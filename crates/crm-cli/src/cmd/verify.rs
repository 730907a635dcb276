use crate::output::print_json;
use anyhow::Context;
use crm_core::digest::{self, ConfigNode};
use std::path::Path;

pub fn run(snapshot: &Path, expected: Option<&str>, json: bool) -> anyhow::Result<()> {
    let node = ConfigNode::load(snapshot)
        .with_context(|| format!("failed to load snapshot {}", snapshot.display()))?;
    let expected = match expected {
        Some(d) => d.to_string(),
        None => {
            let path = super::digest::signature_path(snapshot);
            digest::read_signature(&path)
                .with_context(|| format!("failed to read {}", path.display()))?
        }
    };

    let ok = digest::verify(&node, &expected);
    if json {
        print_json(&serde_json::json!({
            "valid": ok,
            "expected": expected,
            "calculated": digest::on_disk_digest(&node),
        }))?;
    } else if ok {
        println!("Digest matches.");
    }

    if !ok {
        anyhow::bail!("digest mismatch for {}", snapshot.display());
    }
    Ok(())
}
