use crate::output::print_json;
use anyhow::Context;
use clap::{Args, ValueEnum};
use crm_core::digest::{self, ConfigNode};
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, ValueEnum)]
pub enum Algorithm {
    /// Pick by feature set (v2 from 3.0.5)
    Auto,
    V1,
    V2,
}

#[derive(Args)]
pub struct DigestArgs {
    /// Configuration snapshot (JSON or YAML)
    pub snapshot: PathBuf,

    #[arg(long, value_enum, default_value = "auto")]
    pub algorithm: Algorithm,

    /// Sort attributes and children before hashing (v1)
    #[arg(long)]
    pub sort: bool,

    /// Leave out volatile attributes (v2)
    #[arg(long)]
    pub filter: bool,

    /// Feature set of the oldest peer (default: from the configuration)
    #[arg(long)]
    pub feature_set: Option<String>,

    /// Write the on-disk digest (unsorted v1) to <snapshot>.sig
    #[arg(long)]
    pub sign: bool,
}

pub fn signature_path(snapshot: &Path) -> PathBuf {
    let mut name = snapshot.as_os_str().to_owned();
    name.push(".sig");
    PathBuf::from(name)
}

pub fn run(config_path: &Path, args: DigestArgs, json: bool) -> anyhow::Result<()> {
    let node = ConfigNode::load(&args.snapshot)
        .with_context(|| format!("failed to load snapshot {}", args.snapshot.display()))?;

    if args.sign {
        return sign(&args, &node, json);
    }

    let (value, used) = match args.algorithm {
        Algorithm::V1 => (digest::digest_v1(&node, args.sort), "v1"),
        Algorithm::V2 => (digest::digest_v2(&node, args.filter), "v2"),
        Algorithm::Auto => {
            let feature_set = match args.feature_set {
                Some(v) => Some(v),
                None => super::load_config_or_default(config_path)?.digest.feature_set,
            };
            let value =
                digest::versioned_digest(&node, args.sort, args.filter, feature_set.as_deref());
            let used = match feature_set.as_deref() {
                Some(v)
                    if digest::compare_version(digest::V2_FEATURE_SET, v)
                        != std::cmp::Ordering::Greater =>
                {
                    "v2"
                }
                _ => "v1",
            };
            (value, used)
        }
    };

    if json {
        print_json(&serde_json::json!({
            "digest": value,
            "algorithm": used,
            "signature": null,
        }))?;
    } else {
        println!("{value}");
    }
    Ok(())
}

/// Signature files hold the on-disk digest (unsorted v1) and nothing else.
fn sign(args: &DigestArgs, node: &ConfigNode, json: bool) -> anyhow::Result<()> {
    let non_default = args.sort
        || args.filter
        || args.feature_set.is_some()
        || matches!(args.algorithm, Algorithm::V2);
    if non_default {
        anyhow::bail!(
            "--sign writes the on-disk digest (unsorted v1); drop --sort, --filter, --feature-set and --algorithm v2"
        );
    }
    let value = digest::on_disk_digest(node);
    let path = signature_path(&args.snapshot);
    digest::write_signature(&path, &value)
        .with_context(|| format!("failed to write {}", path.display()))?;

    if json {
        print_json(&serde_json::json!({
            "digest": value,
            "algorithm": "v1",
            "signature": path.display().to_string(),
        }))?;
    } else {
        println!("{value}");
        eprintln!("wrote {}", path.display());
    }
    Ok(())
}
