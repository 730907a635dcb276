//! Configuration digests.
//!
//! Replicas of the configuration database compare digests of their content
//! to detect divergence. A snapshot is a tree of [`ConfigNode`]s rendered to
//! compact XML and hashed. Two algorithms exist:
//!
//! * v1 optionally sorts the tree first (attributes by name, children by
//!   element name) and hashes `" " + xml + "\n"`. On-disk and operation
//!   digests always use v1.
//! * v2 hashes the document as-is and may filter volatile bookkeeping
//!   attributes. Peers at feature set 3.0.5 or later use it.

use crate::error::{CrmError, Result};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::path::Path;
use tracing::{error, trace};

/// First feature set whose peers expect v2 digests.
pub const V2_FEATURE_SET: &str = "3.0.5";

/// Attributes that change on every write and are left out of filtered digests.
pub const VOLATILE_ATTRIBUTES: &[&str] = &[
    "crm-debug-origin",
    "cib-last-written",
    "update-origin",
    "update-client",
    "update-user",
];

// ---------------------------------------------------------------------------
// ConfigNode
// ---------------------------------------------------------------------------

/// One element of a configuration snapshot.
///
/// Attribute order is significant for unsorted digests and is preserved
/// exactly as loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigNode {
    pub name: String,
    #[serde(
        default,
        serialize_with = "serialize_attributes",
        deserialize_with = "deserialize_attributes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub attributes: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ConfigNode>,
}

impl ConfigNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn child(mut self, child: ConfigNode) -> Self {
        self.children.push(child);
        self
    }

    /// Set an attribute, keeping its position if it already exists.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// A copy with attributes sorted by name and children sorted by element
    /// name, recursively. Sorting is stable.
    pub fn sorted(&self) -> ConfigNode {
        let mut attributes = self.attributes.clone();
        attributes.sort_by(|a, b| a.0.cmp(&b.0));
        let mut children: Vec<ConfigNode> = self.children.iter().map(ConfigNode::sorted).collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        ConfigNode {
            name: self.name.clone(),
            attributes,
            children,
        }
    }

    /// Compact XML rendering, optionally without volatile attributes.
    pub fn to_xml(&self, filter: bool) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, filter);
        out
    }

    fn write_xml(&self, out: &mut String, filter: bool) {
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attributes {
            if filter && VOLATILE_ATTRIBUTES.contains(&name.as_str()) {
                continue;
            }
            let _ = write!(out, " {}=\"{}\"", name, escape(value));
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write_xml(out, filter);
        }
        let _ = write!(out, "</{}>", self.name);
    }

    /// Load a snapshot from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: &Path) -> Result<Self> {
        crate::io::load_structured(path)
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn serialize_attributes<S: Serializer>(
    attributes: &[(String, String)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(attributes.len()))?;
    for (k, v) in attributes {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

fn deserialize_attributes<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<(String, String)>, D::Error> {
    struct Ordered;

    impl<'de> Visitor<'de> for Ordered {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of attribute names to scalar values")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
            let mut attributes = Vec::new();
            while let Some((name, value)) = map.next_entry::<String, serde_json::Value>()? {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Null => String::new(),
                    _ => {
                        return Err(de::Error::custom(format!(
                            "attribute '{name}' must be a scalar"
                        )))
                    }
                };
                attributes.push((name, value));
            }
            Ok(attributes)
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_map(Ordered)
}

// ---------------------------------------------------------------------------
// Digest algorithms
// ---------------------------------------------------------------------------

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn hash(buffer: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(buffer.as_bytes());
    hex_encode(&hasher.finalize())
}

/// v1 digest: optional canonical sort, legacy framing.
pub fn digest_v1(node: &ConfigNode, sort: bool) -> String {
    let xml = if sort {
        trace!(element = %node.name, "sorting snapshot for digest");
        node.sorted().to_xml(false)
    } else {
        node.to_xml(false)
    };
    hash(&format!(" {xml}\n"))
}

/// v2 digest: document order, optionally without volatile attributes.
pub fn digest_v2(node: &ConfigNode, filter: bool) -> String {
    hash(&node.to_xml(filter))
}

/// Pick the algorithm a peer at `feature_set` expects.
///
/// `sort` only affects v1; `filter` applies to v2 only.
pub fn versioned_digest(
    node: &ConfigNode,
    sort: bool,
    filter: bool,
    feature_set: Option<&str>,
) -> String {
    match feature_set {
        Some(version) if compare_version(V2_FEATURE_SET, version) != Ordering::Greater => {
            trace!(feature_set = version, "using v2 digest");
            digest_v2(node, filter)
        }
        _ => {
            trace!(feature_set = ?feature_set, "using v1 digest");
            digest_v1(node, sort)
        }
    }
}

/// Digest stored alongside the configuration on disk.
pub fn on_disk_digest(node: &ConfigNode) -> String {
    digest_v1(node, false)
}

/// Digest of an operation's parameter set; always sorted.
pub fn operation_digest(node: &ConfigNode) -> String {
    digest_v1(node, true)
}

/// Check `node` against an expected on-disk digest. A mismatch is logged,
/// never fatal.
pub fn verify(node: &ConfigNode, expected: &str) -> bool {
    let calculated = on_disk_digest(node);
    if calculated == expected {
        trace!(digest = %calculated, "digest comparison passed");
        true
    } else {
        error!(
            expected,
            calculated = %calculated,
            "digest comparison failed"
        );
        false
    }
}

/// Compare dotted numeric versions. Missing or non-numeric components count
/// as zero, so `3.0` equals `3.0.0`.
pub fn compare_version(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => {
                let l = l.map(version_component).unwrap_or(0);
                let r = r.map(version_component).unwrap_or(0);
                match l.cmp(&r) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
        }
    }
}

fn version_component(part: &str) -> u64 {
    let digits: String = part.trim().chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Signature files
// ---------------------------------------------------------------------------

/// Write `digest` as the signature of a snapshot (`<snapshot>.sig`).
pub fn write_signature(path: &Path, digest: &str) -> Result<()> {
    crate::io::atomic_write(path, format!("{digest}\n").as_bytes())
}

/// Read a signature file written by [`write_signature`].
pub fn read_signature(path: &Path) -> Result<String> {
    let data = std::fs::read_to_string(path)?;
    let digest = data.strip_suffix('\n').unwrap_or(&data);
    if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CrmError::InvalidSnapshot(format!(
            "{} does not contain a digest",
            path.display()
        )));
    }
    Ok(digest.to_string())
}
