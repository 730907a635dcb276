use crate::error::Result;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting config and signature files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialization format of a document on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// `.json` files are JSON; everything else is read as YAML, which also
    /// accepts most JSON.
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// Read and deserialize a JSON or YAML document.
pub fn load_structured<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)?;
    match Format::of(path) {
        Format::Json => Ok(serde_json::from_str(&data)?),
        Format::Yaml => Ok(serde_yaml::from_str(&data)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crm.yaml");
        atomic_write(&path, b"node: n1").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "node: n1");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/cib.sig");
        atomic_write(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(Format::of(Path::new("graph.json")), Format::Json);
        assert_eq!(Format::of(Path::new("graph.JSON")), Format::Json);
        assert_eq!(Format::of(Path::new("graph.yaml")), Format::Yaml);
        assert_eq!(Format::of(Path::new("graph")), Format::Yaml);
    }

    #[test]
    fn load_structured_reads_both_formats() {
        let dir = TempDir::new().unwrap();
        let json = dir.path().join("a.json");
        std::fs::write(&json, r#"{"x": "1"}"#).unwrap();
        let yaml = dir.path().join("a.yaml");
        std::fs::write(&yaml, "x: \"1\"\n").unwrap();

        let a: BTreeMap<String, String> = load_structured(&json).unwrap();
        let b: BTreeMap<String, String> = load_structured(&yaml).unwrap();
        assert_eq!(a, b);
    }
}
