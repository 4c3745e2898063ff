//! `file.deps` — a minimal, deterministic SBOM-shaped dependency
//! extraction: an array of package nodes, no edges.

use std::collections::BTreeSet;

use crate::error::SandboxError;
use crate::parse::parse_toml;
use crate::vfs::VirtualFilesystem;

/// One extracted package node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PackageNode {
    name: String,
    version: String,
}

/// Extracts package nodes from manifests found under `path`: `Cargo.toml`
/// `[dependencies]`/`[dev-dependencies]` tables and `package.json`
/// `dependencies`/`devDependencies` objects. Implementations are
/// deterministic for a given input tree: nodes are deduplicated and
/// sorted by name, then version.
///
/// # Errors
/// Returns [`SandboxError::Parse`] if a matched manifest is malformed.
pub fn file_deps(
    vfs: &VirtualFilesystem,
    path: &str,
) -> Result<serde_json::Value, SandboxError> {
    let mut nodes = BTreeSet::new();

    let cargo_toml_path = format!("{}/Cargo.toml", path.trim_end_matches('/'));
    if vfs.exists(&cargo_toml_path) {
        let bytes = vfs.read(&cargo_toml_path)?;
        let document = parse_toml(&String::from_utf8_lossy(bytes))?;
        for section in ["dependencies", "dev-dependencies", "build-dependencies"] {
            collect_toml_deps(&document, section, &mut nodes);
        }
    }

    let package_json_path = format!("{}/package.json", path.trim_end_matches('/'));
    if vfs.exists(&package_json_path) {
        let bytes = vfs.read(&package_json_path)?;
        let document: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|source| SandboxError::Parse(source.to_string()))?;
        for section in ["dependencies", "devDependencies"] {
            collect_json_deps(&document, section, &mut nodes);
        }
    }

    let package_nodes: Vec<serde_json::Value> = nodes
        .into_iter()
        .map(|node| serde_json::json!({"name": node.name, "version": node.version}))
        .collect();

    Ok(serde_json::json!({"packages": package_nodes}))
}

fn collect_toml_deps(document: &serde_json::Value, section: &str, out: &mut BTreeSet<PackageNode>) {
    let Some(table) = document.get(section).and_then(serde_json::Value::as_object) else {
        return;
    };
    for (name, spec) in table {
        let version = match spec {
            serde_json::Value::String(version) => version.clone(),
            serde_json::Value::Object(fields) => fields
                .get("version")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("*")
                .to_owned(),
            _ => "*".to_owned(),
        };
        out.insert(PackageNode { name: name.clone(), version });
    }
}

fn collect_json_deps(document: &serde_json::Value, section: &str, out: &mut BTreeSet<PackageNode>) {
    let Some(table) = document.get(section).and_then(serde_json::Value::as_object) else {
        return;
    };
    for (name, version) in table {
        let version = version.as_str().unwrap_or("*").to_owned();
        out.insert(PackageNode { name: name.clone(), version });
    }
}

#[cfg(test)]
mod tests {
    use super::file_deps;
    use crate::vfs::VirtualFilesystem;

    #[test]
    fn extracts_cargo_dependencies_deterministically() {
        let mut vfs = VirtualFilesystem::new();
        vfs.insert_file(
            "crate/Cargo.toml",
            "[dependencies]\nserde = \"1.0\"\nthiserror = { version = \"2.0\" }\n",
        );
        let first = file_deps(&vfs, "crate").expect("extracts");
        let second = file_deps(&vfs, "crate").expect("extracts");
        assert_eq!(first, second);
        let packages = first["packages"].as_array().expect("array");
        assert_eq!(packages.len(), 2);
    }

    #[test]
    fn missing_manifests_yield_empty_package_list() {
        let vfs = VirtualFilesystem::new();
        let result = file_deps(&vfs, "crate").expect("extracts");
        assert_eq!(result["packages"].as_array().expect("array").len(), 0);
    }
}
