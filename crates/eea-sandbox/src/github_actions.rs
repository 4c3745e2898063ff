//! `github_workflow.ls_actions` — lists the set of action references used
//! by one or more GitHub Actions workflow files.

use std::collections::BTreeSet;

use crate::error::SandboxError;
use crate::parse::parse_yaml;
use crate::vfs::VirtualFilesystem;

/// Returns the deduplicated, sorted set of `uses:` action references found
/// under `path` (a single workflow file or a directory of them).
///
/// # Errors
/// Returns [`SandboxError::FileNotFound`] if `path` matches no files, or
/// [`SandboxError::Parse`] if a matched file is not valid YAML.
pub fn ls_actions(vfs: &VirtualFilesystem, path: &str) -> Result<Vec<String>, SandboxError> {
    let files = if vfs.exists(path) {
        vec![path.to_owned()]
    } else {
        let pattern = format!("{}/*.yml", path.trim_end_matches('/'));
        let mut matches = vfs.ls_glob(&pattern)?;
        matches.extend(vfs.ls_glob(&format!("{}/*.yaml", path.trim_end_matches('/')))?);
        matches
    };

    if files.is_empty() {
        return Err(SandboxError::FileNotFound(path.to_owned()));
    }

    let mut actions = BTreeSet::new();
    for file in files {
        let bytes = vfs.read(&file)?;
        let source = String::from_utf8_lossy(bytes);
        let document = parse_yaml(&source)?;
        collect_uses(&document, &mut actions);
    }
    Ok(actions.into_iter().collect())
}

fn collect_uses(value: &serde_json::Value, out: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                if key == "uses" {
                    if let serde_json::Value::String(reference) = child {
                        out.insert(reference.clone());
                    }
                }
                collect_uses(child, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_uses(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::ls_actions;
    use crate::vfs::VirtualFilesystem;

    #[test]
    fn collects_unique_action_references() {
        let mut vfs = VirtualFilesystem::new();
        vfs.insert_file(
            ".github/workflows/ci.yml",
            "jobs:\n  build:\n    steps:\n      - uses: actions/checkout@v4\n      - uses: actions/checkout@v4\n      - uses: actions/setup-go@v5\n",
        );
        let actions = ls_actions(&vfs, ".github/workflows/ci.yml").expect("lists");
        assert_eq!(actions, vec!["actions/checkout@v4", "actions/setup-go@v5"]);
    }

    #[test]
    fn missing_path_is_an_error() {
        let vfs = VirtualFilesystem::new();
        assert!(ls_actions(&vfs, "missing.yml").is_err());
    }
}
