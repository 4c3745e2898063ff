//! `parse_yaml`/`parse_toml` Policy Library helpers.

use crate::error::SandboxError;

/// Parses YAML source into a JSON value.
///
/// # Errors
/// Returns [`SandboxError::Parse`] if `source` is not valid YAML.
pub fn parse_yaml(source: &str) -> Result<serde_json::Value, SandboxError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(source).map_err(|source| SandboxError::Parse(source.to_string()))?;
    serde_json::to_value(value).map_err(|source| SandboxError::Parse(source.to_string()))
}

/// Parses TOML source into a JSON value.
///
/// # Errors
/// Returns [`SandboxError::Parse`] if `source` is not valid TOML.
pub fn parse_toml(source: &str) -> Result<serde_json::Value, SandboxError> {
    let value: toml::Value =
        toml::from_str(source).map_err(|source| SandboxError::Parse(source.to_string()))?;
    serde_json::to_value(value).map_err(|source| SandboxError::Parse(source.to_string()))
}

#[cfg(test)]
mod tests {
    use super::parse_toml;
    use super::parse_yaml;

    #[test]
    fn parse_yaml_converts_mapping_to_json_object() {
        let value = parse_yaml("key: value\nlist:\n  - 1\n  - 2\n").expect("parses");
        assert_eq!(value["key"], "value");
        assert_eq!(value["list"][1], 2);
    }

    #[test]
    fn parse_toml_converts_table_to_json_object() {
        let value = parse_toml("[package]\nname = \"demo\"\n").expect("parses");
        assert_eq!(value["package"]["name"], "demo");
    }

    #[test]
    fn parse_yaml_rejects_malformed_source() {
        assert!(parse_yaml(": : :").is_err());
    }
}
