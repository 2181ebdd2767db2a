//! Want definition loader (spec §6.1): parses the YAML/JSON want shape into
//! [`WantConfig`](crate::mutation::WantConfig) values, the way the teacher's
//! `toml`-based config loads `EngineConfig`-shaped structs. Only parsing and
//! structural validation live here; concrete want-type catalogs remain out
//! of scope.

use serde::Deserialize;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::mutation::WantConfig;
use crate::want::{OwnerReference, ScheduleSpec, Spec};

#[derive(Debug, Deserialize)]
struct WireMetadata {
    name: String,
    #[serde(rename = "type")]
    want_type: Option<String>,
    id: Option<String>,
    #[serde(default)]
    labels: std::collections::HashMap<String, String>,
    #[serde(default, rename = "ownerReferences")]
    owner_references: Vec<WireOwnerReference>,
}

#[derive(Debug, Deserialize)]
struct WireOwnerReference {
    id: String,
    name: String,
    kind: String,
}

#[derive(Debug, Deserialize, Default)]
struct WireSpec {
    #[serde(default)]
    params: std::collections::HashMap<String, serde_json::Value>,
    #[serde(default)]
    using: Vec<std::collections::HashMap<String, String>>,
    #[serde(default)]
    when: Vec<ScheduleSpec>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    recipe: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireWant {
    metadata: WireMetadata,
    #[serde(default)]
    spec: WireSpec,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    #[serde(default)]
    wants: Vec<WireWant>,
}

fn wire_to_config(wire: WireWant) -> Result<WantConfig, ConfigError> {
    if wire.metadata.name.trim().is_empty() {
        return Err(ConfigError::MissingField { field: "metadata.name".to_string() });
    }
    if wire.metadata.want_type.is_none() && wire.spec.recipe.is_none() {
        return Err(ConfigError::MissingField {
            field: "metadata.type (or spec.recipe)".to_string(),
        });
    }

    let id = wire
        .metadata
        .id
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(s))
        .transpose()
        .map_err(|e| ConfigError::ParseError { message: format!("invalid metadata.id: {e}") })?;

    let owner_references = wire
        .metadata
        .owner_references
        .into_iter()
        .map(|r| -> Result<OwnerReference, ConfigError> {
            Ok(OwnerReference {
                id: Uuid::parse_str(&r.id)
                    .map_err(|e| ConfigError::ParseError { message: format!("invalid ownerReference.id: {e}") })?,
                name: r.name,
                kind: r.kind,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WantConfig {
        name: wire.metadata.name,
        want_type: wire.metadata.want_type,
        id,
        labels: wire.metadata.labels,
        owner_references,
        spec: Spec {
            params: wire.spec.params,
            using: wire.spec.using,
            when: wire.spec.when,
            requires: wire.spec.requires,
            recipe: wire.spec.recipe,
        },
    })
}

/// Parses a single want definition from YAML (spec §6.1's canonical form).
pub fn parse_want_yaml(yaml: &str) -> Result<WantConfig, ConfigError> {
    let wire: WireWant = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError { message: e.to_string() })?;
    wire_to_config(wire)
}

/// Parses a `{wants: [...]}` document containing zero or more want
/// definitions (the shape used by the memory file in spec §6.5 and by
/// multi-want YAML manifests fed to the CLI).
pub fn parse_wants_document_yaml(yaml: &str) -> Result<Vec<WantConfig>, ConfigError> {
    let doc: WireDocument = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError { message: e.to_string() })?;
    doc.wants.into_iter().map(wire_to_config).collect()
}

/// Parses a single want definition from JSON.
pub fn parse_want_json(json: &str) -> Result<WantConfig, ConfigError> {
    let wire: WireWant = serde_json::from_str(json).map_err(|e| ConfigError::ParseError { message: e.to_string() })?;
    wire_to_config(wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_want() {
        let yaml = r#"
metadata:
  name: g
  type: prime numbers
spec:
  params:
    start: 1
    end: 20
"#;
        let config = parse_want_yaml(yaml).unwrap();
        assert_eq!(config.name, "g");
        assert_eq!(config.want_type.as_deref(), Some("prime numbers"));
        assert_eq!(config.spec.params["start"], serde_json::json!(1));
    }

    #[test]
    fn missing_name_is_rejected() {
        let yaml = "metadata:\n  type: prime numbers\n";
        let err = parse_want_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn missing_type_and_recipe_is_rejected() {
        let yaml = "metadata:\n  name: g\n";
        let err = parse_want_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn recipe_satisfies_missing_type() {
        let yaml = "metadata:\n  name: c\nspec:\n  recipe: level 1 approval\n";
        let config = parse_want_yaml(yaml).unwrap();
        assert!(config.want_type.is_none());
        assert_eq!(config.spec.recipe.as_deref(), Some("level 1 approval"));
    }

    #[test]
    fn parses_using_selectors_and_labels() {
        let yaml = r#"
metadata:
  name: s
  type: prime sequence
  labels:
    role: consumer
spec:
  using:
    - role: gen
"#;
        let config = parse_want_yaml(yaml).unwrap();
        assert_eq!(config.labels["role"], "consumer");
        assert_eq!(config.spec.using[0]["role"], "gen");
    }

    #[test]
    fn parses_multi_want_document() {
        let yaml = r#"
wants:
  - metadata:
      name: g
      type: prime numbers
  - metadata:
      name: s
      type: prime sequence
    spec:
      using:
        - role: gen
"#;
        let configs = parse_wants_document_yaml(yaml).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].name, "s");
    }

    #[test]
    fn json_variant_parses_equivalently() {
        let json = r#"{"metadata": {"name": "g", "type": "prime numbers"}}"#;
        let config = parse_want_json(json).unwrap();
        assert_eq!(config.name, "g");
    }
}
