use std::collections::BTreeMap;

use getset::Getters;
use serde::{Deserialize, Deserializer, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One row of an image's history, as returned by `GET /images/{name}/history`.
///
/// Older runtimes serialize fields in lowercase, newer ones in PascalCase; both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct HistoryEntry {
    /// The layer id.
    #[serde(rename = "Id", alias = "id")]
    id: String,

    /// Tags pointing at this layer.
    #[serde(
        rename = "Tags",
        alias = "tags",
        default,
        deserialize_with = "null_as_default"
    )]
    tags: Vec<String>,

    /// The instruction that created this layer.
    #[serde(
        rename = "CreatedBy",
        alias = "createdBy",
        default,
        deserialize_with = "null_as_default"
    )]
    created_by: String,
}

/// The inspect record of a layer, as returned by `GET /images/{id}/json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct ImageInspect {
    /// The layer id.
    #[serde(rename = "id", alias = "Id")]
    #[getset(get = "pub")]
    id: String,

    /// The parent layer id. Empty for the base layer.
    #[serde(
        rename = "parent",
        alias = "Parent",
        default,
        deserialize_with = "null_as_default"
    )]
    parent: String,

    /// The author of the layer.
    #[serde(
        rename = "author",
        alias = "Author",
        default,
        deserialize_with = "null_as_default"
    )]
    #[getset(get = "pub")]
    author: String,

    /// The runtime configuration recorded with the layer.
    #[serde(
        rename = "config",
        alias = "Config",
        default,
        deserialize_with = "null_as_default"
    )]
    #[getset(get = "pub")]
    config: LayerConfig,
}

/// The parts of a layer's runtime configuration that carry over to a flattened image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(
        rename = "PortSpecs",
        alias = "portSpecs",
        default,
        deserialize_with = "null_as_default"
    )]
    port_specs: Vec<String>,

    #[serde(
        rename = "ExposedPorts",
        default,
        deserialize_with = "null_as_default"
    )]
    exposed_ports: BTreeMap<String, serde_json::Value>,

    #[serde(
        rename = "Cmd",
        alias = "cmd",
        default,
        deserialize_with = "null_as_default"
    )]
    cmd: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HistoryEntry {
    /// Creates a new history entry.
    pub fn new(id: impl Into<String>, tags: Vec<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tags,
            created_by: created_by.into(),
        }
    }
}

impl ImageInspect {
    /// Creates a new inspect record. An empty `parent` marks a base layer.
    pub fn new(
        id: impl Into<String>,
        parent: impl Into<String>,
        author: impl Into<String>,
        config: LayerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            parent: parent.into(),
            author: author.into(),
            config,
        }
    }

    /// Returns the parent layer id, or `None` for a base layer.
    pub fn parent(&self) -> Option<&str> {
        Some(self.parent.as_str()).filter(|parent| !parent.is_empty())
    }
}

impl LayerConfig {
    /// Creates a config from legacy port specs and a command line.
    pub fn new(port_specs: Vec<String>, cmd: Vec<String>) -> Self {
        Self {
            port_specs,
            exposed_ports: BTreeMap::new(),
            cmd,
        }
    }

    /// Returns the exposed ports.
    ///
    /// Legacy `PortSpecs` win when present; otherwise the keys of `ExposedPorts` are used, in
    /// sorted order.
    pub fn ports(&self) -> Vec<String> {
        if !self.port_specs.is_empty() {
            return self.port_specs.clone();
        }

        self.exposed_ports.keys().cloned().collect()
    }

    /// Returns the command line.
    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Deserializes `null` as the type's default value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
