use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Identity and capability descriptor reported by a plugin once per process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub api_version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PluginInfo {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Where a plugin found (or expects) the configuration it manages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigLocation {
    pub path: String,
    pub format: String,
    pub discovered: bool,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Parsed configuration. Field values are opaque to the host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigData {
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ConfigData {
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let _ = self.fields.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldMetadata {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PresetData {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub version: String,
    pub compatible: bool,
}

/// Schema exported by a plugin: field descriptions, presets and versioning.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigMetadata {
    #[serde(default)]
    pub fields: HashMap<String, FieldMetadata>,
    #[serde(default)]
    pub presets: HashMap<String, PresetData>,
    #[serde(default)]
    pub schema: Option<SchemaInfo>,
}
