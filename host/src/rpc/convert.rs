//! Conversions between wire messages and the host's plugin types.

use crate::error::{PluginError, Result};
use crate::plugin::types::{
    ConfigData, ConfigLocation, ConfigMetadata, FieldMetadata, PluginInfo, PresetData, SchemaInfo,
};
use crate::rpc::proto;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

/// Type tag stamped on every JSON-encoded value envelope.
pub const JSON_VALUE_TYPE_URL: &str = "type.googleapis.com/google.protobuf.Value";

pub fn value_to_typed(value: &serde_json::Value) -> Result<proto::TypedValue> {
    Ok(proto::TypedValue {
        type_url: JSON_VALUE_TYPE_URL.to_string(),
        value: serde_json::to_vec(value)?,
    })
}

pub fn typed_to_value(typed: &proto::TypedValue) -> Result<serde_json::Value> {
    if typed.value.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    if !typed.type_url.is_empty() && typed.type_url != JSON_VALUE_TYPE_URL {
        return Err(PluginError::Validation(format!(
            "unsupported value type: {}",
            typed.type_url
        )));
    }
    Ok(serde_json::from_slice(&typed.value)?)
}

fn values_to_proto(
    values: &HashMap<String, serde_json::Value>,
) -> Result<HashMap<String, proto::TypedValue>> {
    values
        .iter()
        .map(|(key, value)| Ok((key.clone(), value_to_typed(value)?)))
        .collect()
}

fn values_from_proto(
    values: HashMap<String, proto::TypedValue>,
) -> Result<HashMap<String, serde_json::Value>> {
    values
        .into_iter()
        .map(|(key, typed)| {
            let value = typed_to_value(&typed).map_err(|e| {
                PluginError::Validation(format!("failed to convert field {}: {}", key, e))
            })?;
            Ok((key, value))
        })
        .collect()
}

pub fn timestamp_from_proto(ts: &proto::Timestamp) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts.seconds, ts.nanos.max(0) as u32).single()
}

pub fn timestamp_to_proto(time: &DateTime<Utc>) -> proto::Timestamp {
    proto::Timestamp {
        seconds: time.timestamp(),
        nanos: time.timestamp_subsec_nanos() as i32,
    }
}

pub fn plugin_info_from_proto(info: proto::PluginInfo) -> PluginInfo {
    PluginInfo {
        name: info.name,
        version: info.version,
        description: info.description,
        author: info.author,
        capabilities: info.capabilities.into_iter().collect(),
        api_version: info.api_version,
        metadata: info.metadata,
    }
}

pub fn config_location_from_proto(info: proto::ConfigInfo) -> ConfigLocation {
    ConfigLocation {
        path: info.path,
        format: info.format,
        discovered: info.discovered,
        last_modified: info.last_modified.as_ref().and_then(timestamp_from_proto),
        suggestions: info.suggestions,
    }
}

pub fn config_data_to_proto(data: &ConfigData) -> Result<proto::ConfigData> {
    Ok(proto::ConfigData {
        fields: values_to_proto(&data.fields)?,
        metadata: data.metadata.clone(),
    })
}

pub fn config_data_from_proto(data: proto::ConfigData) -> Result<ConfigData> {
    Ok(ConfigData {
        fields: values_from_proto(data.fields)?,
        metadata: data.metadata,
    })
}

pub fn config_metadata_from_proto(metadata: proto::ConfigMetadata) -> Result<ConfigMetadata> {
    let mut fields = HashMap::with_capacity(metadata.fields.len());
    for (name, field) in metadata.fields {
        let default_value = field.default_value.as_ref().map(typed_to_value).transpose()?;
        let _ = fields.insert(
            name,
            FieldMetadata {
                field_type: field.r#type,
                description: field.description,
                required: field.required,
                options: field.options,
                default_value,
            },
        );
    }

    let mut presets = HashMap::with_capacity(metadata.presets.len());
    for (name, preset) in metadata.presets {
        let _ = presets.insert(
            name,
            PresetData {
                name: preset.name,
                description: preset.description,
                values: values_from_proto(preset.values)?,
            },
        );
    }

    Ok(ConfigMetadata {
        fields,
        presets,
        schema: metadata.schema.map(|schema| SchemaInfo {
            version: schema.version,
            compatible: schema.compatible,
        }),
    })
}
