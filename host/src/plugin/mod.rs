pub mod context;
pub mod registry;
pub mod trait_def;
pub mod types;

pub use context::CallContext;
pub use registry::{Registry, RegistryStats};
pub use trait_def::{capability, ConfigPlugin, CURRENT_API_VERSION};
pub use types::{
    ConfigData, ConfigLocation, ConfigMetadata, FieldMetadata, PluginInfo, PresetData, SchemaInfo,
};

#[cfg(test)]
pub use trait_def::MockConfigPlugin;
