use crate::error::Result;
use crate::plugin::context::CallContext;
use crate::plugin::types::{ConfigData, ConfigLocation, ConfigMetadata, PluginInfo};
use async_trait::async_trait;

/// API version a plugin must report from `get_info` to be accepted.
pub const CURRENT_API_VERSION: &str = "v1.0.0";

/// Capability tags a plugin may advertise in [`PluginInfo::capabilities`].
pub mod capability {
    pub const CONFIG_PARSING: &str = "config.parsing";
    pub const CONFIG_WRITING: &str = "config.writing";
    pub const VALIDATION: &str = "validation";
    pub const SCHEMA_EXPORT: &str = "schema.export";
    pub const PRESETS: &str = "presets";
}

/// Contract every configuration plugin process satisfies over RPC.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigPlugin: Send + Sync {
    /// Plugin identity, version and capabilities
    async fn get_info(&self, ctx: &CallContext) -> Result<PluginInfo>;

    /// Locate the configuration file this plugin manages
    async fn detect_config(&self, ctx: &CallContext) -> Result<ConfigLocation>;

    /// Read and parse the configuration at `path`
    async fn parse_config(&self, ctx: &CallContext, path: &str) -> Result<ConfigData>;

    /// Write `data` back to `path`
    async fn write_config(&self, ctx: &CallContext, path: &str, data: &ConfigData) -> Result<()>;

    /// Check a single field value
    async fn validate_field(
        &self,
        ctx: &CallContext,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<()>;

    /// Check a whole configuration
    async fn validate_config(&self, ctx: &CallContext, data: &ConfigData) -> Result<()>;

    /// Field schema and presets
    async fn get_schema(&self, ctx: &CallContext) -> Result<ConfigMetadata>;

    /// Whether the plugin supports an optional feature
    async fn supports_feature(&self, ctx: &CallContext, feature: &str) -> Result<bool>;
}
