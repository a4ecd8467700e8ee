use crate::error::{PluginError, Result};
use crate::plugin::{
    CallContext, ConfigData, ConfigLocation, ConfigMetadata, ConfigPlugin, PluginInfo,
};
use crate::rpc::convert;
use crate::rpc::proto::config_plugin_client::ConfigPluginClient;
use crate::rpc::proto;
use async_trait::async_trait;
use tonic::transport::Channel;
use tracing::debug;

/// `ConfigPlugin` backed by a gRPC channel to a plugin process.
#[derive(Debug, Clone)]
pub struct GrpcConfigPlugin {
    name: String,
    client: ConfigPluginClient,
}

impl GrpcConfigPlugin {
    pub fn new(name: impl Into<String>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            client: ConfigPluginClient::new(channel),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn request<T>(ctx: &CallContext, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(ctx.remaining());
        request
    }

    fn missing(&self, what: &str) -> PluginError {
        PluginError::ContractViolation {
            name: self.name.clone(),
            reason: format!("response is missing {}", what),
        }
    }
}

#[async_trait]
impl ConfigPlugin for GrpcConfigPlugin {
    async fn get_info(&self, ctx: &CallContext) -> Result<PluginInfo> {
        debug!("GetInfo -> {}", self.name);
        let mut client = self.client.clone();
        let response = ctx
            .run(async {
                Ok(client
                    .get_info(Self::request(ctx, proto::GetInfoRequest {}))
                    .await?)
            })
            .await?
            .into_inner();

        let info = response.info.ok_or_else(|| self.missing("plugin info"))?;
        Ok(convert::plugin_info_from_proto(info))
    }

    async fn detect_config(&self, ctx: &CallContext) -> Result<ConfigLocation> {
        let mut client = self.client.clone();
        let response = ctx
            .run(async {
                Ok(client
                    .detect_config(Self::request(ctx, proto::DetectConfigRequest {}))
                    .await?)
            })
            .await?
            .into_inner();

        let config = response.config.ok_or_else(|| self.missing("config info"))?;
        Ok(convert::config_location_from_proto(config))
    }

    async fn parse_config(&self, ctx: &CallContext, path: &str) -> Result<ConfigData> {
        let mut client = self.client.clone();
        let request = proto::ParseConfigRequest {
            path: path.to_string(),
        };
        let response = ctx
            .run(async { Ok(client.parse_config(Self::request(ctx, request)).await?) })
            .await?
            .into_inner();

        convert::config_data_from_proto(response.data.unwrap_or_default())
    }

    async fn write_config(&self, ctx: &CallContext, path: &str, data: &ConfigData) -> Result<()> {
        let mut client = self.client.clone();
        let request = proto::WriteConfigRequest {
            path: path.to_string(),
            data: Some(convert::config_data_to_proto(data)?),
        };
        let _ = ctx
            .run(async { Ok(client.write_config(Self::request(ctx, request)).await?) })
            .await?;
        Ok(())
    }

    async fn validate_field(
        &self,
        ctx: &CallContext,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<()> {
        let mut client = self.client.clone();
        let request = proto::ValidateFieldRequest {
            field: field.to_string(),
            value: Some(convert::value_to_typed(value)?),
        };
        let response = ctx
            .run(async { Ok(client.validate_field(Self::request(ctx, request)).await?) })
            .await?
            .into_inner();

        if response.valid {
            Ok(())
        } else {
            Err(PluginError::Validation(response.error))
        }
    }

    async fn validate_config(&self, ctx: &CallContext, data: &ConfigData) -> Result<()> {
        let mut client = self.client.clone();
        let request = proto::ValidateConfigRequest {
            data: Some(convert::config_data_to_proto(data)?),
        };
        let response = ctx
            .run(async { Ok(client.validate_config(Self::request(ctx, request)).await?) })
            .await?
            .into_inner();

        if response.valid {
            return Ok(());
        }
        let message = response
            .errors
            .into_iter()
            .next()
            .map(|e| format!("{}: {}", e.field, e.message))
            .unwrap_or_else(|| "configuration rejected".to_string());
        Err(PluginError::Validation(message))
    }

    async fn get_schema(&self, ctx: &CallContext) -> Result<ConfigMetadata> {
        let mut client = self.client.clone();
        let response = ctx
            .run(async {
                Ok(client
                    .get_schema(Self::request(ctx, proto::GetSchemaRequest {}))
                    .await?)
            })
            .await?
            .into_inner();

        convert::config_metadata_from_proto(response.metadata.unwrap_or_default())
    }

    async fn supports_feature(&self, ctx: &CallContext, feature: &str) -> Result<bool> {
        let mut client = self.client.clone();
        let request = proto::SupportsFeatureRequest {
            feature: feature.to_string(),
        };
        let response = ctx
            .run(async { Ok(client.supports_feature(Self::request(ctx, request)).await?) })
            .await?
            .into_inner();

        Ok(response.supported)
    }
}
