//! Message and client stubs for the `proto.ConfigPlugin` gRPC service.
//!
//! Kept in the shape `tonic-build` emits so the host builds without `protoc`.

use std::collections::HashMap;

/// Dynamically typed value envelope. Field layout matches `google.protobuf.Any`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypedValue {
    #[prost(string, tag = "1")]
    pub type_url: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PluginInfo {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub version: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub description: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub author: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "5")]
    pub capabilities: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, tag = "6")]
    pub api_version: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "7")]
    pub metadata: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigInfo {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub format: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub discovered: bool,
    #[prost(message, optional, tag = "4")]
    pub last_modified: ::core::option::Option<Timestamp>,
    #[prost(string, repeated, tag = "5")]
    pub suggestions: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigData {
    #[prost(map = "string, message", tag = "1")]
    pub fields: HashMap<::prost::alloc::string::String, TypedValue>,
    #[prost(map = "string, string", tag = "2")]
    pub metadata: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldMetadata {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub description: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub required: bool,
    #[prost(string, repeated, tag = "4")]
    pub options: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, optional, tag = "5")]
    pub default_value: ::core::option::Option<TypedValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PresetData {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub description: ::prost::alloc::string::String,
    #[prost(map = "string, message", tag = "3")]
    pub values: HashMap<::prost::alloc::string::String, TypedValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SchemaInfo {
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub compatible: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigMetadata {
    #[prost(map = "string, message", tag = "1")]
    pub fields: HashMap<::prost::alloc::string::String, FieldMetadata>,
    #[prost(map = "string, message", tag = "2")]
    pub presets: HashMap<::prost::alloc::string::String, PresetData>,
    #[prost(message, optional, tag = "3")]
    pub schema: ::core::option::Option<SchemaInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidationError {
    #[prost(string, tag = "1")]
    pub field: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub code: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetInfoRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetInfoResponse {
    #[prost(message, optional, tag = "1")]
    pub info: ::core::option::Option<PluginInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DetectConfigRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DetectConfigResponse {
    #[prost(message, optional, tag = "1")]
    pub config: ::core::option::Option<ConfigInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParseConfigRequest {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParseConfigResponse {
    #[prost(message, optional, tag = "1")]
    pub data: ::core::option::Option<ConfigData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteConfigRequest {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub data: ::core::option::Option<ConfigData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteConfigResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateFieldRequest {
    #[prost(string, tag = "1")]
    pub field: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub value: ::core::option::Option<TypedValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateFieldResponse {
    #[prost(bool, tag = "1")]
    pub valid: bool,
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateConfigRequest {
    #[prost(message, optional, tag = "1")]
    pub data: ::core::option::Option<ConfigData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ValidateConfigResponse {
    #[prost(bool, tag = "1")]
    pub valid: bool,
    #[prost(message, repeated, tag = "2")]
    pub errors: ::prost::alloc::vec::Vec<ValidationError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSchemaRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSchemaResponse {
    #[prost(message, optional, tag = "1")]
    pub metadata: ::core::option::Option<ConfigMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SupportsFeatureRequest {
    #[prost(string, tag = "1")]
    pub feature: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SupportsFeatureResponse {
    #[prost(bool, tag = "1")]
    pub supported: bool,
}

pub mod config_plugin_client {
    use tonic::codegen::http;
    use tonic::transport::Channel;

    #[derive(Debug, Clone)]
    pub struct ConfigPluginClient {
        inner: tonic::client::Grpc<Channel>,
    }

    macro_rules! unary {
        ($fn_name:ident, $method:literal, $req:ty, $resp:ty) => {
            pub async fn $fn_name(
                &mut self,
                request: impl tonic::IntoRequest<$req>,
            ) -> std::result::Result<tonic::Response<$resp>, tonic::Status> {
                self.inner.ready().await.map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e),
                    )
                })?;
                let codec = tonic::codec::ProstCodec::default();
                let path = http::uri::PathAndQuery::from_static(concat!(
                    "/proto.ConfigPlugin/",
                    $method
                ));
                self.inner.unary(request.into_request(), path, codec).await
            }
        };
    }

    impl ConfigPluginClient {
        pub fn new(channel: Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        unary!(get_info, "GetInfo", super::GetInfoRequest, super::GetInfoResponse);
        unary!(
            detect_config,
            "DetectConfig",
            super::DetectConfigRequest,
            super::DetectConfigResponse
        );
        unary!(
            parse_config,
            "ParseConfig",
            super::ParseConfigRequest,
            super::ParseConfigResponse
        );
        unary!(
            write_config,
            "WriteConfig",
            super::WriteConfigRequest,
            super::WriteConfigResponse
        );
        unary!(
            validate_field,
            "ValidateField",
            super::ValidateFieldRequest,
            super::ValidateFieldResponse
        );
        unary!(
            validate_config,
            "ValidateConfig",
            super::ValidateConfigRequest,
            super::ValidateConfigResponse
        );
        unary!(
            get_schema,
            "GetSchema",
            super::GetSchemaRequest,
            super::GetSchemaResponse
        );
        unary!(
            supports_feature,
            "SupportsFeature",
            super::SupportsFeatureRequest,
            super::SupportsFeatureResponse
        );
    }
}
