//! Request/response contract between the provisioning engine and the custom
//! resource handler.
//!
//! The envelope is the CloudFormation custom resource protocol. The action,
//! property and attribute names below are what the handler switches on and
//! looks up, so they are a wire format: renaming any of them breaks existing
//! handlers. Changes must bump [`CONTRACT_VERSION`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CONTRACT_VERSION: &str = "v1";

pub const CUSTOM_RESOURCE_TYPE: &str = "AWS::CloudFormation::CustomResource";

/// action names. The handler dispatches on the logical resource id.
pub mod actions {
    pub const MEDIALIVE_INPUT: &str = "MediaLiveInput";
    pub const MEDIALIVE_CHANNEL: &str = "MediaLiveChannel";
    pub const MEDIALIVE_CHANNEL_START: &str = "MediaLiveChannelStart";
    pub const UUID: &str = "UUID";
    pub const ANONYMOUS_METRIC: &str = "AnonymousMetric";

    pub const ALL: [&str; 5] = [
        MEDIALIVE_INPUT,
        MEDIALIVE_CHANNEL,
        MEDIALIVE_CHANNEL_START,
        UUID,
        ANONYMOUS_METRIC,
    ];
}

pub mod props {
    pub const SERVICE_TOKEN: &str = "ServiceToken";
    pub const STREAM_NAME: &str = "StreamName";
    pub const TYPE: &str = "Type";
    pub const INPUT_DEVICE_ID: &str = "InputDeviceId";
    pub const CIDR: &str = "Cidr";
    pub const PULL_URL: &str = "PullUrl";
    pub const PULL_USER: &str = "PullUser";
    pub const PULL_PASS: &str = "PullPass";
    pub const ENCODING_PROFILE: &str = "EncodingProfile";
    pub const CODEC: &str = "Codec";
    pub const ROLE: &str = "Role";
    pub const INPUT_ID: &str = "InputId";
    pub const S3_BUCKET: &str = "S3Bucket";
    pub const CHANNEL_ID: &str = "ChannelId";
    pub const CHANNEL_START: &str = "ChannelStart";
    pub const SOLUTION_ID: &str = "SolutionId";
    pub const UUID: &str = "UUID";
    pub const VERSION: &str = "Version";
    pub const SEND_ANONYMOUS_METRIC: &str = "SendAnonymousMetric";
}

/// names of the `Data` entries returned by the handler, read with Fn::GetAtt
pub mod attrs {
    pub const ID: &str = "Id";
    pub const END_POINT: &str = "EndPoint";
    pub const CHANNEL_ID: &str = "ChannelId";
    pub const UUID: &str = "UUID";
}

/// the only video codec channels are created with
pub const CODEC_AVC: &str = "AVC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceRequest {
    pub request_type: RequestType,
    pub service_token: String,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    pub resource_type: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Map<String, Value>>,
}

impl CustomResourceRequest {
    /// string property lookup. Missing and non string values are None
    pub fn prop(&self, name: &str) -> Option<&str> {
        self.resource_properties.get(name).and_then(|v| v.as_str())
    }

    /// like `prop` but treats an empty string as absent
    pub fn non_empty_prop(&self, name: &str) -> Option<&str> {
        self.prop(name).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default)]
    pub no_echo: bool,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl CustomResourceResponse {
    pub fn success(request: &CustomResourceRequest, physical_resource_id: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            reason: None,
            physical_resource_id: physical_resource_id.into(),
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            no_echo: false,
            data: BTreeMap::new(),
        }
    }

    /// a failed response keeps the physical id of the request if there was one,
    /// otherwise the logical id is used as a placeholder.
    pub fn failed(request: &CustomResourceRequest, reason: impl Into<String>) -> Self {
        let physical = request
            .physical_resource_id
            .clone()
            .unwrap_or_else(|| request.logical_resource_id.clone());
        Self {
            status: ResponseStatus::Failed,
            reason: Some(reason.into()),
            ..Self::success(request, physical)
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
