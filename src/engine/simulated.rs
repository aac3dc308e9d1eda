//! An offline stand-in for the custom resource function. It keeps the
//! MediaLive inputs and channels it created in memory, so a dry run can
//! check what a real deployment would have done.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::{handler::CustomResourceHandler, metrics::*};
use crate::{
    contract::{actions, attrs, props, CustomResourceRequest, CustomResourceResponse, RequestType, CODEC_AVC},
    parameters::{ChannelStart, EncodingProfile, InputType},
};

/// EndPoint attribute of inputs nothing can push to
pub const NO_PUSH_ENDPOINT: &str = "Push InputType only";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedInput {
    pub id: String,
    pub name: String,
    pub input_type: InputType,
    /// the fields the input was created with, keyed by property name
    pub settings: BTreeMap<String, String>,
    pub endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedChannel {
    pub id: String,
    pub name: String,
    pub input_id: String,
    pub profile: EncodingProfile,
    /// (width, height) of every output the profile encodes
    pub renditions: Vec<(u32, u32)>,
    pub destination: String,
    pub state: ChannelState,
}

type ActionResult = Result<CustomResourceResponse, String>;

pub struct SimulatedHandler {
    solution_id: String,
    metrics: Box<dyn MetricsSink>,
    inputs: BTreeMap<String, SimulatedInput>,
    channels: BTreeMap<String, SimulatedChannel>,
    next_id: u32,
}

impl SimulatedHandler {
    pub fn new(solution_id: &str, metrics: Box<dyn MetricsSink>) -> Self {
        Self {
            solution_id: solution_id.to_string(),
            metrics,
            inputs: BTreeMap::new(),
            channels: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn inputs(&self) -> &BTreeMap<String, SimulatedInput> {
        &self.inputs
    }

    pub fn channels(&self) -> &BTreeMap<String, SimulatedChannel> {
        &self.channels
    }

    fn new_id(&mut self) -> String {
        let id = 1_000_000 + self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    fn required<'r>(request: &'r CustomResourceRequest, name: &str) -> Result<&'r str, String> {
        request.non_empty_prop(name).ok_or_else(|| format!("{name} is required"))
    }

    /// anything besides the service token differs from the previous properties
    fn settings_changed(request: &CustomResourceRequest) -> bool {
        let settings = |p: &Map<String, Value>| -> BTreeMap<String, Value> {
            p.iter()
                .filter(|(k, _)| k.as_str() != props::SERVICE_TOKEN)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        match &request.old_resource_properties {
            Some(old) => settings(old) != settings(&request.resource_properties),
            None => true,
        }
    }

    fn input(&mut self, request: &CustomResourceRequest) -> ActionResult {
        match request.request_type {
            RequestType::Create => self.create_input(request),
            RequestType::Update => {
                let id = request.physical_resource_id.clone().unwrap_or_default();
                let endpoint = self
                    .inputs
                    .get(&id)
                    .map(|i| i.endpoint.clone())
                    .ok_or_else(|| format!("input {id} not found"))?;
                if !Self::settings_changed(request) {
                    return Ok(CustomResourceResponse::success(request, id.clone())
                        .with_data(attrs::ID, id)
                        .with_data(attrs::END_POINT, endpoint));
                }
                // a new input under a new id, the old one is deleted once nothing uses it
                let res = self.create_input(request)?;
                tracing::info!(old = %id, new = %res.physical_resource_id, "replacing MediaLive input");
                Ok(res)
            }
            RequestType::Delete => {
                let id = request.physical_resource_id.clone().unwrap_or_default();
                if let Some(channel) = self.channels.values().find(|c| c.input_id == id) {
                    return Err(format!("input {id} is attached to channel {}", channel.id));
                }
                self.inputs.remove(&id);
                Ok(CustomResourceResponse::success(request, id))
            }
        }
    }

    fn create_input(&mut self, request: &CustomResourceRequest) -> ActionResult {
        let name = Self::required(request, props::STREAM_NAME)?.to_string();
        let input_type: InputType = Self::required(request, props::TYPE)?
            .parse()
            .map_err(|e: crate::error::ParameterError| e.to_string())?;
        let relevant: &[&str] = match input_type {
            InputType::UrlPull => &[props::PULL_URL],
            InputType::RtpPush | InputType::RtmpPush => &[props::CIDR],
            InputType::InputDevice => &[props::INPUT_DEVICE_ID],
        };
        let mut settings = BTreeMap::new();
        for field in relevant {
            settings.insert(field.to_string(), Self::required(request, field)?.to_string());
        }
        if input_type == InputType::UrlPull {
            for field in [props::PULL_USER, props::PULL_PASS] {
                if let Some(v) = request.non_empty_prop(field) {
                    settings.insert(field.to_string(), v.to_string());
                }
            }
        }

        let id = self.new_id();
        let host = format!("198.51.100.{}", self.inputs.len() % 250 + 1);
        let endpoint = match input_type {
            InputType::RtpPush => format!("rtp://{host}:5000"),
            InputType::RtmpPush => format!("rtmp://{host}:1935/{name}/stream"),
            InputType::UrlPull | InputType::InputDevice => NO_PUSH_ENDPOINT.to_string(),
        };
        tracing::info!(%id, %input_type, "created MediaLive input");
        self.inputs.insert(id.clone(), SimulatedInput {
            id: id.clone(),
            name,
            input_type,
            settings,
            endpoint: endpoint.clone(),
        });
        Ok(CustomResourceResponse::success(request, id.clone())
            .with_data(attrs::ID, id)
            .with_data(attrs::END_POINT, endpoint))
    }

    fn channel(&mut self, request: &CustomResourceRequest) -> ActionResult {
        match request.request_type {
            RequestType::Create => self.create_channel(request),
            RequestType::Update => {
                let id = request.physical_resource_id.clone().unwrap_or_default();
                if !self.channels.contains_key(&id) {
                    return Err(format!("channel {id} not found"));
                }
                if !Self::settings_changed(request) {
                    return Ok(CustomResourceResponse::success(request, id.clone()).with_data(attrs::CHANNEL_ID, id));
                }
                let res = self.create_channel(request)?;
                tracing::info!(old = %id, new = %res.physical_resource_id, "replacing MediaLive channel");
                Ok(res)
            }
            RequestType::Delete => {
                let id = request.physical_resource_id.clone().unwrap_or_default();
                if let Some(channel) = self.channels.get_mut(&id) {
                    if channel.state == ChannelState::Running {
                        channel.state = ChannelState::Idle;
                        tracing::info!(%id, "stopped MediaLive channel");
                    }
                    self.channels.remove(&id);
                    tracing::info!(%id, "deleted MediaLive channel");
                }
                Ok(CustomResourceResponse::success(request, id))
            }
        }
    }

    fn create_channel(&mut self, request: &CustomResourceRequest) -> ActionResult {
        let name = Self::required(request, props::STREAM_NAME)?.to_string();
        let profile: EncodingProfile = Self::required(request, props::ENCODING_PROFILE)?
            .parse()
            .map_err(|e: crate::error::ParameterError| e.to_string())?;
        let codec = Self::required(request, props::CODEC)?;
        if codec != CODEC_AVC {
            return Err(format!("unsupported codec {codec}"));
        }
        Self::required(request, props::ROLE)?;
        let bucket = Self::required(request, props::S3_BUCKET)?;
        let input_id = Self::required(request, props::INPUT_ID)?.to_string();
        if !self.inputs.contains_key(&input_id) {
            return Err(format!("input {input_id} not found"));
        }
        let id = self.new_id();
        tracing::info!(%id, %profile, "created MediaLive channel");
        self.channels.insert(id.clone(), SimulatedChannel {
            id: id.clone(),
            name,
            input_id,
            profile,
            renditions: profile.renditions().to_vec(),
            destination: format!("s3ssl://{bucket}/stream/index"),
            state: ChannelState::Idle,
        });
        Ok(CustomResourceResponse::success(request, id.clone()).with_data(attrs::CHANNEL_ID, id))
    }

    fn channel_start(&mut self, request: &CustomResourceRequest) -> ActionResult {
        let physical = request
            .physical_resource_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", request.logical_resource_id, request.request_id));
        if request.request_type == RequestType::Delete {
            return Ok(CustomResourceResponse::success(request, physical));
        }
        let start: ChannelStart = Self::required(request, props::CHANNEL_START)?
            .parse()
            .map_err(|e: crate::error::ParameterError| e.to_string())?;
        let id = Self::required(request, props::CHANNEL_ID)?;
        let channel = self.channels.get_mut(id).ok_or_else(|| format!("channel {id} not found"))?;
        if start == ChannelStart::Yes && channel.state != ChannelState::Running {
            channel.state = ChannelState::Running;
            tracing::info!(%id, "started MediaLive channel");
        }
        Ok(CustomResourceResponse::success(request, physical))
    }

    fn uuid(&mut self, request: &CustomResourceRequest) -> ActionResult {
        // the physical id is the identifier, so updates hand back the same one
        let id = match &request.physical_resource_id {
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        Ok(CustomResourceResponse::success(request, id.clone()).with_data(attrs::UUID, id))
    }

    fn anonymous_metric(&mut self, request: &CustomResourceRequest) -> ActionResult {
        let physical = request
            .physical_resource_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", request.logical_resource_id, request.request_id));
        if request.prop(props::SEND_ANONYMOUS_METRIC) != Some("Yes") {
            return Ok(CustomResourceResponse::success(request, physical));
        }
        let field = |name: &str| request.prop(name).unwrap_or_default().to_string();
        let request_type = format!("{:?}", request.request_type);
        let record = MetricRecord::now(
            request.prop(props::SOLUTION_ID).unwrap_or(&self.solution_id),
            &field(props::UUID),
            &field(props::VERSION),
            MetricData {
                input_type: field(props::TYPE),
                cidr: field(props::CIDR),
                encoding_profile: field(props::ENCODING_PROFILE),
                channel_start: field(props::CHANNEL_START),
                request_type,
            },
        );
        if let Err(e) = self.metrics.send(&record) {
            tracing::warn!(error = %e, "failed to send anonymous metric");
        }
        Ok(CustomResourceResponse::success(request, physical))
    }
}

impl CustomResourceHandler for SimulatedHandler {
    fn handle(&mut self, request: &CustomResourceRequest) -> CustomResourceResponse {
        tracing::debug!(
            action = %request.logical_resource_id,
            request_type = ?request.request_type,
            "handling custom resource request"
        );
        let result = match request.logical_resource_id.as_str() {
            actions::MEDIALIVE_INPUT => self.input(request),
            actions::MEDIALIVE_CHANNEL => self.channel(request),
            actions::MEDIALIVE_CHANNEL_START => self.channel_start(request),
            actions::UUID => self.uuid(request),
            actions::ANONYMOUS_METRIC => self.anonymous_metric(request),
            x => Err(format!("unknown action {x}")),
        };
        result.unwrap_or_else(|reason| {
            tracing::warn!(action = %request.logical_resource_id, %reason, "custom resource failed");
            CustomResourceResponse::failed(request, reason)
        })
    }
}

#[cfg(test)]
mod test {
    use serde_json::{json, Map, Value};

    use super::*;
    use crate::contract::CUSTOM_RESOURCE_TYPE;

    fn request(action: &str, ty: RequestType, physical: Option<&str>, properties: Value) -> CustomResourceRequest {
        let resource_properties: Map<String, Value> = properties.as_object().cloned().unwrap_or_default();
        CustomResourceRequest {
            request_type: ty,
            service_token: "arn:aws:lambda:us-east-1:1:function:handler".into(),
            response_url: "https://example.invalid/response".into(),
            stack_id: "stack".into(),
            request_id: "req".into(),
            resource_type: CUSTOM_RESOURCE_TYPE.into(),
            logical_resource_id: action.into(),
            physical_resource_id: physical.map(|s| s.to_string()),
            resource_properties,
            old_resource_properties: None,
        }
    }

    fn handler() -> (SimulatedHandler, MemoryMetricsSink) {
        let sink = MemoryMetricsSink::default();
        (SimulatedHandler::new("SO0109", Box::new(sink.clone())), sink)
    }

    #[test]
    fn push_input_requires_cidr() {
        let (mut h, _) = handler();
        let res = h.handle(&request(actions::MEDIALIVE_INPUT, RequestType::Create, None, json!({
            "StreamName": "live", "Type": "RTMP_PUSH"
        })));
        assert!(!res.is_success());
        assert!(res.reason.unwrap().contains("Cidr"));

        let res = h.handle(&request(actions::MEDIALIVE_INPUT, RequestType::Create, None, json!({
            "StreamName": "live", "Type": "RTMP_PUSH", "Cidr": "10.0.0.0/16"
        })));
        assert!(res.is_success());
        assert_eq!(res.data[attrs::END_POINT], "rtmp://198.51.100.1:1935/live/stream");
        assert_eq!(h.inputs()[&res.data[attrs::ID]].settings.len(), 1);
    }

    #[test]
    fn channel_start_no_leaves_channel_idle() {
        let (mut h, _) = handler();
        let input = h.handle(&request(actions::MEDIALIVE_INPUT, RequestType::Create, None, json!({
            "StreamName": "live", "Type": "URL_PULL", "PullUrl": "https://example.com/a.m3u8"
        })));
        assert_eq!(input.data[attrs::END_POINT], NO_PUSH_ENDPOINT);
        let channel = h.handle(&request(actions::MEDIALIVE_CHANNEL, RequestType::Create, None, json!({
            "StreamName": "live", "EncodingProfile": "HD-720p", "Codec": "AVC", "Role": "arn:role",
            "InputId": input.data[attrs::ID], "Type": "URL_PULL", "S3Bucket": "bucket"
        })));
        let channel_id = channel.data[attrs::CHANNEL_ID].clone();

        let res = h.handle(&request(actions::MEDIALIVE_CHANNEL_START, RequestType::Create, None, json!({
            "ChannelId": channel_id, "ChannelStart": "No"
        })));
        assert!(res.is_success());
        assert_eq!(h.channels()[&channel_id].state, ChannelState::Idle);

        h.handle(&request(actions::MEDIALIVE_CHANNEL_START, RequestType::Update, Some("start"), json!({
            "ChannelId": channel_id, "ChannelStart": "Yes"
        })));
        assert_eq!(h.channels()[&channel_id].state, ChannelState::Running);
        assert_eq!(h.channels()[&channel_id].destination, "s3ssl://bucket/stream/index");
    }

    #[test]
    fn attached_input_cannot_be_deleted() {
        let (mut h, _) = handler();
        let input = h.handle(&request(actions::MEDIALIVE_INPUT, RequestType::Create, None, json!({
            "StreamName": "live", "Type": "INPUT_DEVICE", "InputDeviceId": "hd-123"
        })));
        let input_id = input.data[attrs::ID].clone();
        let channel = h.handle(&request(actions::MEDIALIVE_CHANNEL, RequestType::Create, None, json!({
            "StreamName": "live", "EncodingProfile": "SD-540p", "Codec": "AVC", "Role": "arn:role",
            "InputId": input_id, "Type": "INPUT_DEVICE", "S3Bucket": "bucket"
        })));
        let res = h.handle(&request(actions::MEDIALIVE_INPUT, RequestType::Delete, Some(&input_id), json!({})));
        assert!(!res.is_success());
        assert_eq!(res.physical_resource_id, input_id);

        h.handle(&request(actions::MEDIALIVE_CHANNEL, RequestType::Delete, Some(&channel.data[attrs::CHANNEL_ID]), json!({})));
        let res = h.handle(&request(actions::MEDIALIVE_INPUT, RequestType::Delete, Some(&input_id), json!({})));
        assert!(res.is_success());
        assert!(h.inputs().is_empty());
    }

    #[test]
    fn uuid_is_stable_across_updates() {
        let (mut h, _) = handler();
        let created = h.handle(&request(actions::UUID, RequestType::Create, None, json!({})));
        let id = created.data[attrs::UUID].clone();
        let updated = h.handle(&request(actions::UUID, RequestType::Update, Some(&id), json!({})));
        assert_eq!(updated.data[attrs::UUID], id);
    }

    #[test]
    fn metric_is_only_sent_when_enabled() {
        let (mut h, sink) = handler();
        let properties = json!({
            "SolutionId": "SO0109", "UUID": "u", "Version": "v1.0.0", "Type": "RTP_PUSH",
            "Cidr": "Yes", "EncodingProfile": "HD-1080p", "ChannelStart": "Yes", "SendAnonymousMetric": "No"
        });
        h.handle(&request(actions::ANONYMOUS_METRIC, RequestType::Create, None, properties.clone()));
        assert!(sink.records().is_empty());

        let mut properties = properties;
        properties["SendAnonymousMetric"] = json!("Yes");
        h.handle(&request(actions::ANONYMOUS_METRIC, RequestType::Delete, Some("m"), properties));
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data.request_type, "Delete");
        assert_eq!(records[0].data.cidr, "Yes");
    }

    #[test]
    fn unknown_action_fails() {
        let (mut h, _) = handler();
        let res = h.handle(&request("Other", RequestType::Create, None, json!({})));
        assert!(!res.is_success());
    }

    #[test]
    fn input_update_replaces_only_when_settings_change() {
        let (mut h, _) = handler();
        let properties = json!({ "StreamName": "live", "Type": "URL_PULL", "PullUrl": "https://example.com/a.m3u8" });
        let created = h.handle(&request(actions::MEDIALIVE_INPUT, RequestType::Create, None, properties.clone()));
        let id = created.physical_resource_id.clone();

        let mut same = request(actions::MEDIALIVE_INPUT, RequestType::Update, Some(&id), properties.clone());
        same.old_resource_properties = properties.as_object().cloned();
        assert_eq!(h.handle(&same).physical_resource_id, id);

        let mut push = request(actions::MEDIALIVE_INPUT, RequestType::Update, Some(&id), json!({
            "StreamName": "live", "Type": "RTP_PUSH"
        }));
        push.old_resource_properties = properties.as_object().cloned();
        let res = h.handle(&push);
        assert!(!res.is_success());
        assert_eq!(h.inputs().len(), 1);

        push.resource_properties.insert("Cidr".into(), json!("10.0.0.0/16"));
        let res = h.handle(&push);
        assert!(res.is_success());
        assert_ne!(res.physical_resource_id, id);
        assert!(res.data[attrs::END_POINT].starts_with("rtp://"));
        assert_eq!(h.inputs()[&res.physical_resource_id].input_type, InputType::RtpPush);
    }

    #[test]
    fn deleting_a_running_channel_stops_it_first() {
        let (mut h, _) = handler();
        let input = h.handle(&request(actions::MEDIALIVE_INPUT, RequestType::Create, None, json!({
            "StreamName": "live", "Type": "URL_PULL", "PullUrl": "https://example.com/a.m3u8"
        })));
        let channel = h.handle(&request(actions::MEDIALIVE_CHANNEL, RequestType::Create, None, json!({
            "StreamName": "live", "EncodingProfile": "HD-1080p", "Codec": "AVC", "Role": "arn:role",
            "InputId": input.data[attrs::ID], "Type": "URL_PULL", "S3Bucket": "bucket"
        })));
        let channel_id = channel.data[attrs::CHANNEL_ID].clone();
        assert_eq!(h.channels()[&channel_id].renditions[0], (1920, 1080));
        h.handle(&request(actions::MEDIALIVE_CHANNEL_START, RequestType::Create, None, json!({
            "ChannelId": channel_id, "ChannelStart": "Yes"
        })));
        let res = h.handle(&request(actions::MEDIALIVE_CHANNEL, RequestType::Delete, Some(&channel_id), json!({})));
        assert!(res.is_success());
        assert!(h.channels().is_empty());
        let res = h.handle(&request(actions::MEDIALIVE_INPUT, RequestType::Delete, Some(&input.data[attrs::ID]), json!({})));
        assert!(res.is_success());
    }
}
