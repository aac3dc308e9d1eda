use std::collections::BTreeSet;

use live_streaming::{
    config::CompilerConfig,
    contract::{actions, attrs, props, CustomResourceRequest, CustomResourceResponse, RequestType},
    engine::*,
    error::{DeployError, MetricsError, ParameterError, ResolveError},
    parameters::*,
    resources::{logical, outputs},
    template::Template,
};

const SECRET_URL: &str = "https://origin.example.com/private/live.m3u8";
const SECRET_USER: &str = "stream-operator";
const SECRET_PASS: &str = "hunter2-secret";

fn values(pairs: &[(&str, &str)]) -> ParameterValues {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn compose() -> Template {
    live_streaming::synthesize(&CompilerConfig::default()).unwrap()
}

fn dry_run() -> (Deployment<SimulatedHandler>, MemoryMetricsSink) {
    let sink = MemoryMetricsSink::default();
    let deployment = live_streaming::dry_run_deployment(&CompilerConfig::default(), Box::new(sink.clone()));
    (deployment, sink)
}

fn create(pairs: &[(&str, &str)]) -> (Deployment<SimulatedHandler>, DeployReport, MemoryMetricsSink) {
    let (mut deployment, sink) = dry_run();
    let report = deployment.create(&compose(), &values(pairs)).unwrap();
    (deployment, report, sink)
}

fn input_fields(report: &DeployReport) -> BTreeSet<String> {
    let requests: Vec<&CustomResourceRequest> = report.dispatched_to(actions::MEDIALIVE_INPUT).collect();
    assert_eq!(requests.len(), 1);
    requests[0]
        .resource_properties
        .keys()
        .filter(|k| ![props::SERVICE_TOKEN, props::STREAM_NAME, props::TYPE].contains(&k.as_str()))
        .cloned()
        .collect()
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn event_index(report: &DeployReport, logical_id: &str) -> usize {
    report
        .events
        .iter()
        .position(|e| e.logical_resource_id == logical_id)
        .unwrap_or_else(|| panic!("no event for {logical_id}"))
}

#[test]
fn input_request_only_carries_relevant_fields() {
    let cases: Vec<(Vec<(&str, &str)>, Vec<&str>)> = vec![
        (vec![(INPUT_TYPE, "URL_PULL")], vec![props::PULL_URL]),
        (
            vec![(INPUT_TYPE, "URL_PULL"), (PULL_USER, SECRET_USER), (PULL_PASS, SECRET_PASS)],
            vec![props::PULL_URL, props::PULL_USER, props::PULL_PASS],
        ),
        // a CIDR block means nothing to a pull input
        (vec![(INPUT_TYPE, "URL_PULL"), (INPUT_CIDR, "10.0.0.0/16")], vec![props::PULL_URL]),
        (vec![(INPUT_TYPE, "RTP_PUSH"), (INPUT_CIDR, "10.0.0.0/16")], vec![props::CIDR]),
        (vec![(INPUT_TYPE, "RTMP_PUSH"), (INPUT_CIDR, "0.0.0.0/0")], vec![props::CIDR]),
        (vec![(INPUT_TYPE, "INPUT_DEVICE"), (INPUT_DEVICE_ID, "hd-0123456789")], vec![props::INPUT_DEVICE_ID]),
    ];
    for (pairs, expected) in cases {
        let (deployment, report, _) = create(&pairs);
        assert_eq!(input_fields(&report), set(&expected), "{pairs:?}");
        assert_eq!(deployment.handler().inputs().len(), 1);
        assert_eq!(deployment.handler().channels().len(), 1);
    }
}

#[test]
fn push_inputs_expose_their_endpoint() {
    let (_, report, _) = create(&[(INPUT_TYPE, "RTMP_PUSH"), (INPUT_CIDR, "10.0.0.0/16")]);
    assert!(report.outputs[outputs::MEDIALIVE_PUSH_ENDPOINT].starts_with("rtmp://"));

    let (_, report, _) = create(&[]);
    assert_eq!(report.outputs[outputs::MEDIALIVE_PUSH_ENDPOINT], NO_PUSH_ENDPOINT);
}

#[test]
fn channel_waits_for_bucket_and_distribution() {
    let (_, report, _) = create(&[]);
    let channel = event_index(&report, actions::MEDIALIVE_CHANNEL);
    for dep in logical::STORAGE_AND_DELIVERY {
        assert!(event_index(&report, dep) < channel, "{dep}");
    }
    assert!(event_index(&report, actions::MEDIALIVE_INPUT) < channel);
    assert!(event_index(&report, logical::MEDIALIVE_POLICY) < channel);
    assert!(channel < event_index(&report, actions::MEDIALIVE_CHANNEL_START));
}

#[test]
fn channel_start_controls_channel_state() {
    let (deployment, report, _) = create(&[(CHANNEL_START, "No")]);
    let starts: Vec<_> = report.dispatched_to(actions::MEDIALIVE_CHANNEL_START).collect();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].prop(props::CHANNEL_START), Some("No"));
    let channel = deployment.handler().channels().values().next().unwrap();
    assert_eq!(channel.state, ChannelState::Idle);

    let (deployment, _, _) = create(&[(CHANNEL_START, "Yes")]);
    let channel = deployment.handler().channels().values().next().unwrap();
    assert_eq!(channel.state, ChannelState::Running);
}

#[test]
fn anonymous_metric_never_carries_source_settings() {
    let (_, report, sink) = create(&[
        (INPUT_TYPE, "URL_PULL"),
        (PULL_URL, SECRET_URL),
        (PULL_USER, SECRET_USER),
        (PULL_PASS, SECRET_PASS),
    ]);
    let metric: Vec<_> = report.dispatched_to(actions::ANONYMOUS_METRIC).collect();
    assert_eq!(metric.len(), 1);
    for name in [props::PULL_URL, props::PULL_USER, props::PULL_PASS] {
        assert!(!metric[0].resource_properties.contains_key(name), "{name}");
    }
    let request = serde_json::to_string(metric[0]).unwrap();
    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = serde_json::to_string(&records[0]).unwrap();
    for secret in [SECRET_URL, SECRET_USER, SECRET_PASS] {
        assert!(!request.contains(secret));
        assert!(!record.contains(secret));
    }
    assert_eq!(records[0].data.cidr, "No");
    assert_eq!(records[0].data.input_type, "URL_PULL");
}

#[test]
fn metric_reports_cidr_presence_not_the_block() {
    let (_, _, sink) = create(&[(INPUT_TYPE, "RTP_PUSH"), (INPUT_CIDR, "203.0.113.0/24")]);
    let record = sink.records().remove(0);
    assert_eq!(record.data.cidr, "Yes");
    assert!(!serde_json::to_string(&record).unwrap().contains("203.0.113.0"));
}

#[test]
fn update_with_identical_inputs_keeps_installation_id() {
    let (mut deployment, _, _) = create(&[]);
    let before = deployment.stack().unwrap().resources[actions::UUID].state.attributes[attrs::UUID].clone();
    let report = deployment.update(&compose(), &ParameterValues::new()).unwrap();
    assert!(report.dispatched.is_empty());
    let after = &deployment.stack().unwrap().resources[actions::UUID].state.attributes[attrs::UUID];
    assert_eq!(&before, after);
}

#[test]
fn update_with_new_start_value_only_redispatches_what_changed() {
    let (mut deployment, _, _) = create(&[(CHANNEL_START, "No")]);
    let uuid = deployment.stack().unwrap().resources[actions::UUID].state.attributes[attrs::UUID].clone();
    let report = deployment.update(&compose(), &values(&[(CHANNEL_START, "Yes")])).unwrap();
    let dispatched: BTreeSet<&str> = report.dispatched.iter().map(|r| r.logical_resource_id.as_str()).collect();
    assert_eq!(dispatched, BTreeSet::from([actions::ANONYMOUS_METRIC, actions::MEDIALIVE_CHANNEL_START]));
    let channel = deployment.handler().channels().values().next().unwrap();
    assert_eq!(channel.state, ChannelState::Running);
    assert_eq!(deployment.stack().unwrap().resources[actions::UUID].state.attributes[attrs::UUID], uuid);
}

#[test]
fn worked_example() {
    let pairs = [(INPUT_TYPE, "URL_PULL"), (ENCODING_PROFILE, "HD-720p"), (CHANNEL_START, "No")];
    let template = compose();
    assert_eq!(template.resources_of_type("AWS::S3::Bucket").count(), 1);
    assert_eq!(template.resources_of_type("AWS::CloudFront::Distribution").count(), 1);
    let statements = &template.resources[logical::MEDIALIVE_POLICY].properties["PolicyDocument"]["Statement"];
    assert_eq!(statements.as_array().unwrap().len(), 5);

    let (deployment, report, _) = create(&pairs);
    let input: Vec<_> = report.dispatched_to(actions::MEDIALIVE_INPUT).collect();
    assert_eq!(input.len(), 1);
    assert_eq!(input[0].prop(props::TYPE), Some("URL_PULL"));
    assert_eq!(input[0].prop(props::PULL_URL), Some(DEFAULT_PULL_URL));

    let channel: Vec<_> = report.dispatched_to(actions::MEDIALIVE_CHANNEL).collect();
    assert_eq!(channel.len(), 1);
    assert_eq!(channel[0].prop(props::ENCODING_PROFILE), Some("HD-720p"));
    assert_eq!(channel[0].prop(props::CODEC), Some("AVC"));
    let bucket = &deployment.stack().unwrap().resources[logical::BUCKET].state.physical_id;
    assert_eq!(channel[0].prop(props::S3_BUCKET), Some(bucket.as_str()));

    let start: Vec<_> = report.dispatched_to(actions::MEDIALIVE_CHANNEL_START).collect();
    assert_eq!(start.len(), 1);
    assert_eq!(start[0].prop(props::CHANNEL_START), Some("No"));

    assert_eq!(report.outputs.len(), 5);
    let domain = &deployment.stack().unwrap().resources[logical::DISTRIBUTION].state.attributes["DomainName"];
    assert_eq!(report.outputs[outputs::LIVE_STREAM_URL], format!("https://{domain}/stream/index.m3u8"));
    let channel_id = deployment.handler().channels().keys().next().unwrap();
    assert!(report.outputs[outputs::MEDIALIVE_CONSOLE].ends_with(&format!("#!/channels/{channel_id}")));
    assert!(report.outputs[outputs::LIVE_STREAM_BUCKET].contains(bucket.as_str()));
}

struct FailingSink;

impl MetricsSink for FailingSink {
    fn send(&self, _: &MetricRecord) -> Result<(), MetricsError> {
        Err(MetricsError::Http("connection refused".into()))
    }
}

#[test]
fn metrics_failure_never_fails_the_deployment() {
    let mut deployment = live_streaming::dry_run_deployment(&CompilerConfig::default(), Box::new(FailingSink));
    let report = deployment.create(&compose(), &ParameterValues::new()).unwrap();
    assert_eq!(report.status_of(actions::ANONYMOUS_METRIC), Some(ResourceStatus::CreateComplete));

    // nothing listens on this port
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let mut conf = CompilerConfig::default();
    conf.metrics.endpoint = format!("http://127.0.0.1:{port}/generic");
    conf.metrics.timeout_seconds = 1;
    let mut deployment = live_streaming::dry_run_with_http_metrics(&conf);
    let template = live_streaming::synthesize(&conf).unwrap();
    assert!(deployment.create(&template, &ParameterValues::new()).is_ok());
}

/// delegates to the simulated handler, except for one action that always fails
struct FailOn {
    inner: SimulatedHandler,
    action: &'static str,
}

impl CustomResourceHandler for FailOn {
    fn handle(&mut self, request: &CustomResourceRequest) -> CustomResourceResponse {
        if request.logical_resource_id == self.action && request.request_type != RequestType::Delete {
            return CustomResourceResponse::failed(request, "simulated failure");
        }
        self.inner.handle(request)
    }
}

#[test]
fn blocking_failure_rolls_back() {
    let handler = FailOn {
        inner: SimulatedHandler::new("SO0109", Box::new(MemoryMetricsSink::default())),
        action: actions::MEDIALIVE_CHANNEL_START,
    };
    let mut deployment = Deployment::from_config(&CompilerConfig::default(), handler);
    let err = deployment.create(&compose(), &ParameterValues::new()).unwrap_err();
    assert!(matches!(
        err,
        DeployError::ResourceFailed { ref logical_id, .. } if logical_id == actions::MEDIALIVE_CHANNEL_START
    ));
    assert!(deployment.stack().is_none());
    assert!(deployment.handler().inner.channels().is_empty());
    assert!(deployment.handler().inner.inputs().is_empty());
}

#[test]
fn missing_required_field_fails_input_creation() {
    let (mut deployment, _) = dry_run();
    let err = deployment
        .create(&compose(), &values(&[(INPUT_TYPE, "RTP_PUSH")]))
        .unwrap_err();
    match err {
        DeployError::ResourceFailed { logical_id, reason } => {
            assert_eq!(logical_id, actions::MEDIALIVE_INPUT);
            assert!(reason.contains(props::CIDR));
        }
        x => panic!("unexpected error {x}"),
    }
}

#[test]
fn invalid_parameters_fail_before_any_action() {
    let (mut deployment, _) = dry_run();
    let err = deployment
        .create(&compose(), &values(&[(ENCODING_PROFILE, "UHD-2160p")]))
        .unwrap_err();
    assert!(matches!(err, DeployError::Parameter(ParameterError::NotAllowed { .. })));
    assert!(deployment.handler().inputs().is_empty());
}

#[test]
fn dependency_cycles_are_detected() {
    let mut template = compose();
    if let Some(input) = template.resources.get_mut(actions::MEDIALIVE_INPUT) {
        input.depends_on.push(actions::MEDIALIVE_CHANNEL.to_string());
    }
    let (mut deployment, _) = dry_run();
    let err = deployment.create(&template, &ParameterValues::new()).unwrap_err();
    assert!(matches!(err, DeployError::Resolve(ResolveError::DependencyCycle(_))));
}

#[test]
fn delete_runs_in_reverse_dependency_order() {
    let (mut deployment, _, sink) = create(&[(CHANNEL_START, "Yes")]);
    let report = deployment.delete().unwrap();
    let order: Vec<&str> = report
        .dispatched
        .iter()
        .inspect(|r| assert_eq!(r.request_type, RequestType::Delete))
        .map(|r| r.logical_resource_id.as_str())
        .collect();
    let pos = |id: &str| order.iter().position(|o| *o == id).unwrap();
    assert!(pos(actions::MEDIALIVE_CHANNEL_START) < pos(actions::MEDIALIVE_CHANNEL));
    assert!(pos(actions::MEDIALIVE_CHANNEL) < pos(actions::MEDIALIVE_INPUT));
    assert!(pos(actions::ANONYMOUS_METRIC) < pos(actions::UUID));
    assert!(deployment.handler().channels().is_empty());
    assert!(deployment.handler().inputs().is_empty());
    assert_eq!(report.status_of(logical::BUCKET), Some(ResourceStatus::DeleteSkipped));
    assert!(deployment.stack().is_none());
    // the delete is reported too
    assert_eq!(sink.records().last().unwrap().data.request_type, "Delete");
}

fn physical_id<H: CustomResourceHandler>(deployment: &Deployment<H>, logical_id: &str) -> String {
    deployment.stack().unwrap().resources[logical_id].state.physical_id.clone()
}

#[test]
fn changing_the_input_type_replaces_input_and_channel() {
    let (mut deployment, _, _) = create(&[]);
    let old_input = physical_id(&deployment, actions::MEDIALIVE_INPUT);
    let old_channel = physical_id(&deployment, actions::MEDIALIVE_CHANNEL);

    let report = deployment
        .update(&compose(), &values(&[(INPUT_TYPE, "RTMP_PUSH"), (INPUT_CIDR, "10.0.0.0/16")]))
        .unwrap();
    let input = physical_id(&deployment, actions::MEDIALIVE_INPUT);
    assert_ne!(input, old_input);
    assert!(report.outputs[outputs::MEDIALIVE_PUSH_ENDPOINT].starts_with("rtmp://"));

    let handler = deployment.handler();
    assert_eq!(handler.inputs().len(), 1);
    assert_eq!(handler.inputs()[&input].input_type, InputType::RtmpPush);
    assert_eq!(handler.channels().len(), 1);
    let channel = handler.channels().values().next().unwrap();
    assert_ne!(channel.id, old_channel);
    assert_eq!(channel.input_id, input);

    let deleted: Vec<&str> = report
        .events
        .iter()
        .filter(|e| e.resource_status == ResourceStatus::DeleteComplete)
        .map(|e| e.physical_resource_id.as_str())
        .collect();
    assert_eq!(deleted, vec![old_channel.as_str(), old_input.as_str()]);
}

#[test]
fn update_missing_a_required_field_keeps_the_running_input() {
    let (mut deployment, _, _) = create(&[]);
    let old_input = physical_id(&deployment, actions::MEDIALIVE_INPUT);

    let err = deployment
        .update(&compose(), &values(&[(INPUT_TYPE, "RTMP_PUSH")]))
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::ResourceFailed { ref logical_id, ref reason }
            if logical_id == actions::MEDIALIVE_INPUT && reason.contains(props::CIDR)
    ));
    assert_eq!(physical_id(&deployment, actions::MEDIALIVE_INPUT), old_input);
    let inputs = deployment.handler().inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[&old_input].input_type, InputType::UrlPull);
}

#[test]
fn changing_the_profile_replaces_the_channel() {
    let (mut deployment, _, _) = create(&[(ENCODING_PROFILE, "SD-540p"), (CHANNEL_START, "Yes")]);
    let input = physical_id(&deployment, actions::MEDIALIVE_INPUT);
    deployment
        .update(&compose(), &values(&[(ENCODING_PROFILE, "HD-1080p"), (CHANNEL_START, "Yes")]))
        .unwrap();
    assert_eq!(physical_id(&deployment, actions::MEDIALIVE_INPUT), input);
    let channels = deployment.handler().channels();
    assert_eq!(channels.len(), 1);
    let channel = channels.values().next().unwrap();
    assert_eq!(channel.profile, EncodingProfile::Hd1080p);
    assert_eq!(channel.renditions.len(), 6);
    assert_eq!(channel.state, ChannelState::Running);
}

#[test]
fn failed_update_deletes_the_replacement_input() {
    let handler = FailOn {
        inner: SimulatedHandler::new("SO0109", Box::new(MemoryMetricsSink::default())),
        action: "",
    };
    let mut deployment = Deployment::from_config(&CompilerConfig::default(), handler);
    deployment.create(&compose(), &ParameterValues::new()).unwrap();
    let old_input = physical_id(&deployment, actions::MEDIALIVE_INPUT);
    let old_channel = physical_id(&deployment, actions::MEDIALIVE_CHANNEL);

    deployment.handler_mut().action = actions::MEDIALIVE_CHANNEL;
    let err = deployment
        .update(&compose(), &values(&[(INPUT_TYPE, "RTP_PUSH"), (INPUT_CIDR, "10.0.0.0/16")]))
        .unwrap_err();
    assert!(matches!(
        err,
        DeployError::ResourceFailed { ref logical_id, .. } if logical_id == actions::MEDIALIVE_CHANNEL
    ));
    assert_eq!(physical_id(&deployment, actions::MEDIALIVE_INPUT), old_input);
    assert_eq!(physical_id(&deployment, actions::MEDIALIVE_CHANNEL), old_channel);
    let inner = &deployment.handler().inner;
    assert_eq!(inner.inputs().keys().collect::<Vec<_>>(), vec![&old_input]);
    assert_eq!(inner.channels()[&old_channel].input_id, old_input);
}

#[test]
fn managed_policies_follow_the_partition() {
    let mut conf = CompilerConfig::default();
    conf.region = "cn-north-1".into();
    let template = live_streaming::synthesize(&conf).unwrap();
    let mut deployment = live_streaming::dry_run_deployment(&conf, Box::new(MemoryMetricsSink::default()));
    deployment.create(&template, &ParameterValues::new()).unwrap();
    assert_eq!(deployment.pseudo().partition, "aws-cn");
    let role = &deployment.stack().unwrap().resources[logical::HANDLER_ROLE];
    assert_eq!(
        role.properties["ManagedPolicyArns"][0],
        "arn:aws-cn:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole"
    );
}
