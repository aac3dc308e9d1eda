use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::*;
use crate::{
    config::CompilerConfig,
    contract::{actions, attrs, props, CODEC_AVC},
    parameters::{self, InputType},
};

/// logical ids of everything the live streaming stack declares
pub mod logical {
    pub const BUCKET: &str = "CloudFrontToS3S3Bucket";
    pub const BUCKET_POLICY: &str = "CloudFrontToS3S3BucketPolicy";
    pub const ORIGIN_ACCESS_IDENTITY: &str = "CloudFrontToS3CloudFrontOriginAccessIdentity";
    pub const DISTRIBUTION: &str = "CloudFrontToS3CloudFrontDistribution";
    pub const CACHE_POLICY: &str = "CachePolicy";
    pub const MEDIALIVE_ROLE: &str = "MediaLiveRole";
    pub const MEDIALIVE_POLICY: &str = "MediaLivePolicy";
    pub const HANDLER: &str = "CustomResource";
    pub const HANDLER_ROLE: &str = "CustomResourceRole";

    /// the storage + delivery composition. The channel must not be created before all of these.
    pub const STORAGE_AND_DELIVERY: [&str; 4] = [BUCKET, BUCKET_POLICY, ORIGIN_ACCESS_IDENTITY, DISTRIBUTION];
}

pub mod conditions {
    pub const IS_URL_PULL: &str = "IsUrlPull";
    pub const IS_PUSH_INPUT: &str = "IsPushInput";
    pub const IS_INPUT_DEVICE: &str = "IsInputDevice";
    pub const HAS_PULL_USER: &str = "HasPullUser";
    pub const HAS_PULL_PASS: &str = "HasPullPass";
    pub const HAS_INPUT_CIDR: &str = "HasInputCidr";
}

pub mod outputs {
    pub const LIVE_STREAM_URL: &str = "LiveStreamUrl";
    pub const MEDIALIVE_CONSOLE: &str = "MediaLiveConsole";
    pub const LIVE_STREAM_BUCKET: &str = "LiveStreamBucket";
    pub const BUCKET_METRICS: &str = "BucketMetrics";
    pub const MEDIALIVE_PUSH_ENDPOINT: &str = "MediaLivePushEndpoint";
}

pub const ANONYMOUS_DATA_MAPPING: &str = "AnonymousData";
pub const BUCKET_METRICS_ID: &str = "EntireBucket";
pub const MEDIALIVE_SERVICE: &str = "medialive.amazonaws.com";

/// composes the full live streaming stack: an S3 origin behind CloudFront,
/// the MediaLive role, the custom resource handler, and the five
/// provisioning actions that create and start the MediaLive input and channel.
pub struct LiveStreamingStack<'a> {
    pub config: &'a CompilerConfig,
}

impl<'a> LiveStreamingStack<'a> {
    pub fn new(config: &'a CompilerConfig) -> Self {
        Self { config }
    }

    pub fn compose(&self) -> Result<Template, TemplateError> {
        let mut builder = StackBuilder::new(self.config.template_description());
        builder.add_parameters(parameters::declarations());
        builder.set_metadata(parameters::interface_metadata());
        let send = if self.config.send_anonymous_data { "Yes" } else { "No" };
        builder.add_mapping(ANONYMOUS_DATA_MAPPING, json!({ "SendAnonymousData": { "Data": send } }));
        add_input_conditions(&mut builder);

        self.add_storage_and_delivery(&mut builder)?;
        self.add_medialive_access(&mut builder)?;
        self.add_handler(&mut builder)?;
        self.add_actions(&mut builder)?;
        add_outputs(&mut builder)?;
        Ok(builder.build())
    }

    fn add_storage_and_delivery(&self, builder: &mut StackBuilder) -> Result<(), TemplateError> {
        add_cache_policy_resource(builder, &CachePolicy {
            logical_id: logical::CACHE_POLICY.into(),
            forwarded_headers: vec!["Origin".into()],
            ..Default::default()
        })?;
        add_s3_bucket_resource(builder, &S3Bucket {
            logical_id: logical::BUCKET.into(),
            metrics_id: Some(BUCKET_METRICS_ID.into()),
            ..Default::default()
        })?;
        add_origin_access_identity(builder, logical::ORIGIN_ACCESS_IDENTITY, "Access identity for the live stream origin")?;
        add_origin_read_policy(builder, logical::BUCKET_POLICY, logical::BUCKET, logical::ORIGIN_ACCESS_IDENTITY)?;
        add_cloudfront_resource(builder, &S3OriginDistribution {
            logical_id: logical::DISTRIBUTION.into(),
            comment: String::new(),
            bucket_logical_id: logical::BUCKET.into(),
            oai_logical_id: logical::ORIGIN_ACCESS_IDENTITY.into(),
            cache_policy_logical_id: logical::CACHE_POLICY.into(),
            error_responses: S3OriginDistribution::short_cached_errors(),
        })
    }

    fn add_medialive_access(&self, builder: &mut StackBuilder) -> Result<(), TemplateError> {
        add_role_resource(builder, &ServiceRole {
            logical_id: logical::MEDIALIVE_ROLE.into(),
            service: MEDIALIVE_SERVICE.into(),
            ..Default::default()
        })?;
        add_policy_resource(builder, logical::MEDIALIVE_POLICY, &[logical::MEDIALIVE_ROLE], &medialive_policy_statements())
    }

    fn add_handler(&self, builder: &mut StackBuilder) -> Result<(), TemplateError> {
        let handler = &self.config.handler;
        let mut env = BTreeMap::new();
        env.insert("SOLUTION_IDENTIFIER".to_string(), self.config.solution_identifier());
        add_lambda_resource(builder, &LambdaFunction {
            logical_id: logical::HANDLER.into(),
            description: "CFN Custom resource to create, start and delete the MediaLive input and channel".into(),
            runtime: handler.runtime.clone(),
            code_bucket: handler.code_bucket.clone(),
            code_key: handler.code_key.clone(),
            timeout: handler.timeout_seconds,
            environment_variables: env,
            policy_statements: handler_policy_statements(),
            metadata: Some(cfn_nag_suppressions()),
            ..Default::default()
        })?;
        Ok(())
    }

    fn add_actions(&self, builder: &mut StackBuilder) -> Result<(), TemplateError> {
        use conditions::*;
        let token = get_att(logical::HANDLER, "Arn");
        let stack_name = get_ref(pseudo::STACK_NAME);
        let input_type = get_ref(parameters::INPUT_TYPE);

        // only the fields relevant to the chosen input type are sent,
        // the rest are removed with AWS::NoValue
        add_custom_action(builder, CustomAction::new(actions::MEDIALIVE_INPUT, token.clone())
            .prop(props::STREAM_NAME, stack_name.clone())
            .prop(props::TYPE, input_type.clone())
            .prop(props::INPUT_DEVICE_ID, only_if(IS_INPUT_DEVICE, get_ref(parameters::INPUT_DEVICE_ID)))
            .prop(props::CIDR, only_if(IS_PUSH_INPUT, get_ref(parameters::INPUT_CIDR)))
            .prop(props::PULL_URL, only_if(IS_URL_PULL, get_ref(parameters::PULL_URL)))
            .prop(props::PULL_USER, only_if(HAS_PULL_USER, get_ref(parameters::PULL_USER)))
            .prop(props::PULL_PASS, only_if(HAS_PULL_PASS, get_ref(parameters::PULL_PASS))))?;

        // needs the bucket name, so it has to wait for the whole storage + delivery composition
        let mut channel_after: Vec<&str> = logical::STORAGE_AND_DELIVERY.to_vec();
        channel_after.push(logical::MEDIALIVE_POLICY);
        add_custom_action(builder, CustomAction::new(actions::MEDIALIVE_CHANNEL, token.clone())
            .prop(props::STREAM_NAME, stack_name)
            .prop(props::ENCODING_PROFILE, get_ref(parameters::ENCODING_PROFILE))
            .prop(props::CODEC, Value::String(CODEC_AVC.into()))
            .prop(props::ROLE, get_att(logical::MEDIALIVE_ROLE, "Arn"))
            .prop(props::INPUT_ID, get_att(actions::MEDIALIVE_INPUT, attrs::ID))
            .prop(props::TYPE, input_type.clone())
            .prop(props::S3_BUCKET, get_ref(logical::BUCKET))
            .after(&channel_after))?;

        add_custom_action(builder, CustomAction::new(actions::MEDIALIVE_CHANNEL_START, token.clone())
            .prop(props::CHANNEL_ID, get_att(actions::MEDIALIVE_CHANNEL, attrs::CHANNEL_ID))
            .prop(props::CHANNEL_START, get_ref(parameters::CHANNEL_START)))?;

        add_custom_action(builder, CustomAction::new(actions::UUID, token.clone()))?;

        // only enumerated values: never the pull url or credentials, and only
        // whether a CIDR restriction exists, not the block itself
        add_custom_action(builder, CustomAction::new(actions::ANONYMOUS_METRIC, token)
            .prop(props::SOLUTION_ID, Value::String(self.config.solution_id.clone()))
            .prop(props::UUID, get_att(actions::UUID, attrs::UUID))
            .prop(props::VERSION, Value::String(self.config.version.clone()))
            .prop(props::TYPE, input_type)
            .prop(props::CIDR, if_(HAS_INPUT_CIDR, json!("Yes"), json!("No")))
            .prop(props::ENCODING_PROFILE, get_ref(parameters::ENCODING_PROFILE))
            .prop(props::CHANNEL_START, get_ref(parameters::CHANNEL_START))
            .prop(props::SEND_ANONYMOUS_METRIC, find_in_map(ANONYMOUS_DATA_MAPPING, "SendAnonymousData", "Data")))
    }
}

fn input_type_is(ty: InputType) -> Value {
    equals(get_ref(parameters::INPUT_TYPE), Value::String(ty.as_str().into()))
}

fn is_not_empty(parameter: &str) -> Value {
    not(equals(get_ref(parameter), json!("")))
}

fn add_input_conditions(builder: &mut StackBuilder) {
    use conditions::*;
    builder.add_condition(IS_URL_PULL, input_type_is(InputType::UrlPull));
    builder.add_condition(IS_PUSH_INPUT, or(vec![
        input_type_is(InputType::RtpPush),
        input_type_is(InputType::RtmpPush),
    ]));
    builder.add_condition(IS_INPUT_DEVICE, input_type_is(InputType::InputDevice));
    builder.add_condition(HAS_PULL_USER, and(vec![condition(IS_URL_PULL), is_not_empty(parameters::PULL_USER)]));
    builder.add_condition(HAS_PULL_PASS, and(vec![condition(IS_URL_PULL), is_not_empty(parameters::PULL_PASS)]));
    builder.add_condition(HAS_INPUT_CIDR, is_not_empty(parameters::INPUT_CIDR));
}

fn account_scoped(service: &str, suffix: &str) -> Value {
    sub(&format!("arn:${{AWS::Partition}}:{service}:${{AWS::Region}}:${{AWS::AccountId}}:{suffix}"))
}

/// everything MediaLive needs to write the stream to the bucket, read
/// parameters, attach to MediaConnect flows or a VPC, and write logs.
pub fn medialive_policy_statements() -> Vec<PolicyStatement> {
    vec![
        PolicyStatement::allow(
            &["s3:ListBucket", "s3:PutObject", "s3:GetObject", "s3:DeleteObject"],
            vec![sub(&format!("arn:aws:s3:::${{{}}}/*", logical::BUCKET))],
        )
        .with_conditions(json!({
            "StringEquals": { "s3:ResourceAccount": get_ref(pseudo::ACCOUNT_ID) }
        })),
        PolicyStatement::allow(
            &["ssm:DescribeParameters", "ssm:GetParameter", "ssm:GetParameters", "ssm:PutParameter"],
            vec![account_scoped("ssm", "parameter/*")],
        ),
        PolicyStatement::allow(
            &["mediaconnect:ManagedDescribeFlow", "mediaconnect:ManagedAddOutput", "mediaconnect:ManagedRemoveOutput"],
            vec![account_scoped("mediaconnect", "*")],
        ),
        PolicyStatement::allow(
            &[
                "ec2:describeSubnets",
                "ec2:describeNetworkInterfaces",
                "ec2:createNetworkInterface",
                "ec2:createNetworkInterfacePermission",
                "ec2:deleteNetworkInterface",
                "ec2:deleteNetworkInterfacePermission",
                "ec2:describeSecurityGroups",
            ],
            vec![account_scoped("ec2", "*")],
        ),
        PolicyStatement::allow(
            &[
                "logs:CreateLogGroup",
                "logs:CreateLogStream",
                "logs:PutLogEvents",
                "logs:DescribeLogStreams",
                "logs:DescribeLogGroups",
            ],
            vec![sub("arn:${AWS::Partition}:logs:*:*:*")],
        ),
    ]
}

pub fn handler_policy_statements() -> Vec<PolicyStatement> {
    vec![
        PolicyStatement::allow(
            &[
                "medialive:DescribeInputSecurityGroup",
                "medialive:createInputSecurityGroup",
                "medialive:describeInput",
                "medialive:createInput",
                "medialive:deleteInput",
                "medialive:stopChannel",
                "medialive:createChannel",
                "medialive:deleteChannel",
                "medialive:deleteInputSecurityGroup",
                "medialive:describeChannel",
                "medialive:startChannel",
                "medialive:createTags",
                "medialive:deleteTags",
            ],
            vec![account_scoped("medialive", "*")],
        ),
        PolicyStatement::allow(&["ssm:PutParameter"], vec![account_scoped("ssm", "parameter/*")]),
        PolicyStatement::allow(&["iam:PassRole"], vec![get_att(logical::MEDIALIVE_ROLE, "Arn")]),
    ]
}

fn cfn_nag_suppressions() -> Value {
    json!({
        "cfn_nag": {
            "rules_to_suppress": [
                { "id": "W58", "reason": "Invalid warning: function has access to cloudwatch" },
                { "id": "W89", "reason": "This CustomResource does not need to be deployed inside a VPC" },
                { "id": "W92", "reason": "This CustomResource does not need to define ReservedConcurrentExecutions to reserve simultaneous executions" }
            ]
        }
    })
}

fn output(description: &str, value: Value, export_suffix: &str) -> Output {
    Output {
        description: description.into(),
        value,
        export: Some(Export {
            name: sub(&format!("${{AWS::StackName}}-{export_suffix}")),
        }),
    }
}

fn add_outputs(builder: &mut StackBuilder) -> Result<(), TemplateError> {
    use outputs::*;
    let bucket = logical::BUCKET;
    builder.add_output(LIVE_STREAM_URL, output(
        "CloudFront Live Stream URL",
        sub(&format!("https://${{{}.DomainName}}/stream/index.m3u8", logical::DISTRIBUTION)),
        "LiveStreamUrl",
    ))?;
    builder.add_output(MEDIALIVE_CONSOLE, output(
        "MediaLive Channel",
        sub(&format!(
            "https://${{AWS::Region}}.console.aws.amazon.com/medialive/home?region=${{AWS::Region}}#!/channels/${{{}.{}}}",
            actions::MEDIALIVE_CHANNEL,
            attrs::CHANNEL_ID,
        )),
        "MediaLiveConsole",
    ))?;
    builder.add_output(LIVE_STREAM_BUCKET, output(
        "Live Stream Destination Bucket",
        sub(&format!("https://${{AWS::Region}}.console.aws.amazon.com/s3/buckets/${{{bucket}}}?region=${{AWS::Region}}")),
        "LiveStreamBucket",
    ))?;
    builder.add_output(BUCKET_METRICS, output(
        "Bucket Request Metrics",
        sub(&format!(
            "https://${{AWS::Region}}.console.aws.amazon.com/s3/bucket/${{{bucket}}}/metrics/bucket_metrics?region=${{AWS::Region}}&tab=request&period=1h"
        )),
        "BucketMetrics",
    ))?;
    builder.add_output(MEDIALIVE_PUSH_ENDPOINT, output(
        "The MediaLive Input ingress endpoint for push input types",
        get_att(actions::MEDIALIVE_INPUT, attrs::END_POINT),
        "MediaLiveEndpoint",
    ))
}
