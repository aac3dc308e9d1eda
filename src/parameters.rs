//! The user facing inputs of the live streaming stack.
//!
//! Every parameter is declared as a CloudFormation `String` parameter with
//! its allowed values and default, and also has a typed counterpart
//! (`StackParameters`) that the compiler validates before composing anything.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde_json::{json, Value};

use crate::{error::ParameterError, template::Parameter};

pub const INPUT_TYPE: &str = "InputType";
pub const INPUT_DEVICE_ID: &str = "InputDeviceId";
pub const INPUT_CIDR: &str = "InputCIDR";
pub const PULL_URL: &str = "PullUrl";
pub const PULL_USER: &str = "PullUser";
pub const PULL_PASS: &str = "PullPass";
pub const ENCODING_PROFILE: &str = "EncodingProfile";
pub const CHANNEL_START: &str = "ChannelStart";

pub const ALL_PARAMETERS: [&str; 8] = [
    INPUT_TYPE,
    INPUT_DEVICE_ID,
    INPUT_CIDR,
    PULL_URL,
    PULL_USER,
    PULL_PASS,
    ENCODING_PROFILE,
    CHANNEL_START,
];

pub const DEFAULT_PULL_URL: &str = "https://d15an60oaeed9r.cloudfront.net/live_stream_v2/sports_reel_with_markers.m3u8";

/// raw parameter values, keyed by parameter name
pub type ParameterValues = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    RtpPush,
    RtmpPush,
    UrlPull,
    InputDevice,
}

impl InputType {
    pub const ALL: [InputType; 4] = [
        InputType::RtpPush,
        InputType::RtmpPush,
        InputType::UrlPull,
        InputType::InputDevice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::RtpPush => "RTP_PUSH",
            InputType::RtmpPush => "RTMP_PUSH",
            InputType::UrlPull => "URL_PULL",
            InputType::InputDevice => "INPUT_DEVICE",
        }
    }

    pub fn is_push(&self) -> bool {
        matches!(self, InputType::RtpPush | InputType::RtmpPush)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingProfile {
    Hd1080p,
    Hd720p,
    Sd540p,
}

impl EncodingProfile {
    pub const ALL: [EncodingProfile; 3] = [
        EncodingProfile::Hd1080p,
        EncodingProfile::Hd720p,
        EncodingProfile::Sd540p,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingProfile::Hd1080p => "HD-1080p",
            EncodingProfile::Hd720p => "HD-720p",
            EncodingProfile::Sd540p => "SD-540p",
        }
    }

    /// output renditions (width, height) produced by this profile
    pub fn renditions(&self) -> &'static [(u32, u32)] {
        match self {
            EncodingProfile::Hd1080p => &[(1920, 1080), (1280, 720), (960, 540), (768, 432), (640, 360), (512, 288)],
            EncodingProfile::Hd720p => &[(1280, 720), (960, 540), (768, 432), (640, 360), (512, 288)],
            EncodingProfile::Sd540p => &[(960, 540), (768, 432), (640, 360), (512, 288)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelStart {
    Yes,
    No,
}

impl ChannelStart {
    pub const ALL: [ChannelStart; 2] = [ChannelStart::Yes, ChannelStart::No];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStart::Yes => "Yes",
            ChannelStart::No => "No",
        }
    }
}

macro_rules! enum_parameter {
    ($ty:ty, $name:expr) => {
        impl FromStr for $ty {
            type Err = ParameterError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty>::ALL
                    .iter()
                    .find(|v| v.as_str() == s)
                    .copied()
                    .ok_or_else(|| ParameterError::NotAllowed {
                        name: $name.to_string(),
                        value: s.to_string(),
                        allowed: <$ty>::ALL.iter().map(|v| v.as_str().to_string()).collect(),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

enum_parameter!(InputType, INPUT_TYPE);
enum_parameter!(EncodingProfile, ENCODING_PROFILE);
enum_parameter!(ChannelStart, CHANNEL_START);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackParameters {
    pub input_type: InputType,
    pub input_device_id: String,
    pub input_cidr: String,
    pub pull_url: String,
    pub pull_user: String,
    pub pull_pass: String,
    pub encoding_profile: EncodingProfile,
    pub channel_start: ChannelStart,
}

impl Default for StackParameters {
    fn default() -> Self {
        Self {
            input_type: InputType::UrlPull,
            input_device_id: String::new(),
            input_cidr: String::new(),
            pull_url: DEFAULT_PULL_URL.to_string(),
            pull_user: String::new(),
            pull_pass: String::new(),
            encoding_profile: EncodingProfile::Hd720p,
            channel_start: ChannelStart::No,
        }
    }
}

impl StackParameters {
    /// starts from the defaults and applies every provided value.
    /// unknown names and values outside an enumeration are rejected.
    pub fn from_values(values: &ParameterValues) -> Result<Self, ParameterError> {
        let mut out = Self::default();
        for (key, val) in values {
            match key.as_str() {
                INPUT_TYPE => out.input_type = val.parse()?,
                INPUT_DEVICE_ID => out.input_device_id = val.clone(),
                INPUT_CIDR => out.input_cidr = val.clone(),
                PULL_URL => out.pull_url = val.clone(),
                PULL_USER => out.pull_user = val.clone(),
                PULL_PASS => out.pull_pass = val.clone(),
                ENCODING_PROFILE => out.encoding_profile = val.parse()?,
                CHANNEL_START => out.channel_start = val.parse()?,
                x => return Err(ParameterError::UnknownParameter(x.to_string())),
            }
        }
        Ok(out)
    }

    pub fn to_values(&self) -> ParameterValues {
        let mut out = ParameterValues::new();
        out.insert(INPUT_TYPE.into(), self.input_type.as_str().into());
        out.insert(INPUT_DEVICE_ID.into(), self.input_device_id.clone());
        out.insert(INPUT_CIDR.into(), self.input_cidr.clone());
        out.insert(PULL_URL.into(), self.pull_url.clone());
        out.insert(PULL_USER.into(), self.pull_user.clone());
        out.insert(PULL_PASS.into(), self.pull_pass.clone());
        out.insert(ENCODING_PROFILE.into(), self.encoding_profile.as_str().into());
        out.insert(CHANNEL_START.into(), self.channel_start.as_str().into());
        out
    }

    /// cross field checks. These are never fatal: the handler that creates
    /// the input is the one that rejects a missing required field.
    pub fn lint(&self) -> Vec<String> {
        let mut out = vec![];
        let ty = self.input_type;
        match ty {
            InputType::UrlPull => {
                if self.pull_url.is_empty() {
                    out.push(format!("{PULL_URL} is required for {ty} inputs"));
                }
                if !self.pull_pass.is_empty() && self.pull_user.is_empty() {
                    out.push(format!("{PULL_PASS} is set but {PULL_USER} is empty"));
                }
            }
            InputType::RtpPush | InputType::RtmpPush => {
                if self.input_cidr.is_empty() {
                    out.push(format!("{INPUT_CIDR} is required for {ty} inputs"));
                }
            }
            InputType::InputDevice => {
                if self.input_device_id.is_empty() {
                    out.push(format!("{INPUT_DEVICE_ID} is required for {ty} inputs"));
                }
            }
        }
        if !ty.is_push() && !self.input_cidr.is_empty() {
            out.push(format!("{INPUT_CIDR} is ignored for {ty} inputs"));
        }
        if ty != InputType::InputDevice && !self.input_device_id.is_empty() {
            out.push(format!("{INPUT_DEVICE_ID} is ignored for {ty} inputs"));
        }
        if ty != InputType::UrlPull && !self.pull_user.is_empty() {
            out.push(format!("{PULL_USER} is ignored for {ty} inputs"));
        }
        out
    }
}

fn enum_values<T, const N: usize>(all: [T; N], f: fn(&T) -> &'static str) -> Vec<String> {
    all.iter().map(|v| f(v).to_string()).collect()
}

fn string_parameter(description: &str, default: &str) -> Parameter {
    Parameter {
        ty: "String".into(),
        description: description.into(),
        default: Some(default.into()),
        ..Default::default()
    }
}

/// the `Parameters` section of the template
pub fn declarations() -> BTreeMap<String, Parameter> {
    let mut out = BTreeMap::new();
    out.insert(INPUT_TYPE.into(), Parameter {
        allowed_values: enum_values(InputType::ALL, InputType::as_str),
        ..string_parameter(
            "Specify the input type for MediaLive (default parameters are for the demo video). For details on setting up each input type, see https://docs.aws.amazon.com/solutions/latest/live-streaming-on-aws-with-amazon-s3/appendix-a.html.",
            InputType::UrlPull.as_str(),
        )
    });
    out.insert(INPUT_DEVICE_ID.into(), string_parameter(
        "Specify the ID for your Elemental Link Input device (please note a Link device can only be attached to one input at a time)",
        "",
    ));
    out.insert(INPUT_CIDR.into(), string_parameter(
        "For RTP and RTMP PUSH input types ONLY, specify the CIDR Block for the MediaLive SecurityGroup. Input security group restricts access to the input and prevents unauthorized third parties from pushing content into a channel that is associated with that input.",
        "",
    ));
    out.insert(PULL_URL.into(), string_parameter(
        "For URL PULL input type ONLY, specify the primary source URL, this should be a HTTP or HTTPS link to the stream manifest file.",
        DEFAULT_PULL_URL,
    ));
    out.insert(PULL_USER.into(), string_parameter(
        "For URL PULL input type ONLY, if basic authentication is enabled on the source stream enter the username",
        "",
    ));
    out.insert(PULL_PASS.into(), Parameter {
        no_echo: Some(true),
        ..string_parameter(
            "For URL PULL input type ONLY, if basic authentication is enabled on the source stream enter the password",
            "",
        )
    });
    out.insert(ENCODING_PROFILE.into(), Parameter {
        allowed_values: enum_values(EncodingProfile::ALL, EncodingProfile::as_str),
        ..string_parameter(
            "Select an encoding profile. HD 1080p [1920x1080, 1280x720, 960x540, 768x432, 640x360, 512x288] HD 720p [1280x720, 960x540, 768x432, 640x360, 512x288] SD 540p [960x540, 768x432, 640x360, 512x288]  See the implementation guide for details https://docs.aws.amazon.com/solutions/latest/live-streaming/considerations.html",
            EncodingProfile::Hd720p.as_str(),
        )
    });
    out.insert(CHANNEL_START.into(), Parameter {
        allowed_values: enum_values(ChannelStart::ALL, ChannelStart::as_str),
        ..string_parameter(
            "If your source is ready to stream select Yes, this will start the MediaLive Channel as part of the deployment. If you select No you will need to manually start the MediaLive Channel when your source is ready.",
            ChannelStart::No.as_str(),
        )
    });
    out
}

/// parameter groups and labels shown by the CloudFormation console
pub fn interface_metadata() -> Value {
    json!({
        "AWS::CloudFormation::Interface": {
            "ParameterGroups": [
                { "Label": { "default": "LIVE STREAM SOURCE" }, "Parameters": [INPUT_TYPE] },
                { "Label": { "default": "URL_PULL CONFIGURATION" }, "Parameters": [PULL_URL, PULL_USER, PULL_PASS] },
                { "Label": { "default": "RTP_PUSH / RTMP_PUSH CONFIGURATION" }, "Parameters": [INPUT_CIDR] },
                { "Label": { "default": "INPUT_DEVICE CONFIGURATION" }, "Parameters": [INPUT_DEVICE_ID] },
                { "Label": { "default": "ENCODING OPTIONS" }, "Parameters": [ENCODING_PROFILE, CHANNEL_START] }
            ],
            "ParameterLabels": {
                INPUT_TYPE: { "default": "Source Input Type" },
                ENCODING_PROFILE: { "default": "Encoding Profile" },
                INPUT_DEVICE_ID: { "default": "Elemental Link Input Device ID" },
                INPUT_CIDR: { "default": "Input Security Group CIDR Block (REQUIRED)" },
                PULL_URL: { "default": "Source URL (REQUIRED)" },
                PULL_USER: { "default": "Source Username (OPTIONAL)" },
                PULL_PASS: { "default": "Source Password (OPTIONAL)" },
                CHANNEL_START: { "default": "Start MediaLive Channel" }
            }
        }
    })
}

/// checks raw values against the declarations of a template: every name
/// must be declared, and enumerated parameters must use an allowed value.
/// Missing values are filled in from the declared defaults.
pub fn apply_declarations(
    declared: &BTreeMap<String, Parameter>,
    values: &ParameterValues,
) -> Result<ParameterValues, ParameterError> {
    let mut out = ParameterValues::new();
    for key in values.keys() {
        if !declared.contains_key(key) {
            return Err(ParameterError::UnknownParameter(key.clone()));
        }
    }
    for (name, decl) in declared {
        let value = match values.get(name) {
            Some(v) => v.clone(),
            None => decl.default.clone().unwrap_or_default(),
        };
        if !decl.allowed_values.is_empty() && !decl.allowed_values.contains(&value) {
            return Err(ParameterError::NotAllowed {
                name: name.clone(),
                value,
                allowed: decl.allowed_values.clone(),
            });
        }
        out.insert(name.clone(), value);
    }
    Ok(out)
}
