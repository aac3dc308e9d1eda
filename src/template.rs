use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::TemplateError;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// pseudo parameters the template refers to. These are
/// always resolvable without being declared under `Parameters`.
pub mod pseudo {
    pub const ACCOUNT_ID: &str = "AWS::AccountId";
    pub const PARTITION: &str = "AWS::Partition";
    pub const REGION: &str = "AWS::Region";
    pub const STACK_NAME: &str = "AWS::StackName";
    pub const STACK_ID: &str = "AWS::StackId";
    pub const URL_SUFFIX: &str = "AWS::URLSuffix";
    pub const NO_VALUE: &str = "AWS::NoValue";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "Metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(rename = "Parameters", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(rename = "Mappings", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mappings: BTreeMap<String, Value>,
    #[serde(rename = "Conditions", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, Value>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// we make it pretty so if a user needs to look at the stack in Cfn console, it looks nice
    pub fn to_json_pretty(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, TemplateError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn resources_of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources.iter().filter(move |(_, r)| r.ty == ty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "Default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(rename = "AllowedValues", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    #[serde(rename = "NoEcho", default, skip_serializing_if = "Option::is_none")]
    pub no_echo: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties", default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
    #[serde(rename = "Metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Resource {
    pub fn new(ty: impl Into<String>, properties: Value) -> Self {
        Self {
            ty: ty.into(),
            properties,
            ..Default::default()
        }
    }

    pub fn depends_on<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            let name = name.as_ref().to_string();
            if !self.depends_on.contains(&name) {
                self.depends_on.push(name);
            }
        }
        self
    }

    pub fn retain(mut self) -> Self {
        self.deletion_policy = Some("Retain".into());
        self.update_replace_policy = Some("Retain".into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_custom(&self) -> bool {
        is_custom_type(&self.ty)
    }
}

pub fn is_custom_type(ty: &str) -> bool {
    ty == "AWS::CloudFormation::CustomResource" || ty.starts_with("Custom::")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Export", default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Export {
    #[serde(rename = "Name")]
    pub name: Value,
}

pub fn get_ref(name: &str) -> Value {
    json!({ "Ref": name })
}

pub fn get_att(name: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [name, attribute] })
}

pub fn sub(s: &str) -> Value {
    json!({ "Fn::Sub": s })
}

pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

pub fn if_(condition: &str, when_true: Value, when_false: Value) -> Value {
    json!({ "Fn::If": [condition, when_true, when_false] })
}

/// property value that removes the property entirely
/// when used as a branch of Fn::If
pub fn no_value() -> Value {
    get_ref(pseudo::NO_VALUE)
}

pub fn only_if(condition: &str, value: Value) -> Value {
    if_(condition, value, no_value())
}

pub fn equals(a: Value, b: Value) -> Value {
    json!({ "Fn::Equals": [a, b] })
}

pub fn not(condition: Value) -> Value {
    json!({ "Fn::Not": [condition] })
}

pub fn or(conditions: Vec<Value>) -> Value {
    json!({ "Fn::Or": conditions })
}

pub fn and(conditions: Vec<Value>) -> Value {
    json!({ "Fn::And": conditions })
}

pub fn condition(name: &str) -> Value {
    json!({ "Condition": name })
}

pub fn find_in_map(map: &str, top_key: &str, second_key: &str) -> Value {
    json!({ "Fn::FindInMap": [map, top_key, second_key] })
}
