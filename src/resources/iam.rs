use serde_json::{json, Map, Value};

use super::*;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub effect: String,
    pub actions: Vec<String>,
    pub resources: Vec<Value>,
    pub conditions: Option<Value>,
}

impl PolicyStatement {
    /// only Denys should be explicit, so statements default to Allow
    pub fn allow<S: AsRef<str>>(actions: &[S], resources: Vec<Value>) -> Self {
        Self {
            effect: "Allow".into(),
            actions: actions.iter().map(|a| a.as_ref().to_string()).collect(),
            resources,
            conditions: None,
        }
    }

    pub fn with_conditions(mut self, conditions: Value) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("Effect".into(), Value::String(self.effect.clone()));
        map.insert("Action".into(), one_or_many(self.actions.iter().map(|a| Value::String(a.clone())).collect()));
        map.insert("Resource".into(), one_or_many(self.resources.clone()));
        if let Some(conditions) = &self.conditions {
            map.insert("Condition".into(), conditions.clone());
        }
        Value::Object(map)
    }
}

fn one_or_many(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

pub fn policy_document(statements: &[PolicyStatement]) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": statements.iter().map(|s| s.to_json()).collect::<Vec<_>>()
    })
}

pub fn create_assume_role_policy_doc(service: &str) -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [
            {
                "Effect": "Allow",
                "Principal": { "Service": service },
                "Action": "sts:AssumeRole"
            }
        ]
    })
}

#[derive(Default)]
pub struct ServiceRole {
    pub logical_id: String,
    /// the only principal allowed to assume this role, eg: medialive.amazonaws.com
    pub service: String,
    pub managed_policy_arns: Vec<Value>,
    /// inline policy, named `{logical_id}Policy`. Left out when empty
    pub inline_statements: Vec<PolicyStatement>,
}

pub fn add_role_resource(builder: &mut StackBuilder, conf: &ServiceRole) -> Result<(), TemplateError> {
    let mut properties = json!({
        "AssumeRolePolicyDocument": create_assume_role_policy_doc(&conf.service)
    });
    if !conf.managed_policy_arns.is_empty() {
        properties["ManagedPolicyArns"] = Value::Array(conf.managed_policy_arns.clone());
    }
    if !conf.inline_statements.is_empty() {
        properties["Policies"] = json!([{
            "PolicyName": format!("{}Policy", conf.logical_id),
            "PolicyDocument": policy_document(&conf.inline_statements)
        }]);
    }
    builder.add_resource(&conf.logical_id, Resource::new("AWS::IAM::Role", properties))
}

/// a standalone policy attached to the given roles
pub fn add_policy_resource(
    builder: &mut StackBuilder,
    logical_id: &str,
    role_logical_ids: &[&str],
    statements: &[PolicyStatement],
) -> Result<(), TemplateError> {
    let roles: Vec<Value> = role_logical_ids.iter().map(|r| get_ref(r)).collect();
    let properties = json!({
        "PolicyName": logical_id,
        "Roles": roles,
        "PolicyDocument": policy_document(statements)
    });
    builder.add_resource(logical_id, Resource::new("AWS::IAM::Policy", properties))
}
