use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::*;

pub const BASIC_EXECUTION_POLICY: &str = "service-role/AWSLambdaBasicExecutionRole";

/// ARN of an AWS managed policy in the stack's partition
pub fn managed_policy_arn(name: &str) -> Value {
    sub(&format!("arn:${{AWS::Partition}}:iam::aws:policy/{name}"))
}

pub struct LambdaFunction {
    pub logical_id: String,
    pub description: String,
    pub runtime: String,
    pub handler: String,
    pub code_bucket: String,
    pub code_key: String,
    pub memory: u32,
    pub timeout: u32,
    pub environment_variables: BTreeMap<String, String>,
    pub policy_statements: Vec<PolicyStatement>,
    pub metadata: Option<Value>,
}

impl Default for LambdaFunction {
    fn default() -> Self {
        Self {
            logical_id: "Function".into(),
            description: Default::default(),
            runtime: "nodejs18.x".into(),
            handler: "index.handler".into(),
            code_bucket: Default::default(),
            code_key: Default::default(),
            memory: 128,
            timeout: 30,
            environment_variables: Default::default(),
            policy_statements: Default::default(),
            metadata: None,
        }
    }
}

impl LambdaFunction {
    pub fn role_logical_id(&self) -> String {
        format!("{}Role", self.logical_id)
    }
}

/// adds the function and an execution role for it. The role always has basic
/// execution (cloudwatch logs) permissions, plus the function's policy statements.
/// Returns the logical id of the role.
pub fn add_lambda_resource(builder: &mut StackBuilder, conf: &LambdaFunction) -> Result<String, TemplateError> {
    let role_logical_id = conf.role_logical_id();
    add_role_resource(builder, &ServiceRole {
        logical_id: role_logical_id.clone(),
        service: "lambda.amazonaws.com".into(),
        managed_policy_arns: vec![managed_policy_arn(BASIC_EXECUTION_POLICY)],
        inline_statements: conf.policy_statements.clone(),
    })?;

    let mut properties = json!({
        "Runtime": conf.runtime,
        "Handler": conf.handler,
        "Code": {
            "S3Bucket": conf.code_bucket,
            "S3Key": conf.code_key
        },
        "MemorySize": conf.memory,
        "Timeout": conf.timeout,
        "Role": get_att(&role_logical_id, "Arn")
    });
    if !conf.description.is_empty() {
        properties["Description"] = Value::String(conf.description.clone());
    }
    if !conf.environment_variables.is_empty() {
        properties["Environment"] = json!({ "Variables": conf.environment_variables });
    }
    let mut function = Resource::new("AWS::Lambda::Function", properties)
        .depends_on(&[&role_logical_id]);
    if let Some(metadata) = &conf.metadata {
        function = function.with_metadata(metadata.clone());
    }
    builder.add_resource(&conf.logical_id, function)?;
    Ok(role_logical_id)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn function_gets_its_own_role() {
        let mut builder = StackBuilder::new("");
        let mut env = BTreeMap::new();
        env.insert("SOLUTION_IDENTIFIER".to_string(), "AwsSolution/SO0109/v1".to_string());
        let conf = LambdaFunction {
            logical_id: "Handler".into(),
            code_bucket: "artifacts".into(),
            code_key: "handler.zip".into(),
            environment_variables: env,
            policy_statements: vec![PolicyStatement::allow(&["ssm:PutParameter"], vec![json!("*")])],
            ..Default::default()
        };
        let role = add_lambda_resource(&mut builder, &conf).unwrap();
        assert_eq!(role, "HandlerRole");
        let template = builder.build();
        let function = &template.resources["Handler"];
        assert_eq!(function.properties["Role"], get_att("HandlerRole", "Arn"));
        assert_eq!(function.properties["Code"]["S3Key"], "handler.zip");
        assert_eq!(function.properties["Environment"]["Variables"]["SOLUTION_IDENTIFIER"], "AwsSolution/SO0109/v1");
        assert_eq!(function.depends_on, vec!["HandlerRole"]);

        let role = &template.resources["HandlerRole"];
        assert_eq!(
            role.properties["ManagedPolicyArns"][0],
            json!({ "Fn::Sub": "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole" })
        );
        assert_eq!(role.properties["Policies"][0]["PolicyDocument"]["Statement"][0]["Action"], "ssm:PutParameter");
    }
}
