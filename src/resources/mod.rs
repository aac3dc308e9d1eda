use std::collections::BTreeMap;

use serde_json::Value;

pub use crate::template::*;
use crate::error::TemplateError;

mod s3_bucket;
pub use s3_bucket::*;
mod cloudfront;
pub use cloudfront::*;
mod iam;
pub use iam::*;
mod lambda;
pub use lambda::*;
mod custom_resource;
pub use custom_resource::*;

// higher level resources:
mod live_streaming;
pub use live_streaming::*;

/// collects everything that ends up in the template. Each `add_*` function
/// of this module pushes its resources here and returns the logical ids
/// that other resources need to reference.
#[derive(Debug, Default)]
pub struct StackBuilder {
    template: Template,
}

impl StackBuilder {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            template: Template::new(description),
        }
    }

    pub fn add_resource<S: AsRef<str>>(&mut self, logical_id: S, resource: Resource) -> Result<(), TemplateError> {
        let logical_id = logical_id.as_ref();
        if self.template.resources.contains_key(logical_id) {
            return Err(TemplateError::DuplicateLogicalId(logical_id.to_string()));
        }
        tracing::debug!(logical_id, ty = %resource.ty, "adding resource");
        self.template.resources.insert(logical_id.to_string(), resource);
        Ok(())
    }

    pub fn add_parameters(&mut self, parameters: BTreeMap<String, Parameter>) {
        self.template.parameters.extend(parameters);
    }

    pub fn add_condition<S: AsRef<str>>(&mut self, name: S, condition: Value) {
        self.template.conditions.insert(name.as_ref().to_string(), condition);
    }

    pub fn add_mapping<S: AsRef<str>>(&mut self, name: S, mapping: Value) {
        self.template.mappings.insert(name.as_ref().to_string(), mapping);
    }

    pub fn add_output<S: AsRef<str>>(&mut self, name: S, output: Output) -> Result<(), TemplateError> {
        let name = name.as_ref();
        if self.template.outputs.contains_key(name) {
            return Err(TemplateError::DuplicateLogicalId(name.to_string()));
        }
        self.template.outputs.insert(name.to_string(), output);
        Ok(())
    }

    pub fn set_metadata(&mut self, metadata: Value) {
        self.template.metadata = Some(metadata);
    }

    pub fn build(self) -> Template {
        self.template
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duplicate_logical_ids_are_rejected() {
        let mut builder = StackBuilder::new("x");
        builder.add_resource("Bucket", Resource::new("AWS::S3::Bucket", Value::Null)).unwrap();
        let err = builder.add_resource("Bucket", Resource::new("AWS::S3::Bucket", Value::Null)).unwrap_err();
        assert!(matches!(err, TemplateError::DuplicateLogicalId(id) if id == "Bucket"));
    }
}
