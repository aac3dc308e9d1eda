//! A dry run deployment engine. It walks a template the way CloudFormation
//! would: resources in dependency order, native resources synthesized locally,
//! custom resources dispatched to a handler with the real request format.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::{
    config::CompilerConfig,
    contract::{props, CustomResourceRequest, RequestType},
    error::DeployError,
    parameters::{apply_declarations, ParameterValues},
    resolve::{DependencyGraph, Provisioned, PseudoParameters, ResourceState, Resolver},
    template::{is_custom_type, Template},
};

mod handler;
pub use handler::*;
mod metrics;
pub use metrics::*;
pub mod native;
mod simulated;
pub use simulated::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    CreateComplete,
    CreateFailed,
    UpdateComplete,
    UpdateFailed,
    /// resolved properties were identical, nothing was dispatched
    NoChange,
    DeleteComplete,
    DeleteFailed,
    /// DeletionPolicy Retain
    DeleteSkipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackEvent {
    pub logical_resource_id: String,
    pub resource_type: String,
    pub physical_resource_id: String,
    pub resource_status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_status_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployedResource {
    pub ty: String,
    /// properties after every intrinsic was resolved
    pub properties: Value,
    pub state: ResourceState,
    pub retain: bool,
}

impl DeployedResource {
    pub fn is_custom(&self) -> bool {
        is_custom_type(&self.ty)
    }
}

#[derive(Debug, Clone)]
pub struct DeployedStack {
    pub template: Template,
    pub parameters: ParameterValues,
    pub resources: BTreeMap<String, DeployedResource>,
    /// the order resources were provisioned in. Deletes walk it backwards.
    pub order: Vec<String>,
    pub outputs: BTreeMap<String, String>,
}

/// everything one create, update or delete did
#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    pub events: Vec<StackEvent>,
    pub dispatched: Vec<CustomResourceRequest>,
    pub outputs: BTreeMap<String, String>,
}

impl DeployReport {
    pub fn dispatched_to<'a>(&'a self, action: &'a str) -> impl Iterator<Item = &'a CustomResourceRequest> + 'a {
        self.dispatched.iter().filter(move |r| r.logical_resource_id == action)
    }

    pub fn status_of(&self, logical_id: &str) -> Option<ResourceStatus> {
        self.events
            .iter()
            .rev()
            .find(|e| e.logical_resource_id == logical_id)
            .map(|e| e.resource_status)
    }

    fn event(&mut self, logical_id: &str, resource: &DeployedResource, status: ResourceStatus) {
        self.events.push(StackEvent {
            logical_resource_id: logical_id.to_string(),
            resource_type: resource.ty.clone(),
            physical_resource_id: resource.state.physical_id.clone(),
            resource_status: status,
            resource_status_reason: None,
        });
    }
}

/// what a create or update got through before it finished or failed
#[derive(Default)]
struct Progress {
    resources: BTreeMap<String, DeployedResource>,
    /// logical ids in the order they were provisioned
    done: Vec<String>,
    /// custom resources whose handler returned a new physical id on update.
    /// The old ones are deleted once the update succeeds.
    replaced: Vec<(String, DeployedResource)>,
    report: DeployReport,
}

pub struct Deployment<H> {
    pseudo: PseudoParameters,
    handler: H,
    stack: Option<DeployedStack>,
}

impl<H: CustomResourceHandler> Deployment<H> {
    pub fn new(pseudo: PseudoParameters, handler: H) -> Self {
        Self {
            pseudo,
            handler,
            stack: None,
        }
    }

    pub fn from_config(conf: &CompilerConfig, handler: H) -> Self {
        Self::new(PseudoParameters::new(&conf.account_id, &conf.region, &conf.stack_name), handler)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn pseudo(&self) -> &PseudoParameters {
        &self.pseudo
    }

    pub fn stack(&self) -> Option<&DeployedStack> {
        self.stack.as_ref()
    }

    pub fn create(&mut self, template: &Template, values: &ParameterValues) -> Result<DeployReport, DeployError> {
        if self.stack.is_some() {
            return Err(DeployError::StackExists(self.pseudo.stack_name.clone()));
        }
        tracing::info!(stack = %self.pseudo.stack_name, "creating stack");
        let parameters = apply_declarations(&template.parameters, values)?;
        let order = DependencyGraph::from_template(template)?.topological_order()?;

        let mut progress = Progress::default();
        match self.provision(template, &parameters, &order, &BTreeMap::new(), &mut progress) {
            Ok(outputs) => {
                tracing::info!(stack = %self.pseudo.stack_name, resources = order.len(), "stack created");
                progress.report.outputs = outputs.clone();
                self.stack = Some(DeployedStack {
                    template: template.clone(),
                    parameters,
                    resources: progress.resources,
                    order,
                    outputs,
                });
                Ok(progress.report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "stack creation failed, rolling back");
                for id in progress.done.iter().rev() {
                    if let Some(resource) = progress.resources.get(id) {
                        if let Err(e) = self.remove(id, resource, &mut progress.report) {
                            tracing::warn!(logical_id = %id, error = %e, "rollback could not delete resource");
                        }
                    }
                }
                Err(e)
            }
        }
    }

    pub fn update(&mut self, template: &Template, values: &ParameterValues) -> Result<DeployReport, DeployError> {
        let previous = self
            .stack
            .clone()
            .ok_or_else(|| DeployError::NoStack(self.pseudo.stack_name.clone()))?;
        tracing::info!(stack = %self.pseudo.stack_name, "updating stack");
        let parameters = apply_declarations(&template.parameters, values)?;
        let order = DependencyGraph::from_template(template)?.topological_order()?;

        let mut progress = Progress::default();
        match self.provision(template, &parameters, &order, &previous.resources, &mut progress) {
            Ok(outputs) => {
                // cleanup: resources that are gone from the template, then replaced ones
                for id in previous.order.iter().rev() {
                    if template.resources.contains_key(id) {
                        continue;
                    }
                    if let Some(resource) = previous.resources.get(id) {
                        if let Err(e) = self.remove(id, resource, &mut progress.report) {
                            tracing::warn!(logical_id = %id, error = %e, "cleanup could not delete resource");
                        }
                    }
                }
                // newest first, so a replaced resource goes before what it was attached to
                for (id, resource) in std::mem::take(&mut progress.replaced).into_iter().rev() {
                    if let Err(e) = self.remove(&id, &resource, &mut progress.report) {
                        tracing::warn!(logical_id = %id, error = %e, "cleanup could not delete replaced resource");
                    }
                }
                tracing::info!(stack = %self.pseudo.stack_name, "stack updated");
                progress.report.outputs = outputs.clone();
                self.stack = Some(DeployedStack {
                    template: template.clone(),
                    parameters,
                    resources: progress.resources,
                    order,
                    outputs,
                });
                Ok(progress.report)
            }
            Err(e) => {
                tracing::warn!(error = %e, "stack update failed, rolling back");
                self.rollback_update(&previous, &mut progress);
                Err(e)
            }
        }
    }

    pub fn delete(&mut self) -> Result<DeployReport, DeployError> {
        let mut stack = self
            .stack
            .take()
            .ok_or_else(|| DeployError::NoStack(self.pseudo.stack_name.clone()))?;
        tracing::info!(stack = %self.pseudo.stack_name, "deleting stack");
        let mut report = DeployReport::default();
        for id in stack.order.clone().iter().rev() {
            let resource = match stack.resources.get(id) {
                Some(r) => r.clone(),
                None => continue,
            };
            if let Err(e) = self.remove(id, &resource, &mut report) {
                // what could not be deleted stays part of the stack
                self.stack = Some(stack);
                return Err(e);
            }
            stack.resources.remove(id);
        }
        tracing::info!(stack = %self.pseudo.stack_name, "stack deleted");
        Ok(report)
    }

    /// provisions every resource of `order`. A resource that was part of
    /// `previous` is updated, or left alone if its resolved properties did not change.
    fn provision(
        &mut self,
        template: &Template,
        parameters: &ParameterValues,
        order: &[String],
        previous: &BTreeMap<String, DeployedResource>,
        progress: &mut Progress,
    ) -> Result<BTreeMap<String, String>, DeployError> {
        let pseudo = self.pseudo.clone();
        let resolver = Resolver::new(template, parameters, &pseudo)?;
        let mut provisioned = Provisioned::new();
        for id in order {
            let resource = template
                .resources
                .get(id)
                .ok_or_else(|| crate::error::ResolveError::UnknownReference(id.clone()))?;
            let properties = resolver.resolve(&resource.properties, &provisioned)?.unwrap_or(Value::Null);
            let retain = resource.deletion_policy.as_deref() == Some("Retain");
            let custom = is_custom_type(&resource.ty);
            tracing::debug!(logical_id = %id, ty = %resource.ty, "provisioning resource");

            let (state, status) = match previous.get(id).filter(|p| p.ty == resource.ty) {
                Some(old) if old.properties == properties => (old.state.clone(), ResourceStatus::NoChange),
                Some(old) if custom => {
                    let state = self.dispatch(
                        RequestType::Update,
                        id,
                        &resource.ty,
                        &properties,
                        Some(&old.state.physical_id),
                        Some(&old.properties),
                        &mut progress.report,
                    )?;
                    if state.physical_id != old.state.physical_id {
                        progress.replaced.push((id.clone(), old.clone()));
                    }
                    (state, ResourceStatus::UpdateComplete)
                }
                // native resources are updated in place
                Some(old) => (old.state.clone(), ResourceStatus::UpdateComplete),
                None if custom => {
                    let state = self.dispatch(
                        RequestType::Create,
                        id,
                        &resource.ty,
                        &properties,
                        None,
                        None,
                        &mut progress.report,
                    )?;
                    (state, ResourceStatus::CreateComplete)
                }
                None => (native::synthesize(&resource.ty, id, &properties, &pseudo), ResourceStatus::CreateComplete),
            };

            let deployed = DeployedResource {
                ty: resource.ty.clone(),
                properties,
                state,
                retain,
            };
            progress.report.event(id, &deployed, status);
            provisioned.insert(id.clone(), deployed.state.clone());
            progress.resources.insert(id.clone(), deployed);
            progress.done.push(id.clone());
        }

        let mut outputs = BTreeMap::new();
        for (name, output) in &template.outputs {
            if let Some(value) = resolver.resolve(&output.value, &provisioned)? {
                let text = match value {
                    Value::String(s) => s,
                    x => x.to_string(),
                };
                outputs.insert(name.clone(), text);
            }
        }
        Ok(outputs)
    }

    /// undoes a failed update and puts the previous stack back. Created and
    /// replacement resources are deleted, custom resources updated in place get
    /// an update back to their previous properties.
    fn rollback_update(&mut self, previous: &DeployedStack, progress: &mut Progress) {
        let mut restored = previous.clone();
        for id in progress.done.clone().iter().rev() {
            let current = match progress.resources.get(id) {
                Some(r) => r.clone(),
                None => continue,
            };
            let result = match previous.resources.get(id) {
                None => self.remove(id, &current, &mut progress.report),
                // the previous resource was left untouched by the replacement
                Some(old) if current.is_custom() && current.state.physical_id != old.state.physical_id => {
                    self.remove(id, &current, &mut progress.report)
                }
                Some(old) if current.is_custom() && old.properties != current.properties => {
                    match self.dispatch(
                        RequestType::Update,
                        id,
                        &current.ty,
                        &old.properties,
                        Some(&current.state.physical_id),
                        Some(&current.properties),
                        &mut progress.report,
                    ) {
                        Ok(state) => {
                            let replaced = state.physical_id != current.state.physical_id;
                            if let Some(r) = restored.resources.get_mut(id) {
                                r.state = state;
                            }
                            if replaced {
                                self.remove(id, &current, &mut progress.report)
                            } else {
                                Ok(())
                            }
                        }
                        Err(e) => Err(e),
                    }
                }
                Some(_) => Ok(()),
            };
            if let Err(e) = result {
                tracing::warn!(logical_id = %id, error = %e, "rollback could not restore resource");
            }
        }
        self.stack = Some(restored);
    }

    fn remove(&mut self, logical_id: &str, resource: &DeployedResource, report: &mut DeployReport) -> Result<(), DeployError> {
        if resource.retain {
            tracing::info!(logical_id, physical_id = %resource.state.physical_id, "retaining resource");
            report.event(logical_id, resource, ResourceStatus::DeleteSkipped);
            return Ok(());
        }
        if resource.is_custom() {
            self.dispatch(
                RequestType::Delete,
                logical_id,
                &resource.ty,
                &resource.properties,
                Some(&resource.state.physical_id),
                None,
                report,
            )?;
        }
        report.event(logical_id, resource, ResourceStatus::DeleteComplete);
        Ok(())
    }

    fn request(
        &self,
        request_type: RequestType,
        logical_id: &str,
        ty: &str,
        properties: &Value,
        physical_id: Option<&str>,
        old_properties: Option<&Value>,
    ) -> CustomResourceRequest {
        let resource_properties = properties.as_object().cloned().unwrap_or_default();
        let service_token = resource_properties
            .get(props::SERVICE_TOKEN)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        CustomResourceRequest {
            request_type,
            service_token,
            response_url: format!(
                "https://cloudformation-custom-resource-response-{}.s3.{}/{}",
                self.pseudo.region,
                self.pseudo.url_suffix,
                uuid::Uuid::new_v4()
            ),
            stack_id: self.pseudo.stack_id.clone(),
            request_id: uuid::Uuid::new_v4().to_string(),
            resource_type: ty.to_string(),
            logical_resource_id: logical_id.to_string(),
            physical_resource_id: physical_id.map(|s| s.to_string()),
            resource_properties,
            old_resource_properties: old_properties.and_then(|v| v.as_object().cloned()),
        }
    }

    /// sends one request to the handler. A FAILED response is recorded
    /// as a failed event and returned as an error naming the resource.
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &mut self,
        request_type: RequestType,
        logical_id: &str,
        ty: &str,
        properties: &Value,
        physical_id: Option<&str>,
        old_properties: Option<&Value>,
        report: &mut DeployReport,
    ) -> Result<ResourceState, DeployError> {
        let request = self.request(request_type, logical_id, ty, properties, physical_id, old_properties);
        let response = if request.service_token.is_empty() {
            crate::contract::CustomResourceResponse::failed(&request, format!("{} is required", props::SERVICE_TOKEN))
        } else {
            self.handler.handle(&request)
        };
        report.dispatched.push(request);
        if !response.is_success() {
            let status = match request_type {
                RequestType::Create => ResourceStatus::CreateFailed,
                RequestType::Update => ResourceStatus::UpdateFailed,
                RequestType::Delete => ResourceStatus::DeleteFailed,
            };
            let reason = response.reason.unwrap_or_else(|| "handler reported a failure".to_string());
            report.events.push(StackEvent {
                logical_resource_id: logical_id.to_string(),
                resource_type: ty.to_string(),
                physical_resource_id: response.physical_resource_id,
                resource_status: status,
                resource_status_reason: Some(reason.clone()),
            });
            return Err(DeployError::ResourceFailed {
                logical_id: logical_id.to_string(),
                reason,
            });
        }
        tracing::debug!(logical_id, physical_id = %response.physical_resource_id, "custom resource succeeded");
        Ok(ResourceState {
            physical_id: response.physical_resource_id,
            attributes: response.data,
        })
    }
}
