//! Compiles the live streaming stack (a MediaLive input and channel writing
//! to an S3 origin behind CloudFront) into a CloudFormation template, and
//! dry runs that template offline against a simulated custom resource handler.

pub mod config;
pub mod contract;
pub mod deploy_script;
pub mod engine;
pub mod error;
pub mod logger;
pub mod parameters;
pub mod resolve;
pub mod resources;
pub mod template;
pub mod variables;

use config::CompilerConfig;
use engine::{Deployment, HttpMetricsSink, MetricsSink, SimulatedHandler};
use error::{ParameterError, TemplateError};
use parameters::{ParameterValues, StackParameters};
use resources::LiveStreamingStack;
use template::Template;

pub fn synthesize(conf: &CompilerConfig) -> Result<Template, TemplateError> {
    LiveStreamingStack::new(conf).compose()
}

/// parses the raw values and logs every cross field warning.
/// Only unknown names and values outside an enumeration are errors.
pub fn validate_parameters(values: &ParameterValues) -> Result<(StackParameters, Vec<String>), ParameterError> {
    let params = StackParameters::from_values(values)?;
    let warnings = params.lint();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    Ok((params, warnings))
}

/// a deployment of the configured stack against the simulated handler
pub fn dry_run_deployment(conf: &CompilerConfig, metrics: Box<dyn MetricsSink>) -> Deployment<SimulatedHandler> {
    Deployment::from_config(conf, SimulatedHandler::new(&conf.solution_id, metrics))
}

/// like `dry_run_deployment`, reporting metrics to the configured endpoint
pub fn dry_run_with_http_metrics(conf: &CompilerConfig) -> Deployment<SimulatedHandler> {
    dry_run_deployment(conf, Box::new(HttpMetricsSink::new(&conf.metrics)))
}
