use std::{path::PathBuf, process::exit};

use clap::{Parser, Subcommand};
use live_streaming::{
    config::{CompilerConfig, DEFAULT_CONFIG_FILE},
    engine::{DeployReport, MemoryMetricsSink},
    logger::init_logger,
    parameters::{ParameterValues, PULL_PASS},
    variables::load_parameter_file,
};

#[derive(Parser)]
#[command(
    name = "live-streaming",
    about = "Compiles the live streaming stack into a CloudFormation template",
    version
)]
struct Cli {
    /// Compiler configuration file
    #[arg(long, global = true, env = "LIVE_STREAMING_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write template.json and deploy.sh
    Synth {
        /// Parameter overrides, one Key=Value per line
        #[arg(long)]
        params: Option<PathBuf>,
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
    },
    /// Deploy the template against the simulated handler and print what it dispatched
    DryRun {
        #[arg(long)]
        params: Option<PathBuf>,
        /// Run an update with the same parameters after the create
        #[arg(long)]
        update: bool,
        /// Delete the stack at the end
        #[arg(long)]
        delete: bool,
        /// Send anonymous metrics to the configured endpoint instead of keeping them in memory
        #[arg(long)]
        http_metrics: bool,
    },
    /// Check parameter values and print warnings
    Validate {
        #[arg(long)]
        params: Option<PathBuf>,
    },
}

fn load_params(path: &Option<PathBuf>) -> Result<ParameterValues, String> {
    match path {
        Some(p) => load_parameter_file(p).map_err(|e| e.to_string()),
        None => Ok(ParameterValues::new()),
    }
}

fn print_report(title: &str, report: &DeployReport) {
    println!("{title}:");
    for event in &report.events {
        let status = serde_json::to_value(event.resource_status)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();
        println!("  {:<48} {:<24} {}", event.logical_resource_id, status, event.physical_resource_id);
    }
    for request in &report.dispatched {
        let mut properties = request.resource_properties.clone();
        if let Some(pass) = properties.get_mut(PULL_PASS) {
            *pass = serde_json::Value::String("****".into());
        }
        let properties = serde_json::Value::Object(properties);
        println!("  -> {:?} {} {}", request.request_type, request.logical_resource_id, properties);
    }
    for (name, value) in &report.outputs {
        println!("  {name} = {value}");
    }
}

fn run(cli: Cli, conf: CompilerConfig) -> Result<(), String> {
    match cli.command {
        Commands::Synth { params, out_dir } => {
            let values = load_params(&params)?;
            live_streaming::validate_parameters(&values).map_err(|e| e.to_string())?;
            let template = live_streaming::synthesize(&conf).map_err(|e| e.to_string())?;
            let (template_path, script_path) =
                live_streaming::deploy_script::output_deployment_files(&out_dir, &template, &conf, &values)
                    .map_err(|e| e.to_string())?;
            println!("{}", template_path.display());
            println!("{}", script_path.display());
        }
        Commands::DryRun { params, update, delete, http_metrics } => {
            let values = load_params(&params)?;
            live_streaming::validate_parameters(&values).map_err(|e| e.to_string())?;
            let template = live_streaming::synthesize(&conf).map_err(|e| e.to_string())?;
            let sink = MemoryMetricsSink::default();
            let mut deployment = if http_metrics {
                live_streaming::dry_run_with_http_metrics(&conf)
            } else {
                live_streaming::dry_run_deployment(&conf, Box::new(sink.clone()))
            };
            println!("stack {}", deployment.pseudo().stack_id);
            let report = deployment.create(&template, &values).map_err(|e| e.to_string())?;
            print_report("create", &report);
            if update {
                let report = deployment.update(&template, &values).map_err(|e| e.to_string())?;
                print_report("update", &report);
            }
            if delete {
                let report = deployment.delete().map_err(|e| e.to_string())?;
                print_report("delete", &report);
            }
            if !http_metrics {
                println!("anonymous metrics recorded: {}", sink.records().len());
            }
        }
        Commands::Validate { params } => {
            let values = load_params(&params)?;
            let (params, warnings) = live_streaming::validate_parameters(&values).map_err(|e| e.to_string())?;
            for (name, value) in params.to_values() {
                let value = if name == PULL_PASS && !value.is_empty() { "****".to_string() } else { value };
                println!("{name} = {value}");
            }
            if warnings.is_empty() {
                println!("no warnings");
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let conf = match CompilerConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            exit(1);
        }
    };
    init_logger(&conf.logger);
    if let Err(e) = run(cli, conf) {
        tracing::error!("{e}");
        exit(1);
    }
}
