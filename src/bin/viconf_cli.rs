//! Viconf CLI - JSON bridge to the configuration engine
//!
//! Commands: tags, validators, validate, template-schema, service-schema,
//! fieldset, compile
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when input is rejected

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use viconf_core::{classify, CompilationPipeline, FieldSet, ValidatorRegistry};

#[derive(Parser)]
#[command(name = "viconf-cli")]
#[command(about = "Viconf CLI - Device Configuration Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the catalog JSON document
    #[arg(short, long, env = "VICONF_CATALOG", default_value = "catalog.json")]
    catalog: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the tags of a template body
    Tags {
        /// Template file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List available validators
    Validators,

    /// Test a value against a validator
    Validate {
        /// Validator name
        #[arg(short = 'V', long)]
        validator: String,

        /// Value (parsed as JSON, otherwise taken as a string)
        #[arg(short = 'x', long)]
        value: String,
    },

    /// Field schema of a template
    TemplateSchema {
        /// Template ID
        #[arg(short, long)]
        template: u64,
    },

    /// Order input schema of a service
    ServiceSchema {
        /// Service ID
        #[arg(short, long)]
        service: u64,
    },

    /// Read or update the field set of a template
    Fieldset {
        /// Template ID
        #[arg(short, long)]
        template: u64,

        /// JSON payload (FieldSet)
        #[arg(short, long)]
        update: Option<String>,

        /// Save the catalog after a successful update
        #[arg(short, long)]
        write: bool,
    },

    /// Compile the configuration of an order
    Compile {
        /// Order ID
        #[arg(short, long)]
        order: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let validators = Arc::new(ValidatorRegistry::new());

    match cli.command {
        Commands::Tags { file } => match fs::read_to_string(&file) {
            Ok(body) => print_json(&classify(&body)),
            Err(e) => fail(format!("Failed to read {}: {}", file.display(), e), ExitCode::FAILURE),
        },

        Commands::Validators => print_json(&validators.list()),

        Commands::Validate { validator, value } => {
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            match validators.test(&validator, value) {
                Ok(value) => print_json(&serde_json::json!({"valid": true, "value": value})),
                Err(e) => {
                    println!("{}", serde_json::json!({"valid": false, "error": e.to_string()}));
                    ExitCode::from(2)
                }
            }
        }

        Commands::TemplateSchema { template } => {
            let pipeline = match load(&cli.catalog, validators) {
                Ok(p) => p,
                Err(code) => return code,
            };
            match pipeline.template_schema(template) {
                Ok(schema) => print_json(&schema),
                Err(e) => fail(e.to_string(), ExitCode::FAILURE),
            }
        }

        Commands::ServiceSchema { service } => {
            let pipeline = match load(&cli.catalog, validators) {
                Ok(p) => p,
                Err(code) => return code,
            };
            match pipeline.service_schema(service) {
                Ok(schema) => print_json(&schema),
                Err(e) => fail(e.to_string(), ExitCode::FAILURE),
            }
        }

        Commands::Fieldset { template, update, write } => {
            let mut pipeline = match load(&cli.catalog, validators) {
                Ok(p) => p,
                Err(code) => return code,
            };

            let Some(payload) = update else {
                return match pipeline.fieldset(template) {
                    Ok(fieldset) => print_json(&fieldset),
                    Err(e) => fail(e.to_string(), ExitCode::FAILURE),
                };
            };

            let fieldset: FieldSet = match serde_json::from_str(&payload) {
                Ok(f) => f,
                Err(e) => return fail(format!("Invalid payload: {}", e), ExitCode::FAILURE),
            };

            let updated = match pipeline.update_fieldset(template, &fieldset) {
                Ok(updated) => updated,
                Err(e) => return fail(e.to_string(), ExitCode::from(2)),
            };

            if write {
                if let Err(e) = pipeline.catalog().save_to_file(&cli.catalog) {
                    return fail(e.to_string(), ExitCode::FAILURE);
                }
            }
            print_json(&updated)
        }

        Commands::Compile { order } => {
            let pipeline = match load(&cli.catalog, validators) {
                Ok(p) => p,
                Err(code) => return code,
            };

            match pipeline.compile_manifest(order) {
                Ok(manifest) => print_json(&serde_json::json!({
                    "success": true,
                    "manifest": manifest,
                })),
                Err(e) => {
                    let output = serde_json::json!({
                        "success": false,
                        "error": e.to_string(),
                    });
                    println!("{}", output);
                    ExitCode::from(2)  // Compilation failure (validation)
                }
            }
        }
    }
}

fn load(path: &Path, validators: Arc<ValidatorRegistry>) -> Result<CompilationPipeline, ExitCode> {
    CompilationPipeline::load(path, validators)
        .map_err(|e| fail(format!("Failed to load catalog: {}", e), ExitCode::FAILURE))
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => fail(e.to_string(), ExitCode::FAILURE),
    }
}

fn fail(message: String, code: ExitCode) -> ExitCode {
    println!("{}", serde_json::json!({"error": message}));
    code
}
