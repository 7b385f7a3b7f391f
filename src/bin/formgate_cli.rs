//! FormGate CLI - Drive form declarations from the shell
//!
//! Commands: forms, normalize, validate, submit
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on validation or submission failure

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use formgate::{
    form::FormRegistry,
    normalize::normalize_numeric,
    DispatchOutcome, FieldKind, FileDescriptor, FormEvent, FormSession, HttpSubmitter, RawInput,
};

#[derive(Parser)]
#[command(name = "formgate-cli")]
#[command(about = "FormGate CLI - Form normalization, validation and submission")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to form declarations directory
    #[arg(short, long, default_value = "forms")]
    forms_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// List available forms
    Forms,

    /// Normalize a single numeric or currency value
    Normalize {
        /// Field kind (numeric or currency)
        #[arg(short, long)]
        kind: FieldKind,

        /// Raw input text
        #[arg(short, long, allow_hyphen_values = true)]
        value: String,

        #[arg(long)]
        max_length: Option<usize>,

        #[arg(long)]
        precision: Option<usize>,
    },

    /// Validate field values against a form
    Validate {
        /// Form ID
        #[arg(short = 'F', long)]
        form: String,

        /// JSON object of field name to raw value
        #[arg(short, long)]
        values: String,
    },

    /// Validate and submit field values to the form's endpoint
    Submit {
        /// Form ID
        #[arg(short = 'F', long)]
        form: String,

        /// JSON object of field name to raw value; file fields take a path
        #[arg(short, long)]
        values: String,

        /// Override the declared endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "formgate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let forms_dir = cli.forms_dir;

    match cli.command {
        Commands::Normalize { kind, value, max_length, precision } => {
            normalize_command(kind, &value, max_length, precision)
        }

        Commands::Forms => {
            let Some(registry) = load_registry(&forms_dir) else {
                return ExitCode::FAILURE;
            };
            let forms: Vec<_> = registry.list()
                .iter()
                .map(|f| json!({
                    "id": f.id,
                    "name": f.name,
                    "version": f.form_version,
                    "endpoint": f.endpoint,
                    "fields": f.fields.iter().map(|d| json!({"name": d.name, "kind": d.kind})).collect::<Vec<_>>(),
                }))
                .collect();
            print_json(&Value::Array(forms));
            ExitCode::SUCCESS
        }

        Commands::Validate { form, values } => {
            let Some(registry) = load_registry(&forms_dir) else {
                return ExitCode::FAILURE;
            };
            let mut session = match registry.session(&form, Arc::new(HttpSubmitter::new())) {
                Ok(s) => s,
                Err(e) => {
                    print_json(&json!({"valid": false, "error": e.to_string()}));
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = apply_values(&mut session, &values) {
                print_json(&json!({"valid": false, "error": e}));
                return ExitCode::FAILURE;
            }

            print_json(&json!(session.validation()));
            if session.is_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)  // Validation failure
            }
        }

        Commands::Submit { form, values, endpoint } => {
            let Some(registry) = load_registry(&forms_dir) else {
                return ExitCode::FAILURE;
            };
            let submitter = Arc::new(HttpSubmitter::new());
            let mut spec = match registry.get(&form) {
                Some(spec) => spec.clone(),
                None => {
                    print_json(&json!({"success": false, "error": format!("Form not found: {}", form)}));
                    return ExitCode::FAILURE;
                }
            };
            if let Some(endpoint) = endpoint {
                spec.endpoint = endpoint;
            }
            let mut session = match FormSession::new(spec, submitter) {
                Ok(s) => s,
                Err(e) => {
                    print_json(&json!({"success": false, "error": e.to_string()}));
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = apply_values(&mut session, &values) {
                print_json(&json!({"success": false, "error": e}));
                return ExitCode::FAILURE;
            }

            match session.dispatch(FormEvent::SubmitRequested) {
                Ok(DispatchOutcome::Submitted(_)) => {}
                Ok(DispatchOutcome::Refused(refusal)) => {
                    print_json(&json!({
                        "success": false,
                        "error": refusal.to_string(),
                        "validation": session.validation(),
                    }));
                    return ExitCode::from(2);
                }
                Ok(other) => {
                    print_json(&json!({"success": false, "error": format!("Unexpected outcome: {:?}", other)}));
                    return ExitCode::FAILURE;
                }
                Err(e) => {
                    print_json(&json!({"success": false, "error": e.to_string()}));
                    return ExitCode::FAILURE;
                }
            }

            match session.settle().await {
                Some(attempt) => {
                    let success = attempt.receipt().is_some();
                    print_json(&json!({"success": success, "attempt": attempt}));
                    if success { ExitCode::SUCCESS } else { ExitCode::from(2) }
                }
                None => {
                    print_json(&json!({"success": false, "error": "Submission was not started"}));
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn load_registry(dir: &Path) -> Option<FormRegistry> {
    match FormRegistry::load_from_dir(dir) {
        Ok(r) => Some(r),
        Err(e) => {
            print_json(&json!({"error": format!("Failed to load forms: {}", e)}));
            None
        }
    }
}

fn normalize_command(
    kind: FieldKind,
    value: &str,
    max_length: Option<usize>,
    precision: Option<usize>,
) -> ExitCode {
    if !kind.is_number() {
        print_json(&json!({"error": format!("normalize supports numeric and currency, not {}", kind)}));
        return ExitCode::FAILURE;
    }
    let decl = formgate::FieldDecl {
        max_length,
        precision,
        ..formgate::FieldDecl::new("value", kind)
    };
    let normalized = normalize_numeric(value, decl.effective_max_length(), decl.effective_precision());
    print_json(&json!({"raw": value, "kind": kind, "normalized": normalized}));
    ExitCode::SUCCESS
}

/// Feeds each value through the session as a change followed by a blur.
fn apply_values(session: &mut FormSession, values: &str) -> Result<(), String> {
    let values: serde_json::Map<String, Value> = serde_json::from_str(values)
        .map_err(|e| format!("Invalid values: {}", e))?;

    for (name, value) in values {
        let kind = session
            .spec()
            .field(&name)
            .map(|d| d.kind)
            .ok_or_else(|| format!("Unknown field: {}", name))?;

        let raw = match (kind, value) {
            (FieldKind::File, Value::String(path)) if !path.is_empty() => {
                RawInput::File(read_file(Path::new(&path))?)
            }
            (_, Value::String(text)) => RawInput::Text(text),
            (_, Value::Number(n)) => RawInput::Text(n.to_string()),
            (_, other) => serde_json::from_value(other)
                .map_err(|e| format!("Invalid value for {}: {}", name, e))?,
        };

        session
            .dispatch(FormEvent::FieldChanged { name: name.clone(), value: raw })
            .map_err(|e| e.to_string())?;
        session
            .dispatch(FormEvent::FieldBlurred { name })
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<FileDescriptor, String> {
    let content = std::fs::read(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(FileDescriptor::new(name, guess_mime(path), content))
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" => "text/plain",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => println!(r#"{{"error": "Failed to encode output: {}"}}"#, e),
    }
}
