//! Stencil CLI - Render and check templates from the shell
//!
//! Commands: templates, check, render
//! Outputs JSON to stdout, logs to stderr (filtered by RUST_LOG)
//! Returns 2 when a template fails to compile or render

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use stencil_core::{
    hashing::{output_digest, render_job_hash},
    CharWidth, Narrow, Settings, Template, TemplateEnv, Value, ValuesMap, Wide, ENGINE_VERSION,
};

#[derive(Parser)]
#[command(name = "stencil-cli")]
#[command(about = "Stencil CLI - Dual-width template engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of templates available to `include`
    #[arg(long, global = true)]
    templates_dir: Option<PathBuf>,

    /// JSON settings file (trimBlocks, lstripBlocks, defaultTemplateName)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List templates found in the templates directory
    Templates,

    /// Compile a template without rendering it
    Check {
        /// Template file
        #[arg(short, long)]
        template: PathBuf,

        /// Compile as wide text
        #[arg(long)]
        wide: bool,
    },

    /// Render a template
    Render {
        /// Template file
        #[arg(short, long)]
        template: PathBuf,

        /// JSON object of render parameters
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Render as wide text
        #[arg(long)]
        wide: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => match Settings::from_json_file(path) {
            Ok(s) => s,
            Err(e) => return fail(format!("Failed to load settings: {e}")),
        },
        None => Settings::default(),
    };

    let env = match &cli.templates_dir {
        Some(dir) => match TemplateEnv::load_from_dir(dir, settings) {
            Ok(env) => env,
            Err(e) => return fail(format!("Failed to load templates: {e}")),
        },
        None => TemplateEnv::with_settings(settings),
    };
    let env = Arc::new(env);

    match cli.command {
        Commands::Templates => {
            let templates: Vec<_> = env
                .source_names()
                .into_iter()
                .map(|name| json!({ "name": name, "width": env.source_width(name) }))
                .collect();
            emit(&json!(templates));
            ExitCode::SUCCESS
        }

        Commands::Check { template, wide } => {
            let (name, source) = match read_template(&template) {
                Ok(t) => t,
                Err(e) => return fail(e),
            };
            if wide {
                check::<Wide>(&env, &name, &source)
            } else {
                check::<Narrow>(&env, &name, &source)
            }
        }

        Commands::Render { template, params, wide } => {
            let (name, source) = match read_template(&template) {
                Ok(t) => t,
                Err(e) => return fail(e),
            };
            let params = match parse_params(&params) {
                Ok(p) => p,
                Err(e) => return fail(e),
            };
            if wide {
                render::<Wide>(&env, &name, &source, &params)
            } else {
                render::<Narrow>(&env, &name, &source, &params)
            }
        }
    }
}

fn read_template(path: &Path) -> Result<(String, String), String> {
    let source = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read template {}: {e}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    Ok((name, source))
}

fn parse_params(raw: &str) -> Result<ValuesMap, String> {
    let json: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("Invalid params: {e}"))?;
    match Value::from(json) {
        Value::Map(map) => Ok(*map),
        other => Err(format!("Invalid params: expected a JSON object, got {}", other.kind())),
    }
}

fn check<W: CharWidth>(env: &Arc<TemplateEnv>, name: &str, source: &str) -> ExitCode {
    let mut template = Template::<W>::new(Some(Arc::clone(env)));
    match template.load_str(source, Some(name)) {
        Ok(()) => {
            emit(&json!({ "success": true, "template": name, "width": W::WIDTH }));
            ExitCode::SUCCESS
        }
        Err(err) => {
            emit(&json!({ "success": false, "error": err }));
            ExitCode::from(2)
        }
    }
}

fn render<W: CharWidth>(env: &Arc<TemplateEnv>, name: &str, source: &str, params: &ValuesMap) -> ExitCode {
    let mut template = Template::<W>::new(Some(Arc::clone(env)));
    let result = template
        .load_str(source, Some(name))
        .and_then(|()| template.render_as_string(params));

    match result {
        Ok(output) => {
            let job_hash = render_job_hash(name, source, params, ENGINE_VERSION).ok();
            emit(&json!({
                "success": true,
                "jobId": Uuid::new_v4(),
                "renderedAt": Utc::now(),
                "engineVersion": ENGINE_VERSION,
                "template": name,
                "width": W::WIDTH,
                "output": W::to_narrow(&output),
                "digest": output_digest::<W>(&output),
                "jobHash": job_hash,
            }));
            ExitCode::SUCCESS
        }
        Err(err) => {
            emit(&json!({ "success": false, "error": err }));
            ExitCode::from(2)
        }
    }
}

fn fail(message: String) -> ExitCode {
    emit(&json!({ "success": false, "error": message }));
    ExitCode::FAILURE
}

fn emit(output: &serde_json::Value) {
    match serde_json::to_string_pretty(output) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to serialise output: {e}"),
    }
}
