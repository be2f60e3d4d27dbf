//! Warden - console host
//!
//! Loads configuration, bootstraps the capability registry from the host
//! resources, runs `--file`/`--eval` inputs and then, unless told otherwise,
//! a read-eval-print loop.

mod args;

use std::io::{self, BufRead, Write};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warden_core::{CapabilityDecl, CapabilityRegistry, Engine, TrustTier, Value, WardenConfig};
use warden_host::{HostControl, HostProvider};

use crate::args::CliArgs;

/// Capabilities offered when no configuration file is given
fn default_capabilities() -> Vec<CapabilityDecl> {
    vec![
        CapabilityDecl::new("console", TrustTier::Sandboxed),
        CapabilityDecl::new("core", TrustTier::Trusted),
        CapabilityDecl::new("env", TrustTier::Trusted),
        CapabilityDecl::new("options", TrustTier::Sandboxed),
        CapabilityDecl::new("process-exec", TrustTier::Trusted),
    ]
}

fn load_config(args: &CliArgs) -> Result<WardenConfig> {
    match &args.config {
        Some(path) => WardenConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let mut config = WardenConfig::new();
            config.capabilities = default_capabilities();
            Ok(config)
        }
    }
}

/// Exit code for a completion value: numbers map to themselves, anything else to 0.
fn exit_code(value: &Value) -> i32 {
    match value {
        Value::Number(n) if n.is_finite() => *n as i32,
        _ => 0,
    }
}

fn run_repl(engine: &mut Engine, control: &HostControl) -> Result<Option<Value>> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut last = None;

    loop {
        if control.exit_requested().is_some() || !control.is_interactive() {
            break;
        }
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            writeln!(stdout)?;
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match engine.eval_string(line) {
            Ok(value) => {
                if value != Value::Null {
                    writeln!(stdout, "{}", engine.render(&value))?;
                }
                last = Some(value);
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }
    Ok(last)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    let control = Arc::new(HostControl::new(args.wants_repl()));
    let mut provider = HostProvider::new(control.clone()).with_options(config.options.clone());
    let registry = CapabilityRegistry::bootstrap(&config.capabilities, &mut provider)
        .context("capability bootstrap failed")?;
    info!(capabilities = registry.len(), "registry ready");

    let mut engine = Engine::new(config, registry).context("engine startup failed")?;

    let mut last = None;
    let mut failed = false;

    for path in &args.files {
        if control.exit_requested().is_some() {
            break;
        }
        match engine.load_script(path) {
            Ok(value) => last = Some(value),
            Err(e) => {
                error!(path = %path.display(), "script failed");
                eprintln!("Error: {}", e);
                failed = true;
            }
        }
    }

    for text in &args.evals {
        if control.exit_requested().is_some() {
            break;
        }
        match engine.eval_string(text) {
            Ok(value) => {
                if value != Value::Null {
                    println!("{}", engine.render(&value));
                }
                last = Some(value);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                failed = true;
            }
        }
    }

    if control.exit_requested().is_none() && args.wants_repl() && control.is_interactive() {
        if let Some(value) = run_repl(&mut engine, &control)? {
            last = Some(value);
        }
    }

    let code = match (control.exit_requested(), last) {
        (Some(code), _) => code,
        (None, Some(value)) => exit_code(&value),
        (None, None) if failed => 1,
        (None, None) => 0,
    };

    // tear the engine down first so resources release before exiting
    drop(engine);
    process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_results_become_exit_codes() {
        assert_eq!(exit_code(&Value::Number(3.0)), 3);
        assert_eq!(exit_code(&Value::Number(f64::NAN)), 0);
        assert_eq!(exit_code(&Value::str("3")), 0);
        assert_eq!(exit_code(&Value::Null), 0);
    }

    #[test]
    fn default_capabilities_bootstrap_against_the_host() {
        let control = Arc::new(HostControl::new(false));
        let mut provider = HostProvider::new(control);
        let registry = CapabilityRegistry::bootstrap(&default_capabilities(), &mut provider).expect("bootstrap");
        assert_eq!(registry.len(), 5);
    }
}
