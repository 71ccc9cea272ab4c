//! # Ruleflow Compiler CLI
//!
//! Ahead-of-time rule compilation and artifact tooling.
//!
//! ## Usage
//!
//! ```bash
//! ruleflow compile rules.yaml --out artifact/ --config config.yaml
//! ruleflow validate rules.yaml --config config.yaml
//! ruleflow inspect artifact/
//! ```
//!
//! Exit codes: 0 on success, 1 on any error (I/O, validation, compilation).

use clap::{Parser, Subcommand};
use ruleflow::compiler::{self, CompileOptions};
use ruleflow::config::Config;
use ruleflow::emit;
use ruleflow::validator;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ruleflow", version, about = "Rule compiler for the ruleflow engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a rule document into an executable artifact
    Compile {
        /// Rule document (YAML)
        rules: PathBuf,

        /// Artifact output directory
        #[arg(short, long, default_value = "artifact")]
        out: PathBuf,

        /// System config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Parse and validate a rule document without emitting anything
    Validate {
        /// Rule document (YAML)
        rules: PathBuf,

        /// System config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the manifest of an emitted artifact
    Inspect {
        /// Artifact directory
        artifact: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Compile { rules, out, config } => {
            let opts = options(config)?;
            let output = compiler::compile_to_dir(&rules, &out, &opts)?;
            for warning in &output.warnings {
                eprintln!("{warning}");
            }
            println!(
                "compiled {} rules into {} groups across {} layers -> {}",
                output.plan.rules.len(),
                output.plan.groups.len(),
                output.plan.layer_count(),
                out.display()
            );
            Ok(())
        }
        Command::Validate { rules, config } => {
            let opts = options(config)?;
            let ruleset = ruleflow::parser::parse_file(&rules)?;
            let report = validator::validate(&ruleset, &opts.validator);
            for issue in &report.issues {
                eprintln!("{issue}");
            }
            if report.is_ok() {
                println!("{}: {} rules ok", rules.display(), ruleset.rules.len());
                Ok(())
            } else {
                anyhow::bail!("{} validation error(s)", report.errors().count());
            }
        }
        Command::Inspect { artifact } => {
            let manifest = emit::load_manifest(&artifact)?;
            println!("ruleset version: {}", manifest.ruleset_version);
            println!("compiler:        {}", manifest.compiler_version);
            println!("input sensors:   {}", manifest.input_sensors.join(", "));
            println!("output sensors:  {}", manifest.output_sensors.join(", "));
            println!("rules:");
            for rule in &manifest.rules {
                println!(
                    "  [layer {} group {}] {} ({} -> {})",
                    rule.layer,
                    rule.group,
                    rule.name,
                    rule.inputs.join(","),
                    rule.outputs.join(",")
                );
            }
            Ok(())
        }
    }
}

fn options(config: Option<PathBuf>) -> anyhow::Result<CompileOptions> {
    let config = match config {
        Some(path) => Config::from_file(&path.display().to_string())?,
        None => Config::load()?,
    };
    Ok(CompileOptions {
        validator: config.validator_options(),
        budgets: config.group_budgets(),
    })
}
