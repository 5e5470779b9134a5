//! gantryd - the gantry CI operator binary.
//!
//! ## Commands
//!
//! - `plan`: interpret a build configuration and print the step descriptors
//!   it expands to
//! - `promoted-tags`: print the destination references promotion would write

mod telemetry;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use gantry_api::{JobSpec, Refs, ReleaseBuildConfiguration, StepConfiguration};
use gantry_engine::{promoted_tags, step_configs_for_build};

#[derive(Parser)]
#[command(name = "gantryd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Convert declarative build configurations into executable step graphs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a build configuration into its step descriptors
    Plan {
        /// Path to the build configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Job namespace objects would be created in
        #[arg(long, default_value = "ci-op-scratch")]
        namespace: String,

        /// Organization of the repository under test
        #[arg(long)]
        org: Option<String>,

        /// Repository under test
        #[arg(long)]
        repo: Option<String>,
    },

    /// Print the destination references promotion would write
    PromotedTags {
        /// Path to the build configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn load_configuration(path: &PathBuf) -> Result<ReleaseBuildConfiguration> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn describe(step: &StepConfiguration) -> String {
    match step {
        StepConfiguration::InputImageTag(c) => {
            format!("input image {} -> pipeline:{}", c.base_image, c.to)
        }
        StepConfiguration::PipelineImageCache(c) => {
            format!("cache pipeline:{} -> pipeline:{}", c.from, c.to)
        }
        StepConfiguration::Source(c) => format!("clone source onto pipeline:{}", c.from),
        StepConfiguration::BundleSource(_) => "operator bundle source".to_string(),
        StepConfiguration::IndexGenerator(c) => {
            format!("index generator over {}", c.operator_index.join(", "))
        }
        StepConfiguration::ProjectImageBuild(c) => format!("build pipeline:{}", c.to),
        StepConfiguration::GitSource(_) => "build root from repository".to_string(),
        StepConfiguration::RpmImageInjection(c) => {
            format!("inject RPM repo into pipeline:{}", c.from)
        }
        StepConfiguration::RpmServe(c) => format!("serve RPMs from pipeline:{}", c.from),
        StepConfiguration::OutputImageTag(c) => {
            format!("publish pipeline:{} -> {}:{}", c.from, c.to.name, c.to.tag)
        }
        StepConfiguration::ReleaseImagesTag(c) => {
            format!("import release images from {}/{}", c.namespace, c.name)
        }
        StepConfiguration::ResolvedRelease(c) => format!("resolve release {}", c.name),
        StepConfiguration::Test(c) => format!("test {}", c.name),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Plan {
            config,
            namespace,
            org,
            repo,
        } => {
            let configuration = load_configuration(&config)?;
            let refs = match (org, repo) {
                (Some(org), Some(repo)) => Some(Refs {
                    org,
                    repo,
                    ..Refs::default()
                }),
                _ => None,
            };
            let job_spec = JobSpec {
                namespace,
                refs,
                ..JobSpec::default()
            };
            let read_file = |path: &str| -> std::io::Result<Vec<u8>> { std::fs::read(path) };
            let steps = step_configs_for_build(&configuration, &job_spec, &read_file)?;
            info!(count = steps.len(), "expanded configuration");
            for step in &steps {
                println!("{}", describe(step));
            }
        }
        Commands::PromotedTags { config } => {
            let configuration = load_configuration(&config)?;
            for tag in promoted_tags(&configuration) {
                println!("{tag}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_plan_arguments() {
        let cli = Cli::try_parse_from([
            "gantryd",
            "plan",
            "--config",
            "config.yaml",
            "--namespace",
            "ci-op-1234",
        ])
        .unwrap();
        match cli.command {
            Commands::Plan { namespace, .. } => assert_eq!(namespace, "ci-op-1234"),
            _ => panic!("expected the plan command"),
        }
    }
}
