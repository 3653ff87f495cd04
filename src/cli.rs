//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Steward - keeps automation server jobs in sync with declared resources
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(version)]
#[command(about = "Reconcile managed resources against an automation server")]
#[command(
    long_about = "Steward watches declared resources, creates or updates the matching jobs on an automation server, and cleans them up before the resources are removed."
)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "STEWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. "info", "steward_reconciler=debug")
    #[arg(long, global = true, env = "STEWARD_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until SIGINT/SIGTERM
    Run {
        /// YAML manifests to load into the object store before starting
        #[arg(short, long)]
        manifests: Vec<PathBuf>,

        /// Number of reconcile workers (overrides controller.workers)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Only manage resources in this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Automation server base URL (overrides automation.url)
        #[arg(long, env = "STEWARD_AUTOMATION_URL")]
        automation_url: Option<String>,

        /// Automation server API user
        #[arg(long, env = "STEWARD_AUTOMATION_USER")]
        automation_user: Option<String>,

        /// Automation server API token
        #[arg(long, env = "STEWARD_AUTOMATION_TOKEN", hide_env_values = true)]
        automation_token: Option<String>,

        /// Use the in-memory automation server even if a URL is configured
        #[arg(long, default_value_t = false)]
        in_memory: bool,
    },

    /// Walk one resource through create, update and delete in-process
    Demo {
        /// Namespace of the demo resource
        #[arg(long, default_value = "ns1")]
        namespace: String,

        /// Name of the demo resource
        #[arg(long, default_value = "demo")]
        name: String,
    },

    /// Print the spec hash of a JSON or YAML document
    Hash {
        /// Spec file; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Print the job configuration XML rendered from a spec
    Render {
        /// Spec file; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Validate configuration and print the effective settings
    CheckConfig,
}
