use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stackup")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Build, upload and converge serverless service stacks", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Service manifest
    #[arg(
        short,
        long,
        global = true,
        env = "STACKUP_MANIFEST",
        default_value = "stackup.toml"
    )]
    pub manifest: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build, upload and deploy the service
    Provision(ProvisionArgs),

    /// Show the deployed stack
    Describe,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Default)]
pub struct ProvisionArgs {
    /// Build and package, but skip uploads and stack operations
    #[arg(long)]
    pub dry_run: bool,

    /// Only push function code; fail if anything else changed
    #[arg(long)]
    pub in_place: bool,

    /// Build identifier (defaults to a timestamp)
    #[arg(long, env = "STACKUP_BUILD_ID")]
    pub build_id: Option<String>,

    /// Build tags passed to the build command
    #[arg(long)]
    pub build_tags: Option<String>,

    /// Also write the final template to this path
    #[arg(long)]
    pub template_out: Option<PathBuf>,
}
