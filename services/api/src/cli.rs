use crate::demo::{run_demo, run_import, DemoArgs, ImportArgs};
use crate::server;
use admissions::error::AppError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Admissions Processing Service",
    about = "Run and demonstrate enrollment application processing from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk through locking, approval, and rejection against in-memory data
    Demo(DemoArgs),
    /// Validate an intake CSV export and print what would be loaded
    Import(ImportArgs),
}

#[derive(Args, Debug)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Intake CSV export to preload as pending applications
    #[arg(long)]
    pub(crate) seed_csv: Option<PathBuf>,
    /// Tenant that owns the preloaded applications
    #[arg(long, default_value = "demo-school")]
    pub(crate) tenant: String,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            seed_csv: None,
            tenant: "demo-school".to_string(),
        }
    }
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Import(args) => run_import(args),
    }
}
