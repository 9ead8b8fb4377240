use crate::demo::{run_deadlines, run_demo, DeadlinesArgs, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use foil_portal::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "FOIL Request Portal",
    about = "Run the public-records request lifecycle service from the command line",
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
    /// Walk a sample request through acknowledgment, extension, release and closure
    Demo(DemoArgs),
    /// Print the overdue and due-soon digest for a set of requests
    Deadlines(DeadlinesArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Deadlines(args) => run_deadlines(args),
    }
}
