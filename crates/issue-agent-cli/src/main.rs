use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;

mod commands;
mod logging;

use commands::create_pr::CreatePrArgs;
use commands::react::ReactArgs;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a GitHub issue and open a pull request for it
    CreatePr(CreatePrArgs),

    /// Follow a comment on a pull request and push the result to its branch
    React(ReactArgs),

    /// List the functions agents can call
    ListFunctions,

    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::CreatePr(args) => commands::create_pr::execute(args).await,
        Command::React(args) => commands::react::execute(args).await,
        Command::ListFunctions => commands::list_functions::execute(),
        Command::Version => commands::version::execute(),
    }
}
