//! Plotline CLI entry point.
//!
//! Binary name: `plotline`
//!
//! Parses arguments, sets up logging, then dispatches to the command
//! handlers in `cli`.

mod cli;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use plotline_infra::trace::TraceFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    plotline_observe::init_tracing(cli::log_filter(cli.verbose, cli.quiet), cli.log_format, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    let result = match cli.command {
        Commands::Run(args) => cli::run::handle_run(args, cli.json).await,
        Commands::Validate { plot } => cli::run::handle_validate(&plot, cli.json),
        Commands::Trace {
            file,
            event,
            id,
            contains,
        } => cli::trace::handle_trace(&file, TraceFilter { event, id, contains }, cli.json),
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "plotline", &mut std::io::stdout());
            Ok(())
        }
    };

    plotline_observe::shutdown_tracing();
    result
}
