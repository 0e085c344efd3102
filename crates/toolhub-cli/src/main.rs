//! CLI entry point - the composition root.

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use toolhub_cli::{Cli, CliConfig, CliError, Commands, bootstrap, handlers};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    // Offline commands don't need the hub.
    if let Commands::Validate { file } = &command {
        return handlers::validate::execute(file).await;
    }

    let config = CliConfig::resolve(cli.settings_dir, cli.workspace)?;
    let mut ctx = bootstrap(config).await?;

    let result = match command {
        Commands::List { all, json } => handlers::list::execute(&ctx, all, json).await,
        Commands::Watch => handlers::watch::execute(&mut ctx).await,
        Commands::Call {
            server,
            tool,
            args,
            scope,
        } => handlers::call::execute(&ctx, &server, &tool, args.as_deref(), scope).await,
        Commands::Read { server, uri, scope } => {
            handlers::read::execute(&ctx, &server, &uri, scope).await
        }
        Commands::Validate { .. } => Ok(()),
    };

    ctx.hub.dispose().await;
    result
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        let code = err.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
        eprintln!("Error: {err:#}");
        std::process::exit(code);
    }
}
