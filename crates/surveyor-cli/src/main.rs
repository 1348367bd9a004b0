//! Surveyor CLI entry point

use clap::Parser;
use std::process::ExitCode;
use surveyor::telemetry::init_tracing;
use surveyor::{EngineConfig, LogConfig};
use surveyor_cli::handlers::{self, Status};
use surveyor_cli::{
    Cli, CliConfig, CliResult, ColorChoice, Commands, ConfigCommand, MailCommand, Verbosity,
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    config.color.apply();
    let status = Status::new(&config);

    #[cfg(feature = "gmail")]
    let engine: Option<EngineConfig> = match &cli.command {
        Commands::Mail(MailCommand::Wait(args)) => Some(handlers::load_config(args.config.as_deref())?),
        _ => None,
    };
    #[cfg(not(feature = "gmail"))]
    let engine: Option<EngineConfig> = None;
    let log = engine.as_ref().map_or_else(LogConfig::default, |e| e.log.clone());
    init_tracing(&config.verbosity.log_config(&log));

    let output = match cli.command {
        Commands::Config(ConfigCommand::Show(args)) => handlers::run_config_show(&args)?,
        Commands::Config(ConfigCommand::Validate(args)) => {
            let report = handlers::run_config_validate(&args)?;
            status.success(&format!("{} is valid", args.file.display()));
            report
        }
        Commands::Mail(MailCommand::Query(args)) => handlers::run_mail_query(&args)?,
        #[cfg(feature = "gmail")]
        Commands::Mail(MailCommand::Wait(args)) => {
            let engine = engine.unwrap_or_default();
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(handlers::run_mail_wait(&args, &engine, &status))?
        }
    };
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(ColorChoice::from(cli.color))
}
