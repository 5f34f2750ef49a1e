//! plugdev entry point: argument parsing, logging and command dispatch.

use std::process::ExitCode;

use clap::Parser;
use miette::Result;
use plugdev_cli::{cli, commands, error, logger, ui};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cli::Cli::parse();

    let logging = logger::init_logger(logger::LogOptions {
        verbose: args.verbose,
        quiet: args.quiet,
        no_color: args.no_color,
    });
    ui::init_colors(args.no_color);

    let result = match args.command {
        cli::Command::Dev(dev_args) => commands::dev_execute(dev_args, logging)
            .await
            .map(|()| ExitCode::SUCCESS),
        cli::Command::Validate(validate_args) => commands::validate_execute(validate_args)
            .await
            .map(|()| ExitCode::SUCCESS),
        cli::Command::Build(build_args) => commands::build_execute(build_args, logging)
            .await
            .map(|()| ExitCode::SUCCESS),
        cli::Command::DeployWatch(watch_args) => {
            commands::deploy_watch_execute(watch_args, logging)
                .await
                .map(|()| ExitCode::SUCCESS)
        }
        cli::Command::BuildWorker(worker_args) => {
            commands::build_worker_execute(worker_args).map(|ok| {
                if ok {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            })
        }
    };

    result.map_err(error::cli_error_to_miette)
}
