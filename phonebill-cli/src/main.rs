//! Entry point of all phone-bill cluster processes
use std::{sync::Arc, time::Duration};

use clap::Parser;
use phonebill::{
    config::ConfigError,
    controller::ControllerError,
    protocol::{ControllerClient, ProtocolError},
    worker::{
        run_command, run_online_app, run_phone_bill, DriverError, SyntheticBilling,
        SyntheticWorkloads,
    },
    Controller, ControllerConfig,
};
use thiserror::Error;
use tracing::{debug, info};

mod cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    match main_inner().await {
        Ok(_) => (),
        Err(e) => {
            panic!("{:?}", eyre::Report::new(e))
        }
    }
}

async fn main_inner() -> Result<(), Error> {
    let args = cli::PhoneBill::parse();
    debug!("Got the following args: {args:?}");

    match args.role {
        cli::Role::Controller => {
            let config = ControllerConfig::from_env()?;
            info!(port = config.listen_port, "Starting controller");
            Controller::run(&config).await?;
        }
        cli::Role::OnlineApp { controller } => {
            let client = ControllerClient::connect(controller.as_str()).await?;
            run_online_app(client, &SyntheticWorkloads).await?;
        }
        cli::Role::PhoneBill {
            controller,
            steps,
            step_ms,
        } => {
            let client = ControllerClient::connect(controller.as_str()).await?;
            let job = Arc::new(SyntheticBilling::new(steps, Duration::from_millis(step_ms)));
            run_phone_bill(client, job).await?;
        }
        cli::Role::Command {
            controller,
            message,
        } => {
            for line in run_command(controller.as_str(), message).await? {
                println!("{line}");
            }
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}
