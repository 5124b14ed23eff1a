use phonebill::protocol::Message;

/// Processes of a phone-bill benchmark cluster.
#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct PhoneBill {
    #[command(subcommand)]
    pub role: Role,
}

#[derive(clap::Subcommand, Debug)]
pub enum Role {
    /// Run the controller, settings are read from PHONEBILL_* environment variables
    Controller,
    /// Run an online app worker with synthetic workloads
    OnlineApp {
        /// Controller address as host:port
        controller: String,
    },
    /// Run the billing batch worker with a synthetic billing job
    PhoneBill {
        /// Controller address as host:port
        controller: String,
        /// Number of billing steps
        #[arg(long, default_value_t = 100)]
        steps: u32,
        /// Duration of one billing step in milliseconds
        #[arg(long, default_value_t = 100)]
        step_ms: u64,
    },
    /// Send one control request and print the reply
    Command {
        /// Controller address as host:port
        controller: String,
        /// GET_CLUSTER_STATUS, START_EXECUTION or SHUTDOWN_CLUSTER
        #[arg(value_parser = parse_message)]
        message: Message,
    },
}

fn parse_message(s: &str) -> Result<Message, String> {
    s.parse().map_err(|e| format!("{e}"))
}
