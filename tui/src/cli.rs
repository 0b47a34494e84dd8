use clap::Parser;

use crate::config::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(version, about = "Terminal client for the Conductor orchestration server")]
pub struct Cli {
    /// Optional message to send as soon as the session starts.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Base URL of the orchestration server.
    #[arg(long = "server", short = 's', value_name = "URL")]
    pub server_url: Option<String>,

    /// Chat with this agent instead of the main orchestrator.
    #[arg(long, short = 'a')]
    pub agent: Option<String>,

    /// How often to refresh the run list while runs are in flight.
    #[arg(long = "poll-interval-ms", value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Log at `info` instead of `warn` unless RUST_LOG says otherwise.
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl Cli {
    pub fn config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            server_url: self.server_url.clone(),
            default_agent: self.agent.clone(),
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}
