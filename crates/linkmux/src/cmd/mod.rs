use std::time::Duration;

use clap::{Args, Subcommand};
use linkmux_protocol::{ConnectionConfig, ResendConfig};
use linkmux_transport::LinkAddr;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod ping;
pub mod pong;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and echo every sample back.
    Pong(PongArgs),
    /// Open a channel, send samples and report round-trip times.
    Ping(PingArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Pong(args) => pong::run(args, format),
        Command::Ping(args) => ping::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Resend policy shared by both ends.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Time to wait for an acknowledgement before resending (e.g. 500ms, 2s).
    #[arg(long, default_value = "500ms")]
    pub timeout: String,
    /// Resends before the connection is declared dead.
    #[arg(long, default_value_t = 5)]
    pub retries: u32,
}

impl LinkArgs {
    pub fn connection_config(&self) -> CliResult<ConnectionConfig> {
        Ok(ConnectionConfig {
            resend: ResendConfig {
                timeout: parse_duration(&self.timeout)?,
                retries: self.retries,
            },
            ..ConnectionConfig::default()
        })
    }
}

#[derive(Args, Debug)]
pub struct PongArgs {
    /// Address to listen on (unix:<path>, tcp:<ip>:<port>, a socket path or ip:port).
    pub addr: LinkAddr,
    #[command(flatten)]
    pub link: LinkArgs,
    /// Exit once the first connection has closed.
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Address of a pong server.
    pub addr: LinkAddr,
    #[command(flatten)]
    pub link: LinkArgs,
    /// Number of samples to send.
    #[arg(long, short = 'n', default_value_t = 4)]
    pub count: usize,
    /// Send acknowledged, resent, ordered samples.
    #[arg(long)]
    pub important: bool,
    /// Payload size in bytes (at least enough for the sequence tag).
    #[arg(long, default_value_t = 32)]
    pub size: usize,
    /// How long to wait for the channel and for each echo (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn link_args_build_resend_config() {
        let args = LinkArgs {
            timeout: "250ms".into(),
            retries: 2,
        };
        let config = args.connection_config().expect("valid config");
        assert_eq!(config.resend.timeout, Duration::from_millis(250));
        assert_eq!(config.resend.retries, 2);
    }
}
