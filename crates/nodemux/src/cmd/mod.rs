use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod publish;
pub mod request;
pub mod serve;
pub mod session;
pub mod subscribe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a hub that routes between connected nodes.
    Serve(ServeArgs),
    /// Send one request and print the response.
    Request(RequestArgs),
    /// Publish one message to a topic.
    Publish(PublishArgs),
    /// Subscribe to a topic and print publications.
    Subscribe(SubscribeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Request(args) => request::run(args, format),
        Command::Publish(args) => publish::run(args, format),
        Command::Subscribe(args) => subscribe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where to connect and who to claim to be.
#[derive(Args, Debug)]
pub struct NodeArgs {
    /// Socket path of the hub.
    pub path: PathBuf,
    /// Node id to announce (decimal or 0x hex).
    #[arg(long, value_parser = parse_node_id)]
    pub node_id: u32,
    /// How long to wait for the hub handshake and replies (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct PayloadArgs {
    /// JSON payload, sent with the `j:` tag.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Node id of the hub itself (decimal or 0x hex).
    #[arg(long, value_parser = parse_node_id)]
    pub node_id: u32,
    /// Longest idle sleep between poll cycles (e.g. 100ms, 1s).
    #[arg(long, default_value = "100ms")]
    pub idle_max: String,
    /// Interval between handshake announcements (e.g. 5s).
    #[arg(long, default_value = "5s")]
    pub sync_interval: String,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    #[command(flatten)]
    pub node: NodeArgs,
    /// Destination node id (decimal or 0x hex).
    #[arg(long, value_parser = parse_node_id)]
    pub dst: u32,
    /// Request anchor, e.g. /status.
    #[arg(long)]
    pub anchor: String,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    #[command(flatten)]
    pub node: NodeArgs,
    /// Topic to publish on.
    #[arg(long)]
    pub topic: String,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    #[command(flatten)]
    pub node: NodeArgs,
    /// Topic to subscribe to.
    #[arg(long)]
    pub topic: String,
    /// Exit after receiving N publications.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_node_id(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    match parsed {
        Ok(0) => Err("node id 0 is reserved".to_string()),
        Ok(id) => Ok(id),
        Err(err) => Err(format!("invalid node id {input:?}: {err}")),
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Sinks address sockets by UTF-8 path.
pub fn socket_addr(path: &Path) -> CliResult<&str> {
    path.to_str().ok_or_else(|| {
        CliError::new(
            USAGE,
            format!("socket path is not valid UTF-8: {}", path.display()),
        )
    })
}

pub fn resolve_payload(args: &PayloadArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        let mut payload = nodemux_engine::reply::JSON_TAG.to_vec();
        payload.extend_from_slice(json.as_bytes());
        return Ok(payload);
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return std::fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, std::sync::atomic::Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_accept_decimal_and_hex() {
        assert_eq!(parse_node_id("34952"), Ok(0x8888));
        assert_eq!(parse_node_id("0x8888"), Ok(0x8888));
        assert_eq!(parse_node_id("0XfFfF"), Ok(0xffff));
    }

    #[test]
    fn node_ids_reject_zero_and_junk() {
        assert!(parse_node_id("0").is_err());
        assert!(parse_node_id("0x0").is_err());
        assert!(parse_node_id("hub").is_err());
        assert!(parse_node_id("0x1_0000_0000").is_err());
    }

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
    fn json_payload_is_tagged() {
        let args = PayloadArgs {
            json: Some(r#"{"x":1}"#.to_string()),
            data: None,
            file: None,
        };
        assert_eq!(resolve_payload(&args).unwrap(), br#"j:{"x":1}"#.to_vec());

        let bad = PayloadArgs {
            json: Some("{".to_string()),
            data: None,
            file: None,
        };
        assert_eq!(resolve_payload(&bad).unwrap_err().code, USAGE);
    }
}
