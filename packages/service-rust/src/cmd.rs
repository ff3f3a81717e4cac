//! Command-line and environment flags.
//!
//! Every flag has a `PLEXUS_*` environment fallback. Flags are parsed once,
//! on the first initialisation of a service.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

/// Callback run with the parsed flags before they are applied.
pub type Action = Arc<dyn Fn(&Flags) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "plexus", about = "A plexus service")]
pub struct Flags {
    /// Name of the server.
    #[arg(long, env = "PLEXUS_SERVER_NAME")]
    pub server_name: Option<String>,

    #[arg(long, env = "PLEXUS_SERVER_VERSION")]
    pub server_version: Option<String>,

    /// Id of the server. Generated if unset.
    #[arg(long, env = "PLEXUS_SERVER_ID")]
    pub server_id: Option<String>,

    /// Bind address for the server transport.
    #[arg(long, env = "PLEXUS_SERVER_ADDRESS")]
    pub server_address: Option<String>,

    /// Address advertised in the registry.
    #[arg(long, env = "PLEXUS_SERVER_ADVERTISE")]
    pub server_advertise: Option<String>,

    /// Extra node metadata, `key=value` pairs separated by commas.
    #[arg(
        long,
        env = "PLEXUS_SERVER_METADATA",
        value_delimiter = ',',
        value_parser = parse_key_value
    )]
    pub server_metadata: Vec<(String, String)>,

    /// Registry record lifetime in seconds.
    #[arg(long, env = "PLEXUS_REGISTER_TTL")]
    pub register_ttl: Option<u64>,

    /// Re-registration period in seconds.
    #[arg(long, env = "PLEXUS_REGISTER_INTERVAL")]
    pub register_interval: Option<u64>,

    #[arg(long, env = "PLEXUS_REGISTRY")]
    pub registry: Option<String>,

    #[arg(long, env = "PLEXUS_BROKER")]
    pub broker: Option<String>,

    #[arg(long, env = "PLEXUS_TRANSPORT")]
    pub transport: Option<String>,

    #[arg(long, env = "PLEXUS_STORE")]
    pub store: Option<String>,

    #[arg(long, env = "PLEXUS_STORE_DATABASE")]
    pub store_database: Option<String>,

    /// Defaults to the service name.
    #[arg(long, env = "PLEXUS_STORE_TABLE")]
    pub store_table: Option<String>,

    /// Plugins to load, separated by commas.
    #[arg(long, env = "PLEXUS_PLUGIN", value_delimiter = ',')]
    pub plugin: Vec<String>,

    /// Serve health, stats and metrics over HTTP on this address.
    #[arg(long, env = "PLEXUS_DEBUG_ADDRESS")]
    pub debug_address: Option<SocketAddr>,

    /// Client call deadline, e.g. `500ms`, `5s`, `1m`.
    #[arg(long, env = "PLEXUS_CLIENT_REQUEST_TIMEOUT", value_parser = parse_duration)]
    pub client_request_timeout: Option<Duration>,
}

impl Flags {
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.server_metadata.iter().cloned().collect()
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if k.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((k.to_string(), v.to_string()))
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = s
        .find(|c: char| !c.is_ascii_digit())
        .map_or((s, "s"), |i| s.split_at(i));
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {s:?}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => n
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {s:?} out of range")),
        _ => Err(format!("unknown duration unit in {s:?}")),
    }
}

// ---------------------------------------------------------------------------
// Cmd
// ---------------------------------------------------------------------------

/// Command-line state carried in the service options.
#[derive(Clone, Default)]
pub struct Cmd {
    /// Set to the server name on first initialisation if unset.
    pub app_name: Option<String>,
    /// Arguments to parse instead of the process arguments. The first entry
    /// is the program name.
    pub args: Option<Vec<String>>,
    pub action: Option<Action>,
}

impl Cmd {
    /// Parses the configured arguments, or the process arguments if none.
    ///
    /// # Errors
    ///
    /// Returns the clap error for invalid input and for `--help`/`--version`.
    pub fn parse(&self) -> Result<Flags, clap::Error> {
        match &self.args {
            Some(args) => Flags::try_parse_from(args.iter().map(OsString::from)),
            None => Flags::try_parse_from(std::env::args_os()),
        }
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmd")
            .field("app_name", &self.app_name)
            .field("args", &self.args)
            .field("action", &self.action.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(args: &[&str]) -> Cmd {
        Cmd {
            args: Some(args.iter().map(ToString::to_string).collect()),
            ..Cmd::default()
        }
    }

    #[test]
    fn parses_server_flags() {
        let flags = cmd(&[
            "svc",
            "--server-name",
            "greeter",
            "--server-metadata",
            "zone=a,tier=web",
            "--register-ttl",
            "20",
            "--plugin",
            "alt,extra",
        ])
        .parse()
        .unwrap();
        assert_eq!(flags.server_name.as_deref(), Some("greeter"));
        assert_eq!(flags.metadata().get("zone").map(String::as_str), Some("a"));
        assert_eq!(flags.metadata().get("tier").map(String::as_str), Some("web"));
        assert_eq!(flags.register_ttl, Some(20));
        assert_eq!(flags.plugin, vec!["alt", "extra"]);
    }

    #[test]
    fn rejects_malformed_metadata() {
        assert!(cmd(&["svc", "--server-metadata", "novalue"]).parse().is_err());
    }

    #[test]
    fn help_is_reported_as_error() {
        let err = cmd(&["svc", "--help"]).parse().unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn durations_accept_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("3s"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert!(parse_duration("1h").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("400000000000000000m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615"),
            Ok(Duration::from_secs(u64::MAX))
        );
    }
}
