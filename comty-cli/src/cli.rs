use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "comty",
    author,
    version,
    about = "Command line client for the Comty platform",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "COMTY_CONFIG")]
    pub config: Option<PathBuf>,

    /// API origin, overrides the configuration file
    #[arg(long, global = true, env = "COMTY_ORIGIN")]
    pub origin: Option<String>,

    /// Access token, overrides the stored session
    #[arg(long, global = true, env = "COMTY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Refresh token, overrides the stored session
    #[arg(
        long,
        global = true,
        env = "COMTY_REFRESH_TOKEN",
        hide_env_values = true
    )]
    pub refresh_token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send an authorized request and print the response body
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        /// Path relative to the origin, or an absolute URL
        path: String,

        /// Query parameter, repeatable
        #[arg(short = 'Q', long = "query", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        query: Vec<(String, String)>,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,

        /// Print compact JSON
        #[arg(long)]
        compact: bool,
    },

    /// Search the platform and every installed source
    Search {
        keywords: String,

        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },

    /// Show the signed-in user's library
    Library {
        #[arg(short, long, default_value_t = 100)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,

        /// Restrict to one kind of item (tracks, playlists, releases)
        #[arg(long)]
        kind: Option<String>,

        /// Oldest first
        #[arg(long)]
        asc: bool,
    },

    /// Show one release
    Release {
        id: String,

        /// Ask this source instead of the platform
        #[arg(long)]
        service: Option<String>,
    },

    /// Connect realtime channels and print their events until interrupted
    Listen {
        /// Only connect these namespaces, repeatable
        #[arg(short, long)]
        namespace: Vec<String>,
    },

    /// Measure round-trip latency to the API and over a realtime channel
    Ping {
        /// Seconds to wait for each answer
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,

        /// Skip the channel round trip
        #[arg(long)]
        http_only: bool,
    },

    /// Configuration management
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_request() {
        let args = Args::try_parse_from([
            "comty", "request", "GET", "/music/my/library", "-Q", "limit=10", "-Q", "kind=tracks",
        ])
        .unwrap();

        match args.command {
            Commands::Request { method, query, .. } => {
                assert_eq!(method, "GET");
                assert_eq!(
                    query,
                    vec![
                        ("limit".to_string(), "10".to_string()),
                        ("kind".to_string(), "tracks".to_string()),
                    ]
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ping() {
        let args = Args::try_parse_from(["comty", "ping", "--http-only"]).unwrap();
        match args.command {
            Commands::Ping { timeout, http_only } => {
                assert_eq!(timeout, 5);
                assert!(http_only);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_key_val_rejects_missing_separator() {
        assert!(parse_key_val("limit").is_err());
        assert_eq!(
            parse_key_val("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
    }
}
