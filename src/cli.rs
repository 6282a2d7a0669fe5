//! Command-line interface definitions.
//!
//! Every subcommand reads the same config directory, which can also be set
//! through `CONFIG_PATH`. With no subcommand the API server is started.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding config.yaml, sources/ and profiles/
    #[arg(long, global = true, env = "CONFIG_PATH", default_value = "./config")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the JSON API
    Serve,
    /// Run one collection and save the results into today's partition
    Collect {
        /// Source id to collect; repeat for several (default: all enabled)
        #[arg(short, long = "source")]
        sources: Vec<String>,
        /// Profile to collect for (default: active_profile from config.yaml)
        #[arg(short, long)]
        profile: Option<String>,
    },
    /// List the configured sources of a profile
    Sources {
        #[arg(short, long)]
        profile: Option<String>,
    },
    /// Check that a source is reachable with its collector
    TestSource {
        id: String,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_serve() {
        let cli = Cli::parse_from(["trendscope"]);
        assert_eq!(cli.command(), Command::Serve);
        assert_eq!(cli.config_dir, PathBuf::from("./config"));
    }

    #[test]
    fn test_cli_collect_repeated_sources() {
        let cli = Cli::parse_from([
            "trendscope",
            "collect",
            "--source",
            "hackernews",
            "-s",
            "github",
            "--profile",
            "finance",
            "--config-dir",
            "/etc/trendscope",
        ]);

        assert_eq!(
            cli.command(),
            Command::Collect {
                sources: vec!["hackernews".into(), "github".into()],
                profile: Some("finance".into()),
            }
        );
        assert_eq!(cli.config_dir, PathBuf::from("/etc/trendscope"));
    }

    #[test]
    fn test_cli_test_source() {
        let cli = Cli::parse_from(["trendscope", "test-source", "hn"]);
        assert_eq!(cli.command(), Command::TestSource { id: "hn".into() });
    }
}
