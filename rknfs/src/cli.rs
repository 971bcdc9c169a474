use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rknfs::RetryPolicy;

#[derive(Parser)]
#[command(name = "rknfs", version, about = "Talk to an rknfsd server")]
pub struct Cli {
    #[command(flatten)]
    pub conn: ConnArgs,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct ConnArgs {
    /// Server address (ip:port)
    #[arg(long, env = "RKNFS_ADDR", default_value = "127.0.0.1:50051")]
    pub addr: String,
    /// Deadline of a single attempt in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
    /// First retry delay in milliseconds; doubles after every failure
    #[arg(long, default_value_t = 100)]
    pub backoff_ms: u64,
    /// Give up after this many attempts (default: retry forever)
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Give up once a call has taken this long in milliseconds
    #[arg(long)]
    pub deadline_ms: Option<u64>,
}

impl ConnArgs {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            rpc_timeout: Duration::from_millis(self.timeout_ms),
            initial_backoff: Duration::from_millis(self.backoff_ms),
            max_attempts: self.max_attempts,
            deadline: self.deadline_ms.map(Duration::from_millis),
        }
    }
}

fn parse_mode(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0o"), 8).map_err(|e| format!("bad octal mode {s}: {e}"))
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the server handle of a path
    Lookup { path: String },
    /// Print the attributes of a path
    Stat { path: String },
    /// Print the contents of a file
    Cat {
        path: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Write text into a file and commit it
    Write {
        path: String,
        data: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Write synchronously instead of buffering until commit
        #[arg(long)]
        stable: bool,
    },
    /// Set the size of a file
    Truncate { path: String, size: u64 },
    Mkdir {
        path: String,
        #[arg(long, default_value = "755", value_parser = parse_mode)]
        mode: u32,
    },
    Rmdir { path: String },
    /// Create a file if it does not exist
    Touch {
        path: String,
        #[arg(long, default_value = "644", value_parser = parse_mode)]
        mode: u32,
    },
    Rm { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_write_with_retry_flags() {
        let cli = Cli::try_parse_from([
            "rknfs",
            "--addr",
            "10.0.0.2:50051",
            "--max-attempts",
            "4",
            "write",
            "/a/b.txt",
            "hello",
            "--stable",
        ])
        .unwrap();
        assert_eq!(cli.conn.addr, "10.0.0.2:50051");
        let policy = cli.conn.policy();
        assert_eq!(policy.max_attempts, Some(4));
        assert_eq!(policy.rpc_timeout, Duration::from_millis(5000));
        match cli.command {
            Commands::Write { path, data, stable, .. } => {
                assert_eq!(path, "/a/b.txt");
                assert_eq!(data, "hello");
                assert!(stable);
            }
            _ => panic!("expected write"),
        }
    }

    #[test]
    fn test_mode_is_octal() {
        let cli = Cli::try_parse_from(["rknfs", "mkdir", "/d", "--mode", "0o700"]).unwrap();
        match cli.command {
            Commands::Mkdir { mode, .. } => assert_eq!(mode, 0o700),
            _ => panic!("expected mkdir"),
        }
        assert!(parse_mode("9").is_err());
    }
}
