use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Process performance monitor with leak tracking")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Process ID to monitor
    #[arg(long, short = 'p', global = true, conflicts_with = "process")]
    pub pid: Option<u32>,

    /// Process name to monitor (pgrep-style matching)
    #[arg(long, short = 'P', global = true, conflicts_with = "pid")]
    pub process: Option<String>,

    /// Output database path
    #[arg(long, short = 'o', global = true)]
    pub output: Option<PathBuf>,

    /// Sampling interval
    #[arg(long, short = 'i', default_value = "1s", value_parser = parse_duration)]
    pub interval: Duration,

    /// Monitoring duration (default: until Ctrl-C)
    #[arg(long, short = 'd', value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Samples retained per metric channel
    #[arg(long, default_value = "120")]
    pub capacity: usize,

    /// Suppress the live status line
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarize a recorded session: metric extrema and leak history
    Report {
        /// Session database file (defaults to most recent)
        file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Output as CSV
        #[arg(long)]
        csv: bool,
    },

    /// Execute raw SQL query on a session database
    Query {
        /// Session database file
        file: PathBuf,

        /// SQL query to execute
        sql: String,
    },

    /// List saved session databases
    List {
        /// Directory to search (defaults to current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    // Try humantime first
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // Try bare number as seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    Err(format!(
        "Invalid duration '{s}'. Examples: 30s, 5m, 2h, 1h30m, 90"
    ))
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        // For monitoring mode (no subcommand), require either --pid or --process
        if self.command.is_none() && self.pid.is_none() && self.process.is_none() {
            return Err("Either --pid or --process is required for monitoring".to_string());
        }

        if self.interval < Duration::from_millis(10) {
            return Err(format!(
                "Sampling interval must be at least 10ms, got {:?}",
                self.interval
            ));
        }

        if self.capacity == 0 || self.capacity > 1_000_000 {
            return Err(format!(
                "History capacity must be between 1 and 1000000, got {}",
                self.capacity
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse_humantime_and_bare_seconds() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn monitoring_requires_a_target() {
        let cli = Cli::parse_from(["vigil"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from(["vigil", "--pid", "1234"]);
        assert!(cli.validate().is_ok());

        let cli = Cli::parse_from(["vigil", "list"]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn interval_and_capacity_bounds_are_enforced() {
        let cli = Cli::parse_from(["vigil", "-p", "1", "-i", "1ms"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from(["vigil", "-p", "1", "--capacity", "0"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from(["vigil", "-p", "1", "-i", "250ms", "--capacity", "600"]);
        assert!(cli.validate().is_ok());
    }
}
