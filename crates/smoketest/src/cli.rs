//! Command-line interface definitions for smoketest.

use clap::{Parser, Subcommand};
use logging::LogArgs;

/// Command-line interface arguments for the smoketest binary.
#[derive(Parser, Debug)]
#[command(name = "smoketest", about = "Telefocus smoketest tool", version)]
pub struct Cli {
    /// Logging controls
    #[command(flatten)]
    pub log: LogArgs,

    /// Suppress per-case lines; print only the summary
    #[arg(long)]
    pub quiet: bool,

    /// Emit the outcome list as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Bound for condition waits in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub timeout: u64,

    /// Release deadline installed on the arbiter in milliseconds
    #[arg(long, default_value_t = 200)]
    pub release_timeout: u64,

    /// Which subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands for the smoketest runner.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Same-service grant without a hand-off
    #[command(name = "fast-path")]
    FastPath,

    /// Cross-service hand-off completed by a voluntary release
    Handoff,

    /// Hand-off forced through by the release deadline
    #[command(name = "handoff-timeout")]
    HandoffTimeout,

    /// Focus-call recomputation across call-state changes
    Refocus,

    /// Focused-service death clears the focus pair
    Death,

    /// Stale release acknowledgments are ignored
    #[command(name = "stale-release")]
    StaleRelease,

    /// Run every scenario in order
    All,
}

impl Commands {
    /// Registry name selected by this command, or `None` for the full suite.
    pub fn selection(&self) -> Option<&'static str> {
        match self {
            Self::FastPath => Some("fast-path"),
            Self::Handoff => Some("handoff"),
            Self::HandoffTimeout => Some("handoff-timeout"),
            Self::Refocus => Some("refocus"),
            Self::Death => Some("death"),
            Self::StaleRelease => Some("stale-release"),
            Self::All => None,
        }
    }
}
