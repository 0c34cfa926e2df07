//! # Command-Line Interface
//!
//! Argument parsing for the `bridge-demo` binary: a `clap` derive API with
//! the handful of flags a worker-pool demo actually needs.
//!
//! ## Usage Examples
//!
//! ```bash
//! # Run the default scenario set against a 4-slot pool
//! bridge-demo --pool-size 4
//!
//! # Run only the callback demo, with debug logging
//! bridge-demo --scenario callback -vv
//! ```

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, ValueEnum,
};
use std::path::PathBuf;

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// worker-bridge demo - exercises the pool, marshaling, and callback
/// machinery against a handful of canned worker procedures.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Maximum number of concurrent worker slots
    #[arg(short = 'p', long, default_value_t = crate::defaults::POOL_SIZE)]
    pub pool_size: usize,

    /// Which demo scenario(s) to run
    #[arg(short = 's', value_enum, default_values_t = vec![Scenario::All], num_args = 1..)]
    pub scenarios: Vec<Scenario>,

    /// Opt into the CallbackError wire extension instead of the default
    /// silent-leak behavior for a failed callback
    #[arg(long)]
    pub callback_errors: bool,

    /// Log file directory (diagnostic logs are always written to a daily
    /// rolling file here in addition to stderr)
    #[arg(long, default_value = crate::defaults::LOG_DIR)]
    pub log_dir: PathBuf,

    /// Silence user-facing informational output on stdout
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity on stderr.
    ///
    /// Can be used multiple times to increase detail:
    ///  -v: info
    ///  -vv: debug
    ///  -vvv: trace
    /// By default, only WARNING and ERROR messages are shown.
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,
}

/// Which canned demo scenario(s) to exercise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Marshal and unmarshal a flat numeric argument list.
    #[value(name = "add")]
    Add,
    /// Pass a callback as an argument and have the worker invoke it.
    #[value(name = "callback")]
    Callback,
    /// Trigger a procedure that raises an error.
    #[value(name = "error")]
    Error,
    /// Pass a raw byte buffer through the bridge.
    #[value(name = "transfer")]
    Transfer,
    /// Pass a nested record/sequence argument tree.
    #[value(name = "nested")]
    Nested,
    /// Run every scenario above in order.
    #[value(name = "all")]
    All,
}

impl Scenario {
    /// Expand `All` into the concrete scenario list, in a fixed,
    /// deterministic order so demo output reads the same on every run.
    pub fn expand_all(scenarios: Vec<Scenario>) -> Vec<Scenario> {
        if scenarios.contains(&Scenario::All) {
            vec![
                Scenario::Add,
                Scenario::Callback,
                Scenario::Error,
                Scenario::Transfer,
                Scenario::Nested,
            ]
        } else {
            scenarios
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scenario::Add => write!(f, "add"),
            Scenario::Callback => write!(f, "callback"),
            Scenario::Error => write!(f, "error"),
            Scenario::Transfer => write!(f, "transfer"),
            Scenario::Nested => write!(f, "nested"),
            Scenario::All => write!(f, "all"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_all_returns_every_concrete_scenario_in_order() {
        let expanded = Scenario::expand_all(vec![Scenario::All]);
        assert_eq!(
            expanded,
            vec![
                Scenario::Add,
                Scenario::Callback,
                Scenario::Error,
                Scenario::Transfer,
                Scenario::Nested,
            ]
        );
    }

    #[test]
    fn expand_all_leaves_a_concrete_list_unchanged() {
        let expanded = Scenario::expand_all(vec![Scenario::Add, Scenario::Callback]);
        assert_eq!(expanded, vec![Scenario::Add, Scenario::Callback]);
    }
}
