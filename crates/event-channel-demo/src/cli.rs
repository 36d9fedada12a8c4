//! Command-line interface definition using clap.

use clap::Parser;
use event_channel::{ChannelConfig, DispatchMode, IdlePolicy};

/// Event channel walkthrough
#[derive(Parser, Debug)]
#[command(name = "event-channel-demo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// How handlers of one event are invoked
    #[arg(short, long, value_enum, default_value = "sequential")]
    pub dispatch: DispatchArg,

    /// What happens to events sent while the channel is stopped
    #[arg(short, long, value_enum, default_value = "keep-events")]
    pub idle: IdleArg,

    /// Pause between steps, in milliseconds
    #[arg(short, long, default_value_t = 200)]
    pub pause_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DispatchArg {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum IdleArg {
    #[default]
    KeepEvents,
    DropEvents,
}

impl From<DispatchArg> for DispatchMode {
    fn from(arg: DispatchArg) -> Self {
        match arg {
            DispatchArg::Sequential => DispatchMode::Sequential,
            DispatchArg::Parallel => DispatchMode::Parallel,
        }
    }
}

impl From<IdleArg> for IdlePolicy {
    fn from(arg: IdleArg) -> Self {
        match arg {
            IdleArg::KeepEvents => IdlePolicy::KeepEvents,
            IdleArg::DropEvents => IdlePolicy::DropEvents,
        }
    }
}

impl Cli {
    /// Returns the log level based on verbosity.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }

    /// Channel configuration selected on the command line.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new()
            .with_dispatch(self.dispatch.into())
            .with_idle_policy(self.idle.into())
    }
}
