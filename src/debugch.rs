//! The closed set of debug channels `-d <name>` may enable.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugChannel {
    Binding,
    Include,
    Targets,
    Depends,
    Exports,
    Env,
    Threads,
    Verbose,
    Needed,
    Context,
    Locate,
    Cause,
    Commands,
    Phases,
    Warning,
    Error,
    Debug,
    Times,
}

impl FromStr for DebugChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "binding" => DebugChannel::Binding,
            "include" => DebugChannel::Include,
            "targets" => DebugChannel::Targets,
            "depends" => DebugChannel::Depends,
            "exports" => DebugChannel::Exports,
            "env" => DebugChannel::Env,
            "threads" => DebugChannel::Threads,
            "verbose" => DebugChannel::Verbose,
            "needed" => DebugChannel::Needed,
            "context" => DebugChannel::Context,
            "locate" => DebugChannel::Locate,
            "cause" => DebugChannel::Cause,
            "commands" => DebugChannel::Commands,
            "phases" => DebugChannel::Phases,
            "warning" => DebugChannel::Warning,
            "error" => DebugChannel::Error,
            "debug" => DebugChannel::Debug,
            "times" => DebugChannel::Times,
            other => return Err(format!("unknown debug channel `{other}`")),
        })
    }
}

impl DebugChannel {
    pub fn name(self) -> &'static str {
        match self {
            DebugChannel::Binding => "binding",
            DebugChannel::Include => "include",
            DebugChannel::Targets => "targets",
            DebugChannel::Depends => "depends",
            DebugChannel::Exports => "exports",
            DebugChannel::Env => "env",
            DebugChannel::Threads => "threads",
            DebugChannel::Verbose => "verbose",
            DebugChannel::Needed => "needed",
            DebugChannel::Context => "context",
            DebugChannel::Locate => "locate",
            DebugChannel::Cause => "cause",
            DebugChannel::Commands => "commands",
            DebugChannel::Phases => "phases",
            DebugChannel::Warning => "warning",
            DebugChannel::Error => "error",
            DebugChannel::Debug => "debug",
            DebugChannel::Times => "times",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_channel_name() {
        for name in [
            "binding", "include", "targets", "depends", "exports", "env", "threads", "verbose",
            "needed", "context", "locate", "cause", "commands", "phases", "warning", "error",
            "debug", "times",
        ] {
            let ch: DebugChannel = name.parse().unwrap();
            assert_eq!(ch.name(), name);
        }
    }

    #[test]
    fn rejects_unknown_channel() {
        assert!("nonexistent".parse::<DebugChannel>().is_err());
    }
}
