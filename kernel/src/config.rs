//! Boot-time configuration
//!
//! The scheduling policy is chosen on the kernel command line and fixed for
//! the lifetime of the scheduler.

use log::info;

use crate::error::{KernelError, KernelResult};

/// Scheduling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    /// Strict priority with donation
    #[default]
    Priority,
    /// Multi-level feedback queue; priorities are computed
    Mlfqs,
}

/// Default number of thread control blocks.
pub const DEFAULT_MAX_THREADS: usize = 64;

/// Default time slice, in ticks.
pub const DEFAULT_TIME_SLICE: u32 = 4;

/// Default timer frequency, in ticks per second.
pub const DEFAULT_TIMER_FREQ: u64 = 100;

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    pub policy: SchedPolicy,
    /// Capacity of the thread page pool, including `main` and `idle`
    pub max_threads: usize,
    /// Ticks a thread may run before it must yield
    pub time_slice: u32,
    /// Timer interrupts per second
    pub timer_freq: u64,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            policy: SchedPolicy::Priority,
            max_threads: DEFAULT_MAX_THREADS,
            time_slice: DEFAULT_TIME_SLICE,
            timer_freq: DEFAULT_TIMER_FREQ,
        }
    }
}

impl SchedConfig {
    /// Check the values the scheduler relies on.
    pub fn validate(&self) -> KernelResult<()> {
        if self.max_threads < 2 {
            return Err(KernelError::InvalidArgument {
                name: "max_threads",
                value: "must leave room for main and idle",
            });
        }
        if self.time_slice == 0 {
            return Err(KernelError::InvalidArgument {
                name: "time_slice",
                value: "must be at least one tick",
            });
        }
        if !(19..=1000).contains(&self.timer_freq) {
            return Err(KernelError::InvalidArgument {
                name: "timer_freq",
                value: "must be between 19 and 1000 Hz",
            });
        }
        Ok(())
    }
}

/// What to do once the initial workload finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownAction {
    #[default]
    None,
    PowerOff,
    Reboot,
}

/// Options taken from the kernel command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootOptions {
    pub policy: SchedPolicy,
    pub shutdown: ShutdownAction,
    /// Print usage and stop
    pub help: bool,
}

impl BootOptions {
    /// Parse whitespace-separated options.
    ///
    /// Recognized: `-o mlfqs`, `-q` (power off when done), `-r` (reboot
    /// when done), `-h` (help).
    pub fn parse(cmdline: &str) -> KernelResult<Self> {
        let mut opts = Self::default();
        let mut args = cmdline.split_whitespace();
        while let Some(arg) = args.next() {
            match arg {
                "-o" => match args.next() {
                    Some("mlfqs") => opts.policy = SchedPolicy::Mlfqs,
                    Some(_) => {
                        return Err(KernelError::InvalidArgument {
                            name: "-o",
                            value: "unknown option value",
                        })
                    }
                    None => {
                        return Err(KernelError::InvalidArgument {
                            name: "-o",
                            value: "missing option value",
                        })
                    }
                },
                "-q" => opts.shutdown = ShutdownAction::PowerOff,
                "-r" => opts.shutdown = ShutdownAction::Reboot,
                "-h" => opts.help = true,
                _ => {
                    return Err(KernelError::InvalidArgument {
                        name: "cmdline",
                        value: "unknown option",
                    })
                }
            }
        }
        info!("[BOOT] options: {:?}", opts);
        Ok(opts)
    }

    /// Scheduler configuration for these options.
    pub fn sched_config(&self) -> SchedConfig {
        SchedConfig {
            policy: self.policy,
            ..SchedConfig::default()
        }
    }
}

/// Usage text for `-h`.
pub const USAGE: &str = "\
Options:
  -h          Print this help message and power off.
  -q          Power off after running the initial workload.
  -r          Reboot after running the initial workload.
  -o mlfqs    Use the multi-level feedback queue scheduler.
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = BootOptions::parse("").unwrap();
        assert_eq!(opts.policy, SchedPolicy::Priority);
        assert_eq!(opts.shutdown, ShutdownAction::None);
        assert!(!opts.help);
        assert_eq!(opts.sched_config(), SchedConfig::default());
    }

    #[test]
    fn test_parse_options() {
        let opts = BootOptions::parse("-q  -o mlfqs").unwrap();
        assert_eq!(opts.policy, SchedPolicy::Mlfqs);
        assert_eq!(opts.shutdown, ShutdownAction::PowerOff);
        assert_eq!(opts.sched_config().policy, SchedPolicy::Mlfqs);

        let opts = BootOptions::parse("-r -h").unwrap();
        assert_eq!(opts.shutdown, ShutdownAction::Reboot);
        assert!(opts.help);
    }

    #[test]
    fn test_parse_errors() {
        assert!(BootOptions::parse("-x").is_err());
        assert!(BootOptions::parse("-o").is_err());
        assert!(BootOptions::parse("-o fifo").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(SchedConfig::default().validate().is_ok());
        let bad = [
            SchedConfig {
                max_threads: 1,
                ..SchedConfig::default()
            },
            SchedConfig {
                time_slice: 0,
                ..SchedConfig::default()
            },
            SchedConfig {
                timer_freq: 10,
                ..SchedConfig::default()
            },
            SchedConfig {
                timer_freq: 5000,
                ..SchedConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(KernelError::InvalidArgument { .. })),
                "{:?} should be rejected",
                config
            );
        }
    }
}
