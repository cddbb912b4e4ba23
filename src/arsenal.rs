//! Weapon Registry & Dispatcher
//!
//! ## Architecture
//!
//! - `ARSENAL` is a fixed table of [`Arm`]s: name, [`Weapon`] discriminant,
//!   optional fixed parameter, description. One weapon may back several
//!   names and tell them apart by parameter (`Fill`, `Special`).
//! - [`Kaboom::kaboom`] runs the safety gate, looks the name up
//!   case-insensitively (first match wins) and fires the arm.
//! - An unknown name is not an error: the caller gets a notice listing every
//!   weapon and a `false` return, so exploring the arsenal never aborts.

use crate::command::{Executor, Mode, Signal, Step, RM_RF};
use crate::config::Settings;
use crate::disk;
use crate::error::{KaboomError, Result};
use crate::host::{BackendType, Host};
use crate::launcher::Launcher;
use crate::paths::DataDirectory;
use crate::payload::Payload;
use crate::reporter::Reporter;
use crate::restart;
use crate::safety;
use crate::statement::quote_literal;
use crate::target;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::path::Path;

/// archive_command installed by `break-archive` unless the payload names one
pub const DEFAULT_BAD_ARCHIVE_COMMAND: &str = "/bin/false";

/// Lowest autovacuum_freeze_max_age the server accepts
pub const DEFAULT_FREEZE_MAX_AGE: i64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weapon {
    BreakArchive,
    /// Fill the data directory, or the subdirectory named by the parameter
    Fill,
    FillLog,
    Mem,
    Restart,
    RmPgData,
    Segfault,
    Signal,
    XactWrap,
    /// Meta weapons; the parameter selects `random` or `null`
    Special,
}

#[derive(Debug, Clone, Copy)]
pub struct Arm {
    pub name: &'static str,
    pub weapon: Weapon,
    pub param: Option<&'static str>,
    pub description: &'static str,
}

pub static ARSENAL: &[Arm] = &[
    Arm {
        name: "break-archive",
        weapon: Weapon::BreakArchive,
        param: None,
        description: "Force archive_command to fail and restart (payload: archive_command)",
    },
    Arm {
        name: "fill-log",
        weapon: Weapon::FillLog,
        param: None,
        description: "Fill the log directory until the disk is full",
    },
    Arm {
        name: "fill-pgdata",
        weapon: Weapon::Fill,
        param: None,
        description: "Fill the data directory until the disk is full",
    },
    Arm {
        name: "fill-pgwal",
        weapon: Weapon::Fill,
        param: Some("pg_wal"),
        description: "Fill the WAL directory until the disk is full",
    },
    Arm {
        name: "mem",
        weapon: Weapon::Mem,
        param: None,
        description: "Allocate memory until the process is killed",
    },
    Arm {
        name: "null",
        weapon: Weapon::Special,
        param: Some("null"),
        description: "Do nothing",
    },
    Arm {
        name: "random",
        weapon: Weapon::Special,
        param: Some("random"),
        description: "Fire a randomly chosen weapon",
    },
    Arm {
        name: "restart",
        weapon: Weapon::Restart,
        param: None,
        description: "Kill the server and start it again with pg_ctl",
    },
    Arm {
        name: "rm-pgdata",
        weapon: Weapon::RmPgData,
        param: None,
        description: "Remove the data directory recursively",
    },
    Arm {
        name: "segfault",
        weapon: Weapon::Segfault,
        param: None,
        description: "Crash the current process with SIGSEGV",
    },
    Arm {
        name: "signal",
        weapon: Weapon::Signal,
        param: None,
        description: "Send a signal to the postmaster or a random process (payload: signal, target)",
    },
    Arm {
        name: "xact-wrap",
        weapon: Weapon::XactWrap,
        param: None,
        description: "Force an aggressive wraparound threshold and restart (payload: max_age)",
    },
];

/// `(name, description)` for every weapon, in registration order
pub fn arsenal() -> impl Iterator<Item = (&'static str, &'static str)> {
    ARSENAL.iter().map(|arm| (arm.name, arm.description))
}

/// Case-insensitive lookup; the first match wins
pub fn lookup(name: &str) -> Option<&'static Arm> {
    ARSENAL.iter().find(|arm| arm.name.eq_ignore_ascii_case(name))
}

/// `must be one of 'a', 'b', or 'c'`
pub fn one_of<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = names.into_iter().map(|n| format!("'{}'", n)).collect();
    let list = match quoted.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{} or {}", first, second),
        [rest @ .., last] => format!("{}, or {}", rest.join(", "), last),
    };
    format!("must be one of {}", list)
}

/// Entry point holding the host and the cached data directory
pub struct Kaboom<'a> {
    host: &'a dyn Host,
    launcher: &'a dyn Launcher,
    data_dir: DataDirectory,
}

impl<'a> Kaboom<'a> {
    pub fn new(host: &'a dyn Host, launcher: &'a dyn Launcher) -> Self {
        Self {
            host,
            launcher,
            data_dir: DataDirectory::new(),
        }
    }

    /// Fire the weapon called `operation`.
    ///
    /// Returns `Ok(false)` when no weapon has that name.
    pub fn kaboom(
        &self,
        settings: &mut Settings,
        reporter: &mut dyn Reporter,
        operation: &str,
        payload: Option<Value>,
    ) -> Result<bool> {
        safety::validate(self.host, settings)?;

        let Some(arm) = lookup(operation) else {
            reporter.on_notice(
                &format!("unrecognized operation: '{}'", operation),
                Some(one_of(ARSENAL.iter().map(|arm| arm.name)).as_str()),
            );
            return Ok(false);
        };
        let payload = Payload::new(payload)?;

        tracing::info!(weapon = arm.name, execute = settings.execute, "firing");
        let execute = settings.execute;
        let mut armory = Armory {
            host: self.host,
            data_dir: &self.data_dir,
            settings,
            executor: Executor::new(self.launcher, reporter, execute),
        };
        armory.fire(arm, &payload)?;
        Ok(true)
    }
}

/// Everything one dispatch needs
struct Armory<'k, 'r> {
    host: &'k dyn Host,
    data_dir: &'k DataDirectory,
    settings: &'r mut Settings,
    executor: Executor<'r>,
}

impl Armory<'_, '_> {
    fn fire(&mut self, arm: &Arm, payload: &Payload) -> Result<()> {
        match arm.weapon {
            Weapon::BreakArchive => self.break_archive(payload),
            Weapon::Fill => {
                let dir = self.data_dir.resolve(self.host)?;
                disk::fill(&mut self.executor, dir, arm.param)
            }
            Weapon::FillLog => self.fill_log(),
            Weapon::Mem => self.fault(Step::ExhaustMemory, Signal::SIGKILL),
            Weapon::Restart => {
                let dir = self.data_dir.resolve(self.host)?;
                restart::restart(self.host, &mut self.executor, dir)
            }
            Weapon::RmPgData => {
                let dir = self.data_dir.resolve(self.host)?;
                self.executor.build_and_run(&RM_RF, dir, None, Mode::Foreground)
            }
            Weapon::Segfault => self.fault(Step::Raise(Signal::SIGSEGV), Signal::SIGSEGV),
            Weapon::Signal => self.signal(payload),
            Weapon::XactWrap => self.xact_wrap(payload),
            Weapon::Special => self.special(arm, payload),
        }
    }

    fn break_archive(&mut self, payload: &Payload) -> Result<()> {
        let dir = self.data_dir.resolve(self.host)?;

        // Kept for manual restoration; nothing restores it automatically
        let previous = self.host.config_option("archive_command").unwrap_or_default();
        if self.executor.announce(&format!(
            "save archive_command '{}' in pg_kaboom.saved_archive_command",
            previous
        )) {
            self.settings.saved_archive_command = previous;
        }

        let command = payload
            .str("archive_command")
            .unwrap_or(DEFAULT_BAD_ARCHIVE_COMMAND);
        restart::force_settings_and_restart(
            self.host,
            &mut self.executor,
            dir,
            &["archive_mode", "archive_command"],
            &[quote_literal("on"), quote_literal(command)],
        )
    }

    fn fill_log(&mut self) -> Result<()> {
        let dir = self.data_dir.resolve(self.host)?;
        let log_directory = self
            .host
            .config_option("log_directory")
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "log".to_string());

        if Path::new(&log_directory).is_absolute() {
            disk::fill(&mut self.executor, Path::new(&log_directory), None)
        } else {
            disk::fill(&mut self.executor, dir, Some(&log_directory))
        }
    }

    fn xact_wrap(&mut self, payload: &Payload) -> Result<()> {
        let dir = self.data_dir.resolve(self.host)?;
        let max_age = payload.int("max_age").unwrap_or(DEFAULT_FREEZE_MAX_AGE);
        if max_age <= 0 {
            return Err(KaboomError::invalid(format!("max_age must be positive, got {}", max_age)));
        }
        restart::force_settings_and_restart(
            self.host,
            &mut self.executor,
            dir,
            &["autovacuum", "autovacuum_freeze_max_age"],
            &["on".to_string(), max_age.to_string()],
        )
    }

    /// In-process fault when running inside the server. Otherwise a random
    /// client backend gets `signal`, which the server handles like a crash
    /// of that backend (SIGKILL is what the OOM killer sends).
    fn fault(&mut self, in_process: Step, signal: Signal) -> Result<()> {
        if self.host.in_server() {
            return self.executor.run(&in_process.into(), Mode::Foreground);
        }

        let victim = target::find_random_target(
            &self.host.backends(),
            BackendType::Backend,
            self.host.my_pid(),
            &mut rand::thread_rng(),
        );
        match victim {
            Some(pid) => self
                .executor
                .run(&Step::Signal { pid, signal }.into(), Mode::Foreground),
            None => {
                self.executor
                    .notice(&format!("no live {} process to crash", BackendType::Backend));
                Ok(())
            }
        }
    }

    fn signal(&mut self, payload: &Payload) -> Result<()> {
        let signo = payload
            .int("signal")
            .unwrap_or_else(|| i64::from(Signal::SIGKILL.number()));
        let signal = Signal::from_number(signo)
            .ok_or_else(|| KaboomError::InvalidArgument {
                message: format!("invalid signal number {}", signo),
                hint: Some("see kill -l".to_string()),
            })?;

        let target = payload.str("target").unwrap_or("postmaster");
        let pid = if target.eq_ignore_ascii_case("postmaster") {
            self.host
                .postmaster_pid()
                .ok_or_else(|| KaboomError::ConfigurationMissing("postmaster pid".to_string()))?
        } else {
            let category = target::parse_category(target)?;
            let found = target::find_random_target(
                &self.host.backends(),
                category,
                self.host.my_pid(),
                &mut rand::thread_rng(),
            );
            match found {
                Some(pid) => pid,
                None => {
                    self.executor
                        .notice(&format!("no live {} process to signal", category));
                    return Ok(());
                }
            }
        };

        self.executor
            .run(&Step::Signal { pid, signal }.into(), Mode::Foreground)
    }

    fn special(&mut self, arm: &Arm, payload: &Payload) -> Result<()> {
        match arm.param {
            Some("random") => {
                let candidates: Vec<&Arm> = ARSENAL
                    .iter()
                    .filter(|a| a.weapon != Weapon::Special)
                    .collect();
                let Some(choice) = candidates.choose(&mut rand::thread_rng()) else {
                    return Ok(());
                };
                tracing::info!(weapon = choice.name, "random weapon selected");
                self.executor
                    .notice(&format!("random weapon selected: '{}'", choice.name));
                self.fire(choice, payload)
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
