//! Command Builder: turns templates into jobs and applies the dry-run policy
//!
//! Commands are argument vectors, never shell strings. A template's `{1}` and
//! `{2}` placeholders are substituted inside individual arguments, so a path
//! containing spaces or `;` stays one argument.
//!
//! Every job is announced to the client before anything happens:
//! `(dry-run) /bin/rm -Rf /data` or `(execute) /bin/rm -Rf /data`.

use crate::error::{KaboomError, Result};
use crate::launcher::Launcher;
use crate::reporter::Reporter;
use crate::host::Pid;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// A program plus argument templates
#[derive(Debug, Clone, Copy)]
pub struct CommandTemplate {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

/// Recursively delete a directory
pub const RM_RF: CommandTemplate = CommandTemplate {
    program: "/bin/rm",
    args: &["-Rf", "{1}"],
};

/// Stream zeroes into a filler file until the filesystem is full
pub const FILL_DIRECTORY: CommandTemplate = CommandTemplate {
    program: "/bin/dd",
    args: &["if=/dev/zero", "of={1}/pg_kaboom.fill", "bs=1M"],
};

impl CommandTemplate {
    pub fn substitute(&self, arg1: &str, arg2: Option<&str>) -> CommandLine {
        let args = self
            .args
            .iter()
            .map(|a| a.replace("{1}", arg1).replace("{2}", arg2.unwrap_or("")))
            .collect();
        CommandLine {
            program: PathBuf::from(self.program),
            args,
        }
    }
}

/// A fully substituted command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A signal number valid on this platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal(i32);

impl Signal {
    pub const SIGKILL: Signal = Signal(9);
    pub const SIGSEGV: Signal = Signal(11);

    /// `None` unless the platform knows the signal
    pub fn from_number(number: i64) -> Option<Signal> {
        let number = i32::try_from(number).ok()?;
        signal_name(number).map(|_| Signal(number))
    }

    pub fn number(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match signal_name(self.0) {
            Some(name) => f.write_str(name),
            None => write!(f, "signal {}", self.0),
        }
    }
}

#[cfg(unix)]
fn signal_name(number: i32) -> Option<&'static str> {
    nix::sys::signal::Signal::try_from(number)
        .ok()
        .map(|sig| sig.as_str())
}

#[cfg(not(unix))]
fn signal_name(_number: i32) -> Option<&'static str> {
    None
}

/// One unit of work inside a job
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Exec(CommandLine),
    /// Send `signal` to another process
    Signal { pid: Pid, signal: Signal },
    Sleep(Duration),
    /// Deliver `signal` to the current process with its default disposition
    Raise(Signal),
    /// Allocate until the allocator gives up
    ExhaustMemory,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Exec(cmd) => write!(f, "{}", cmd),
            Step::Signal { pid, signal } => write!(f, "kill -{} {}", signal.number(), pid),
            Step::Sleep(d) => write!(f, "sleep {}", d.as_secs_f64()),
            Step::Raise(signal) => write!(f, "raise {}", signal),
            Step::ExhaustMemory => f.write_str("allocate memory until exhausted"),
        }
    }
}

/// Ordered steps, announced as one command line
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    steps: Vec<Step>,
}

impl Job {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl From<Step> for Job {
    fn from(step: Step) -> Self {
        Job::new(vec![step])
    }
}

impl From<CommandLine> for Job {
    fn from(cmd: CommandLine) -> Self {
        Job::new(vec![Step::Exec(cmd)])
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run in the calling process and wait for it
    Foreground,
    /// Must outlive the caller and the server process itself
    Detached,
}

/// Applies the execute flag to jobs and side effects
pub struct Executor<'a> {
    launcher: &'a dyn Launcher,
    reporter: &'a mut dyn Reporter,
    execute: bool,
}

impl<'a> Executor<'a> {
    pub fn new(launcher: &'a dyn Launcher, reporter: &'a mut dyn Reporter, execute: bool) -> Self {
        Self {
            launcher,
            reporter,
            execute,
        }
    }

    pub fn is_live(&self) -> bool {
        self.execute
    }

    pub fn notice(&mut self, message: &str) {
        self.reporter.on_notice(message, None);
    }

    /// Announce a side effect; returns whether it should actually happen
    pub fn announce(&mut self, what: &str) -> bool {
        let prefix = if self.execute { "(execute)" } else { "(dry-run)" };
        self.reporter.on_notice(&format!("{} {}", prefix, what), None);
        self.execute
    }

    /// Substitute `arg1` (an absolute path) and `arg2` into `template` and run it
    pub fn build_and_run(
        &mut self,
        template: &CommandTemplate,
        arg1: &Path,
        arg2: Option<&str>,
        mode: Mode,
    ) -> Result<()> {
        require_absolute(arg1)?;
        let cmd = template.substitute(&arg1.to_string_lossy(), arg2);
        self.run(&cmd.into(), mode)
    }

    /// Announce `job` and, when executing, hand it to the launcher.
    ///
    /// Exit statuses are never inspected.
    pub fn run(&mut self, job: &Job, mode: Mode) -> Result<()> {
        if !self.announce(&job.to_string()) {
            return Ok(());
        }

        tracing::info!(job = %job, ?mode, "running job");
        match mode {
            Mode::Foreground => self.launcher.run(job),
            Mode::Detached => self.launcher.detach(job),
        }
    }
}

fn require_absolute(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(KaboomError::invalid("path must not be empty"));
    }
    if !path.is_absolute() {
        return Err(KaboomError::InvalidArgument {
            message: format!("path '{}' is not absolute", path.display()),
            hint: Some("weapons only accept absolute paths".to_string()),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::RecordingLauncher;
    use crate::reporter::MemoryReporter;

    #[test]
    fn test_substitute_keeps_arguments_separate() {
        let cmd = RM_RF.substitute("/data/with space;rm", None);
        assert_eq!(cmd.args, vec!["-Rf", "/data/with space;rm"]);
    }

    #[test]
    fn test_fill_template_renders() {
        let cmd = FILL_DIRECTORY.substitute("/data/pg_wal", None);
        assert_eq!(
            cmd.to_string(),
            "/bin/dd if=/dev/zero of=/data/pg_wal/pg_kaboom.fill bs=1M"
        );
    }

    #[test]
    fn test_second_placeholder() {
        const COPY: CommandTemplate = CommandTemplate {
            program: "/bin/cp",
            args: &["{1}", "{2}"],
        };
        let cmd = COPY.substitute("/a", Some("/b"));
        assert_eq!(cmd.to_string(), "/bin/cp /a /b");
    }

    #[test]
    fn test_job_display_joins_steps() {
        let job = Job::new(vec![
            Step::Signal {
                pid: Pid::from_raw(4242),
                signal: Signal::SIGKILL,
            },
            Step::Sleep(Duration::from_secs(1)),
            Step::Exec(CommandLine::new("/usr/bin/pg_ctl", &["start"])),
        ]);
        assert_eq!(job.to_string(), "kill -9 4242; sleep 1; /usr/bin/pg_ctl start");
    }

    #[test]
    #[cfg(unix)]
    fn test_signal_numbers_validated() {
        assert_eq!(Signal::from_number(15).map(Signal::number), Some(15));
        assert_eq!(Signal::from_number(9), Some(Signal::SIGKILL));
        assert_eq!(Signal::from_number(999), None);
        assert_eq!(Signal::from_number(-1), None);
        assert_eq!(Signal::SIGSEGV.to_string(), "SIGSEGV");
    }

    #[test]
    fn test_dry_run_announces_but_never_launches() {
        let launcher = RecordingLauncher::new();
        let mut reporter = MemoryReporter::new();
        {
            let mut executor = Executor::new(&launcher, &mut reporter, false);
            executor
                .build_and_run(&RM_RF, Path::new("/data"), None, Mode::Foreground)
                .unwrap();
        }
        assert!(launcher.launched().is_empty());
        assert_eq!(reporter.messages(), vec!["(dry-run) /bin/rm -Rf /data"]);
    }

    #[test]
    fn test_execute_launches_in_requested_mode() {
        let launcher = RecordingLauncher::new();
        let mut reporter = MemoryReporter::new();
        {
            let mut executor = Executor::new(&launcher, &mut reporter, true);
            executor
                .run(&Step::Raise(Signal::SIGSEGV).into(), Mode::Detached)
                .unwrap();
        }
        assert_eq!(
            launcher.launched(),
            vec![("raise SIGSEGV".to_string(), Mode::Detached)]
        );
        assert_eq!(reporter.messages(), vec!["(execute) raise SIGSEGV"]);
    }

    #[test]
    fn test_relative_and_empty_paths_rejected() {
        let launcher = RecordingLauncher::new();
        let mut reporter = MemoryReporter::new();
        let mut executor = Executor::new(&launcher, &mut reporter, true);

        let err = executor
            .build_and_run(&RM_RF, Path::new("data"), None, Mode::Foreground)
            .unwrap_err();
        assert!(matches!(err, KaboomError::InvalidArgument { .. }));

        let err = executor
            .build_and_run(&RM_RF, Path::new(""), None, Mode::Foreground)
            .unwrap_err();
        assert!(matches!(err, KaboomError::InvalidArgument { .. }));
        drop(executor);
        assert!(launcher.launched().is_empty());
        assert!(reporter.notices.is_empty());
    }
}
