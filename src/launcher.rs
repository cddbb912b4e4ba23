//! Launching jobs, in the foreground or detached from the caller's lifetime
//!
//! ## Detaching
//!
//! A restart job kills the very server that issued it, so the process
//! running the job must not be a child of anything it kills:
//!
//! 1. fork; the child becomes a session leader (`setsid`)
//! 2. fork again; the intermediate child exits at once
//! 3. the grandchild, reparented to init, runs the steps and `_exit`s
//!
//! The caller only reaps the intermediate child and returns immediately.

use crate::command::{Job, Mode};
use crate::error::Result;
use std::sync::Mutex;

pub trait Launcher {
    /// Run `job` in the calling process, returning when it completes
    fn run(&self, job: &Job) -> Result<()>;

    /// Start `job` in a process that survives the caller
    fn detach(&self, job: &Job) -> Result<()>;
}

/// Real launcher built on fork/exec
#[derive(Debug, Default)]
pub struct ProcessLauncher;

#[cfg(not(unix))]
impl Launcher for ProcessLauncher {
    fn run(&self, _job: &Job) -> Result<()> {
        Err(crate::error::KaboomError::PlatformUnsupported)
    }

    fn detach(&self, _job: &Job) -> Result<()> {
        Err(crate::error::KaboomError::PlatformUnsupported)
    }
}

#[cfg(unix)]
mod unix {
    use super::{Launcher, ProcessLauncher};
    use crate::command::{Job, Signal, Step};
    use crate::error::Result;
    use nix::sys::signal::{self as nix_signal, kill, raise, SigHandler};
    use nix::sys::wait::waitpid;
    use nix::unistd::{fork, setsid, ForkResult, Pid};
    use std::os::unix::process::CommandExt;
    use std::process::Stdio;
    use std::thread;

    /// Allocation unit for `Step::ExhaustMemory`
    const MEMORY_CHUNK: usize = 64 * 1024 * 1024;

    impl Launcher for ProcessLauncher {
        fn run(&self, job: &Job) -> Result<()> {
            for step in job.steps() {
                perform(step)?;
            }
            Ok(())
        }

        fn detach(&self, job: &Job) -> Result<()> {
            match unsafe { fork() }? {
                ForkResult::Parent { child } => {
                    // ECHILD when the host ignores SIGCHLD; nothing to reap then
                    if let Err(e) = waitpid(child, None) {
                        tracing::debug!(%child, error = %e, "waitpid on intermediate child");
                    }
                    tracing::info!(%child, "detached job launched");
                    Ok(())
                }
                ForkResult::Child => {
                    if setsid().is_err() {
                        unsafe { libc::_exit(1) };
                    }
                    match unsafe { fork() } {
                        Ok(ForkResult::Parent { .. }) => unsafe { libc::_exit(0) },
                        Ok(ForkResult::Child) => {
                            run_detached(job);
                            unsafe { libc::_exit(0) }
                        }
                        Err(_) => unsafe { libc::_exit(1) },
                    }
                }
            }
        }
    }

    /// Grandchild body. Errors have nowhere to go but the log.
    fn run_detached(job: &Job) {
        // Children of a detached job must be waitable
        unsafe { nix_signal::signal(nix_signal::Signal::SIGCHLD, SigHandler::SigDfl) }.ok();

        let steps = job.steps();
        for (i, step) in steps.iter().enumerate() {
            let last = i + 1 == steps.len();
            match step {
                Step::Exec(cmd) if last => {
                    let err = cmd
                        .to_command()
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .exec();
                    tracing::error!(command = %cmd, error = %err, "exec failed in detached job");
                }
                _ => {
                    if let Err(e) = perform(step) {
                        tracing::warn!(step = %step, error = %e, "detached step failed");
                    }
                }
            }
        }
    }

    fn native(sig: Signal) -> Result<nix_signal::Signal> {
        Ok(nix_signal::Signal::try_from(sig.number())?)
    }

    fn perform(step: &Step) -> Result<()> {
        match step {
            Step::Exec(cmd) => match cmd.to_command().status() {
                Ok(status) => tracing::debug!(command = %cmd, %status, "command finished"),
                Err(e) => tracing::error!(command = %cmd, error = %e, "failed to start command"),
            },
            Step::Signal { pid, signal } => kill(Pid::from_raw(pid.as_raw()), native(*signal)?)?,
            Step::Sleep(duration) => thread::sleep(*duration),
            Step::Raise(sig) => {
                let sig = native(*sig)?;
                // Handlers installed by the runtime would swallow a raised SIGSEGV
                unsafe { nix_signal::signal(sig, SigHandler::SigDfl) }?;
                raise(sig)?;
            }
            Step::ExhaustMemory => exhaust_memory(),
        }
        Ok(())
    }

    fn exhaust_memory() -> ! {
        let mut hoard: Vec<Vec<u8>> = Vec::new();
        loop {
            // Filled buffers so every page is really touched
            hoard.push(vec![0xA5; MEMORY_CHUNK]);
            std::hint::black_box(&hoard);
        }
    }
}

/// Records jobs instead of running them
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<(String, Mode)>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered jobs with the mode they were launched in
    pub fn launched(&self) -> Vec<(String, Mode)> {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, job: &Job, mode: Mode) {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((job.to_string(), mode));
    }
}

impl Launcher for RecordingLauncher {
    fn run(&self, job: &Job) -> Result<()> {
        self.record(job, Mode::Foreground);
        Ok(())
    }

    fn detach(&self, job: &Job) -> Result<()> {
        self.record(job, Mode::Detached);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::{CommandLine, Step};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn test_foreground_runs_steps_in_order() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("marker");
        let job = Job::new(vec![
            Step::Sleep(Duration::from_millis(10)),
            Step::Exec(CommandLine::new("/usr/bin/touch", &[marker.to_str().unwrap()])),
        ]);

        ProcessLauncher.run(&job).unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_foreground_ignores_exit_status() {
        let job: Job = CommandLine::new("/bin/sh", &["-c", "exit 3"]).into();
        assert!(ProcessLauncher.run(&job).is_ok());
    }

    #[test]
    fn test_foreground_logs_missing_program_and_continues() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("after");
        let job = Job::new(vec![
            Step::Exec(CommandLine::new("/nonexistent/kaboom-tool", &[])),
            Step::Exec(CommandLine::new("/usr/bin/touch", &[marker.to_str().unwrap()])),
        ]);
        assert!(ProcessLauncher.run(&job).is_ok());
        assert!(marker.exists());
    }

    #[test]
    fn test_detach_returns_before_job_finishes() {
        let temp = TempDir::new().unwrap();
        let marker = temp.path().join("detached");
        let job = Job::new(vec![
            Step::Sleep(Duration::from_millis(300)),
            Step::Exec(CommandLine::new("/usr/bin/touch", &[marker.to_str().unwrap()])),
        ]);

        let start = Instant::now();
        ProcessLauncher.detach(&job).unwrap();
        assert!(start.elapsed() < Duration::from_millis(300));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !marker.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(marker.exists());
    }

    #[test]
    fn test_recording_launcher_tracks_modes() {
        let launcher = RecordingLauncher::new();
        let job: Job = Step::Sleep(Duration::from_secs(1)).into();
        launcher.run(&job).unwrap();
        launcher.detach(&job).unwrap();
        assert_eq!(
            launcher.launched(),
            vec![
                ("sleep 1".to_string(), Mode::Foreground),
                ("sleep 1".to_string(), Mode::Detached),
            ]
        );
    }
}
