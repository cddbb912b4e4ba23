//! Forced configuration changes and self-restart
//!
//! Settings that only take effect at server start cannot be changed from a
//! session, so they are written straight into the persisted overrides and the
//! server is then killed and started again by a detached job.

use crate::command::{CommandLine, Executor, Job, Mode, Signal, Step};
use crate::error::{KaboomError, Result};
use crate::host::Host;
use crate::statement;
use std::path::Path;
use std::thread;
use std::time::Duration;

pub const CONTROL_UTILITY: &str = "pg_ctl";

/// Where the relaunched server's startup output goes
pub const STARTUP_LOG: &str = "/tmp/pg_kaboom_startup.log";

/// Between killing the server and starting it again
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Lets the override file reach disk before the kill
const FLUSH_PAUSE: Duration = Duration::from_secs(1);

/// Persist each `names[i] = values[i]` and restart the server.
///
/// Values must already be quoted when the setting is string-typed. Pairs are
/// applied in order; a pair that does not parse to exactly one statement
/// stops the run, leaving earlier pairs applied.
pub fn force_settings_and_restart(
    host: &dyn Host,
    executor: &mut Executor<'_>,
    data_dir: &Path,
    names: &[&str],
    values: &[String],
) -> Result<()> {
    if names.len() != values.len() {
        return Err(KaboomError::invalid(format!(
            "{} settings but {} values",
            names.len(),
            values.len()
        )));
    }

    for (name, value) in names.iter().zip(values) {
        let sql = statement::synthesize(name, value);
        let parsed = host
            .parse_statements(&sql)
            .map_err(|detail| KaboomError::SyntaxError {
                statement: sql.clone(),
                detail,
            })?;

        let [stmt] = parsed.as_slice() else {
            return Err(KaboomError::SyntaxError {
                detail: format!("expected exactly one statement, found {}", parsed.len()),
                statement: sql,
            });
        };

        if executor.announce(&stmt.to_string()) {
            host.alter_system(stmt)?;
            tracing::info!(setting = stmt.name(), "persisted configuration override");
        }
    }

    if executor.is_live() {
        thread::sleep(FLUSH_PAUSE);
    }
    restart(host, executor, data_dir)
}

/// Kill the server and start a fresh instance from a detached job.
///
/// Without the control utility there is no way back up, so its absence is
/// fatal.
pub fn restart(host: &dyn Host, executor: &mut Executor<'_>, data_dir: &Path) -> Result<()> {
    let pg_ctl = host.find_executable(CONTROL_UTILITY).ok_or_else(|| {
        KaboomError::Fatal(format!("could not locate {} executable", CONTROL_UTILITY))
    })?;
    let postmaster = host
        .postmaster_pid()
        .ok_or_else(|| KaboomError::ConfigurationMissing("postmaster pid".to_string()))?;

    let data = data_dir.to_string_lossy().into_owned();
    let job = Job::new(vec![
        Step::Signal {
            pid: postmaster,
            signal: Signal::SIGKILL,
        },
        Step::Sleep(KILL_GRACE),
        Step::Exec(CommandLine::new(
            pg_ctl,
            &["start", "-D", data.as_str(), "-l", STARTUP_LOG],
        )),
    ]);

    executor.run(&job, Mode::Detached)
}
