//! Host adapter for a local cluster, reached through its data directory
//!
//! - Settings come from `postgresql.auto.conf`, then `postgresql.conf`
//! - ALTER SYSTEM rewrites `postgresql.auto.conf` (temp file + rename)
//! - The process table is the postmaster's children under `/proc`
//! - `pg_ctl` is looked up next to the running postmaster binary, then in PATH

use crate::host::{BackendDescriptor, BackendType, Host, Pid};
use crate::paths::DATA_DIRECTORY_OPTION;
use crate::statement::{self, Statement, AUTO_CONF_FILE};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CONF_FILE: &str = "postgresql.conf";
pub const PID_FILE: &str = "postmaster.pid";

/// Built-in values for settings weapons read when no file sets them
const DEFAULTS: &[(&str, &str)] = &[("log_directory", "log")];

#[derive(Debug, Clone)]
pub struct PgCluster {
    data_dir: PathBuf,
}

impl PgCluster {
    /// Attach to the cluster in `data_dir`; the directory itself is checked
    /// lazily by whoever uses it.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let data_dir = fs::canonicalize(&data_dir).unwrap_or(data_dir);
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn read_conf(&self, file: &str) -> io::Result<Vec<(String, String)>> {
        match fs::read_to_string(self.data_dir.join(file)) {
            Ok(contents) => Ok(statement::parse_conf(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn lookup_file(&self, file: &str, name: &str) -> Option<String> {
        match self.read_conf(file) {
            Ok(entries) => statement::lookup(&entries, name).map(str::to_string),
            Err(e) => {
                tracing::warn!(file, error = %e, "failed to read configuration file");
                None
            }
        }
    }
}

impl Host for PgCluster {
    fn config_option(&self, name: &str) -> Option<String> {
        if name.eq_ignore_ascii_case(DATA_DIRECTORY_OPTION) {
            return Some(self.data_dir.to_string_lossy().into_owned());
        }

        self.lookup_file(AUTO_CONF_FILE, name)
            .or_else(|| self.lookup_file(CONF_FILE, name))
            .or_else(|| {
                DEFAULTS
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value.to_string())
            })
    }

    /// Root, or the OS user owning the data directory
    #[cfg(unix)]
    fn session_is_superuser(&self) -> bool {
        use std::os::unix::fs::MetadataExt;

        let euid = nix::unistd::geteuid();
        euid.is_root()
            || fs::metadata(&self.data_dir)
                .map(|meta| meta.uid() == euid.as_raw())
                .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn session_is_superuser(&self) -> bool {
        false
    }

    fn parse_statements(&self, sql: &str) -> Result<Vec<Statement>, String> {
        statement::parse(sql)
    }

    fn alter_system(&self, stmt: &Statement) -> io::Result<()> {
        let mut entries = self.read_conf(AUTO_CONF_FILE)?;
        statement::apply(&mut entries, stmt);

        let path = self.data_dir.join(AUTO_CONF_FILE);
        let tmp = self.data_dir.join(format!("{}.tmp", AUTO_CONF_FILE));
        fs::write(&tmp, statement::render_auto_conf(&entries))?;
        fs::rename(&tmp, &path)?;

        tracing::info!(path = %path.display(), statement = %stmt, "rewrote override file");
        Ok(())
    }

    fn backends(&self) -> Vec<BackendDescriptor> {
        let Some(postmaster) = self.postmaster_pid() else {
            return Vec::new();
        };
        let entries = match fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read /proc");
                return Vec::new();
            }
        };

        entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
            .filter(|pid| parent_pid(*pid) == Some(postmaster.as_raw()))
            .map(|pid| {
                let title = process_title(pid).unwrap_or_default();
                BackendDescriptor::new(pid, classify_title(&title))
            })
            .collect()
    }

    /// Weapons run in the `kaboom` process, outside the server
    fn in_server(&self) -> bool {
        false
    }

    fn postmaster_pid(&self) -> Option<Pid> {
        let contents = fs::read_to_string(self.data_dir.join(PID_FILE)).ok()?;
        let pid: i32 = contents.lines().next()?.trim().parse().ok()?;
        (pid > 0).then(|| Pid::from_raw(pid))
    }

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        let sibling = self
            .postmaster_pid()
            .and_then(|pid| fs::read_link(format!("/proc/{}/exe", pid)).ok())
            .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
            .filter(|candidate| candidate.is_file());

        sibling.or_else(|| which::which(name).ok())
    }
}

/// Parent pid from `/proc/<pid>/stat`
fn parent_pid(pid: i32) -> Option<i32> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces and parentheses; fields resume after the last ')'
    let fields = &stat[stat.rfind(')')? + 1..];
    fields.split_whitespace().nth(1)?.parse().ok()
}

fn process_title(pid: i32) -> Option<String> {
    let raw = fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
    let title = String::from_utf8_lossy(&raw).replace('\0', " ");
    Some(title.trim().to_string())
}

/// Classify a server child from its process title, e.g.
/// `postgres: main: autovacuum worker mydb`
///
/// Client backends are recognised by their own title shape,
/// `user database host state`, where the host is `[local]` or `addr(port)`.
/// Any other server title that is not a known auxiliary process is taken to
/// be a background worker.
pub fn classify_title(title: &str) -> BackendType {
    let Some(rest) = title.strip_prefix("postgres: ") else {
        return BackendType::Other;
    };
    // Optional cluster_name prefix
    let rest = match rest.split_once(": ") {
        Some((prefix, tail)) if !prefix.contains(' ') => tail,
        _ => rest,
    };

    const AUXILIARY: &[&str] = &[
        "checkpointer",
        "background writer",
        "walwriter",
        "autovacuum launcher",
        "stats collector",
        "archiver",
        "startup",
        "walreceiver",
        "walsummarizer",
        "io worker",
        "logger",
    ];

    if rest.starts_with("autovacuum worker") {
        BackendType::AutovacuumWorker
    } else if rest.starts_with("walsender") {
        BackendType::WalSender
    } else if AUXILIARY.iter().any(|aux| rest.starts_with(aux)) {
        BackendType::Other
    } else if is_client_title(rest) {
        BackendType::Backend
    } else {
        BackendType::BackgroundWorker
    }
}

fn is_client_title(rest: &str) -> bool {
    match rest.split_whitespace().nth(2) {
        Some("[local]") => true,
        Some(host) => host.ends_with(')') && host.contains('('),
        None => false,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
