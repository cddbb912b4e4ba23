//! Host services the weapons call into
//!
//! The server that hosts the weapons owns its configuration store, statement
//! parser, process table and executable layout. Weapons only ever talk to it
//! through [`Host`]; `cluster::PgCluster` is the implementation for a local
//! cluster reached through its data directory.

use crate::statement::{self, Statement};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

/// Process id as seen in the host's process table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(i32);

impl Pid {
    pub const fn from_raw(pid: i32) -> Self {
        Pid(pid)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// The calling process
    pub fn this() -> Self {
        Pid(std::process::id() as i32)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process category of a server child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Regular client backend
    Backend,
    AutovacuumWorker,
    WalSender,
    BackgroundWorker,
    /// Checkpointer, walwriter, launcher processes, ...
    Other,
}

impl BackendType {
    /// Categories that can be requested by name, with their names
    pub const TARGETABLE: [(&'static str, BackendType); 4] = [
        ("backend", BackendType::Backend),
        ("autovac", BackendType::AutovacuumWorker),
        ("walsender", BackendType::WalSender),
        ("bgworker", BackendType::BackgroundWorker),
    ];
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendType::Backend => "client backend",
            BackendType::AutovacuumWorker => "autovacuum worker",
            BackendType::WalSender => "walsender",
            BackendType::BackgroundWorker => "background worker",
            BackendType::Other => "auxiliary process",
        };
        f.write_str(name)
    }
}

/// One slot of the live process-status table.
///
/// A pid of 0 marks an unused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub pid: i32,
    pub backend_type: BackendType,
}

impl BackendDescriptor {
    pub fn new(pid: i32, backend_type: BackendType) -> Self {
        Self { pid, backend_type }
    }

    pub fn is_live(&self) -> bool {
        self.pid > 0
    }
}

pub trait Host {
    /// Current value of a configuration option, if set
    fn config_option(&self, name: &str) -> Option<String>;

    /// Whether the calling session is authenticated as a superuser
    fn session_is_superuser(&self) -> bool;

    /// Run text through the host's statement parser
    fn parse_statements(&self, sql: &str) -> Result<Vec<Statement>, String>;

    /// Apply an ALTER SYSTEM statement straight to the persisted overrides,
    /// outside any transaction
    fn alter_system(&self, statement: &Statement) -> std::io::Result<()>;

    /// Snapshot of the process-status table
    fn backends(&self) -> Vec<BackendDescriptor>;

    /// Pid of the server's supervising process
    fn postmaster_pid(&self) -> Option<Pid>;

    /// Whether weapons run inside a server process, so that faults raised
    /// in the current process take down part of the server
    fn in_server(&self) -> bool;

    /// Pid of the process running the weapons
    fn my_pid(&self) -> Pid {
        Pid::this()
    }

    /// Locate a sibling server executable such as `pg_ctl`
    fn find_executable(&self, name: &str) -> Option<PathBuf>;
}

/// In-memory host: fixed options, process table and executables.
///
/// ALTER SYSTEM statements are applied to the option map and recorded.
#[derive(Debug, Default)]
pub struct MemoryHost {
    pub superuser: bool,
    pub in_server: bool,
    pub options: Mutex<HashMap<String, String>>,
    pub backends: Vec<BackendDescriptor>,
    pub postmaster: Option<Pid>,
    pub pid: Option<Pid>,
    pub executables: HashMap<String, PathBuf>,
    applied: Mutex<Vec<Statement>>,
}

impl MemoryHost {
    /// A superuser session inside a server whose cluster lives in
    /// `data_directory`
    pub fn new(data_directory: &str) -> Self {
        let host = Self {
            superuser: true,
            in_server: true,
            ..Self::default()
        };
        host.set_option("data_directory", data_directory);
        host
    }

    pub fn set_option(&self, name: &str, value: &str) {
        self.options
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value.to_string());
    }

    /// Statements applied through `alter_system`, in order
    pub fn applied(&self) -> Vec<Statement> {
        self.applied.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Host for MemoryHost {
    fn config_option(&self, name: &str) -> Option<String> {
        self.options
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    fn session_is_superuser(&self) -> bool {
        self.superuser
    }

    fn parse_statements(&self, sql: &str) -> Result<Vec<Statement>, String> {
        statement::parse(sql)
    }

    fn alter_system(&self, statement: &Statement) -> std::io::Result<()> {
        {
            let mut options = self.options.lock().unwrap_or_else(|e| e.into_inner());
            match statement {
                Statement::AlterSystemSet { name, value } => {
                    options.insert(name.clone(), value.clone());
                }
                Statement::AlterSystemReset { name } => {
                    options.remove(name);
                }
            }
        }
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(statement.clone());
        Ok(())
    }

    fn backends(&self) -> Vec<BackendDescriptor> {
        self.backends.clone()
    }

    fn postmaster_pid(&self) -> Option<Pid> {
        self.postmaster
    }

    fn in_server(&self) -> bool {
        self.in_server
    }

    fn my_pid(&self) -> Pid {
        self.pid.unwrap_or_else(Pid::this)
    }

    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        self.executables.get(name).cloned()
    }
}
