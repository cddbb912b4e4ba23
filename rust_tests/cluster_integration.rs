//! Cluster Integration Tests
//!
//! Exercises `PgCluster` against a fake data directory on disk, plus one
//! dispatch that really rewrites `postgresql.auto.conf`.

#![cfg(unix)]

use pg_kaboom::cluster::{PgCluster, CONF_FILE, PID_FILE};
use pg_kaboom::config::{Settings, DISCLAIMER};
use pg_kaboom::host::{Host, Pid};
use pg_kaboom::command::Mode;
use pg_kaboom::launcher::RecordingLauncher;
use pg_kaboom::reporter::MemoryReporter;
use pg_kaboom::statement::{Statement, AUTO_CONF_FILE};
use pg_kaboom::Kaboom;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;

fn data_dir() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join(CONF_FILE),
        "# main configuration\nlog_directory = 'pg_log'\nport = 5433\narchive_command = 'cp %p /archive/%f'\n",
    )
    .unwrap();
    temp
}

fn write_pid_file(dir: &TempDir, pid: u32) {
    let contents = format!("{}\n{}\n1700000000\n5433\n", pid, dir.path().display());
    fs::write(dir.path().join(PID_FILE), contents).unwrap();
}

#[test]
fn test_auto_conf_overrides_main_conf() {
    let temp = data_dir();
    fs::write(
        temp.path().join(AUTO_CONF_FILE),
        "port = '6000'\nport = '6001'\n",
    )
    .unwrap();
    let cluster = PgCluster::new(temp.path());

    assert_eq!(cluster.config_option("port").as_deref(), Some("6001"));
    assert_eq!(cluster.config_option("log_directory").as_deref(), Some("pg_log"));
    assert_eq!(cluster.config_option("no_such_setting"), None);
}

#[test]
fn test_builtin_defaults_fill_gaps() {
    let temp = TempDir::new().unwrap();
    let cluster = PgCluster::new(temp.path());
    assert_eq!(cluster.config_option("log_directory").as_deref(), Some("log"));
}

#[test]
fn test_data_directory_is_canonical() {
    let temp = data_dir();
    fs::create_dir(temp.path().join("sub")).unwrap();
    let cluster = PgCluster::new(temp.path().join("sub").join(".."));
    let expected = fs::canonicalize(temp.path()).unwrap();

    assert_eq!(cluster.data_dir(), expected);
    assert_eq!(
        cluster.config_option("data_directory").as_deref(),
        expected.to_str()
    );
}

#[test]
fn test_alter_system_rewrites_auto_conf() {
    let temp = data_dir();
    let cluster = PgCluster::new(temp.path());

    let parsed = cluster
        .parse_statements("ALTER SYSTEM SET archive_command TO 'exit 1'")
        .unwrap();
    cluster.alter_system(&parsed[0]).unwrap();
    cluster
        .alter_system(&Statement::AlterSystemSet {
            name: "archive_mode".to_string(),
            value: "on".to_string(),
        })
        .unwrap();

    let written = fs::read_to_string(temp.path().join(AUTO_CONF_FILE)).unwrap();
    assert!(written.starts_with('#'));
    assert!(written.contains("archive_command = 'exit 1'\n"));
    assert!(written.contains("archive_mode = 'on'\n"));
    assert_eq!(cluster.config_option("archive_command").as_deref(), Some("exit 1"));

    cluster
        .alter_system(&Statement::AlterSystemReset {
            name: "archive_command".to_string(),
        })
        .unwrap();
    // Falls back to postgresql.conf
    assert_eq!(
        cluster.config_option("archive_command").as_deref(),
        Some("cp %p /archive/%f")
    );
}

#[test]
fn test_postmaster_pid_from_pid_file() {
    let temp = data_dir();
    let cluster = PgCluster::new(temp.path());
    assert_eq!(cluster.postmaster_pid(), None);

    write_pid_file(&temp, 4242);
    assert_eq!(cluster.postmaster_pid(), Some(Pid::from_raw(4242)));

    fs::write(temp.path().join(PID_FILE), "garbage\n").unwrap();
    assert_eq!(cluster.postmaster_pid(), None);
}

#[test]
fn test_owner_counts_as_superuser() {
    let temp = data_dir();
    assert!(PgCluster::new(temp.path()).session_is_superuser());
}

#[test]
fn test_backends_are_postmaster_children() {
    let temp = data_dir();
    // Pretend this test process is the postmaster
    write_pid_file(&temp, std::process::id());
    let cluster = PgCluster::new(temp.path());

    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    let backends = cluster.backends();
    child.kill().unwrap();
    child.wait().unwrap();

    let found = backends
        .iter()
        .find(|b| b.pid == child.id() as i32)
        .expect("spawned child not listed");
    assert!(found.is_live());
}

#[test]
fn test_find_executable_falls_back_to_path() {
    let temp = data_dir();
    write_pid_file(&temp, std::process::id());
    let cluster = PgCluster::new(temp.path());

    let sh = cluster.find_executable("sh").unwrap();
    assert!(sh.ends_with("sh"));
    assert!(cluster.find_executable("kaboom-no-such-tool").is_none());
}

/// A freshly copied binary can be briefly busy (ETXTBSY) while a parallel
/// test forks with the write handle inherited
fn spawn_retrying_busy(command: &mut Command) -> Child {
    for _ in 0..20 {
        match command.spawn() {
            Ok(child) => return child,
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) => {
                std::thread::sleep(Duration::from_millis(50))
            }
            Err(e) => panic!("spawn failed: {}", e),
        }
    }
    panic!("binary stayed busy");
}

#[test]
#[cfg(target_os = "linux")]
fn test_xact_wrap_persists_overrides_then_restarts() {
    let temp = data_dir();

    // A stand-in postmaster whose executable has pg_ctl beside it
    let bin = temp.path().join("bin");
    fs::create_dir(&bin).unwrap();
    let postmaster_exe = bin.join("sleep");
    fs::copy(which::which("sleep").unwrap(), &postmaster_exe).unwrap();
    let pg_ctl = bin.join("pg_ctl");
    fs::write(&pg_ctl, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&pg_ctl, fs::Permissions::from_mode(0o755)).unwrap();

    let mut postmaster = spawn_retrying_busy(Command::new(&postmaster_exe).arg("30"));
    write_pid_file(&temp, postmaster.id());

    let cluster = PgCluster::new(temp.path());
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&cluster, &launcher);
    let mut reporter = MemoryReporter::new();
    let mut settings = Settings {
        disclaimer: DISCLAIMER.to_string(),
        execute: true,
        ..Settings::default()
    };

    let outcome = kaboom.kaboom(&mut settings, &mut reporter, "xact-wrap", None);
    let launched = launcher.launched();
    postmaster.kill().unwrap();
    postmaster.wait().unwrap();

    assert!(outcome.unwrap());
    assert_eq!(cluster.config_option("autovacuum").as_deref(), Some("on"));
    assert_eq!(
        cluster.config_option("autovacuum_freeze_max_age").as_deref(),
        Some("100000")
    );

    let expected = format!(
        "kill -9 {}; sleep 1; {} start -D {} -l /tmp/pg_kaboom_startup.log",
        postmaster.id(),
        fs::canonicalize(&bin).unwrap().join("pg_ctl").display(),
        cluster.data_dir().display()
    );
    assert_eq!(launched, vec![(expected, Mode::Detached)]);
}
