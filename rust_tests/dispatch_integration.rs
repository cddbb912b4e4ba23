//! Dispatch Integration Tests
//!
//! Drives `Kaboom::kaboom` end to end against an in-memory host whose data
//! directory is a real temp dir, so path checks and dry-run output are the
//! same as against a live cluster.

#![cfg(unix)]

use pg_kaboom::arsenal::{self, ARSENAL};
use pg_kaboom::config::{Settings, DISCLAIMER};
use pg_kaboom::host::{MemoryHost, Pid};
use pg_kaboom::launcher::RecordingLauncher;
use pg_kaboom::reporter::MemoryReporter;
use pg_kaboom::{Kaboom, KaboomError};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

// =============================================================================
// Fixtures
// =============================================================================

struct Cluster {
    _temp: TempDir,
    data_dir: PathBuf,
    host: MemoryHost,
}

fn cluster() -> Cluster {
    let temp = TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    fs::create_dir_all(data_dir.join("pg_wal")).unwrap();
    fs::create_dir_all(data_dir.join("log")).unwrap();
    fs::write(data_dir.join("PG_VERSION"), "16\n").unwrap();

    let mut host = MemoryHost::new(data_dir.to_str().unwrap());
    host.set_option("log_directory", "log");
    host.postmaster = Some(Pid::from_raw(4242));
    host.pid = Some(Pid::from_raw(7000));
    host.executables
        .insert("pg_ctl".to_string(), PathBuf::from("/usr/lib/postgresql/16/bin/pg_ctl"));

    Cluster {
        _temp: temp,
        data_dir,
        host,
    }
}

fn armed() -> Settings {
    Settings {
        disclaimer: DISCLAIMER.to_string(),
        ..Settings::default()
    }
}

// =============================================================================
// Safety Gate
// =============================================================================

#[test]
fn test_gate_refuses_missing_or_inexact_disclaimer() {
    let c = cluster();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);

    for disclaimer in ["", "i can afford to lose this data and server", "yes"] {
        let mut settings = Settings {
            disclaimer: disclaimer.to_string(),
            execute: true,
            ..Settings::default()
        };
        let mut reporter = MemoryReporter::new();
        let err = kaboom
            .kaboom(&mut settings, &mut reporter, "segfault", None)
            .unwrap_err();

        assert!(matches!(err, KaboomError::InsufficientPrivilege { .. }));
        assert!(err.to_string().contains(DISCLAIMER));
    }
    assert!(launcher.launched().is_empty());
}

#[test]
fn test_gate_refuses_non_superuser() {
    let mut c = cluster();
    c.host.superuser = false;
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();

    let err = kaboom
        .kaboom(&mut armed(), &mut reporter, "null", None)
        .unwrap_err();
    assert_eq!(err.to_string(), "must run this function as a superuser");
}

// =============================================================================
// Lookup
// =============================================================================

#[test]
fn test_unknown_name_lists_every_weapon_once() {
    let c = cluster();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();

    let handled = kaboom
        .kaboom(&mut armed(), &mut reporter, "bogus", None)
        .unwrap();
    assert!(!handled);

    assert_eq!(reporter.notices.len(), 1);
    let notice = &reporter.notices[0];
    assert_eq!(notice.message, "unrecognized operation: 'bogus'");

    let hint = notice.hint.as_deref().unwrap();
    assert!(hint.starts_with("must be one of "));
    for arm in ARSENAL {
        let quoted = format!("'{}'", arm.name);
        assert_eq!(hint.matches(&quoted).count(), 1, "{} in {}", arm.name, hint);
    }
}

#[test]
fn test_names_match_case_insensitively() {
    let c = cluster();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();

    assert!(kaboom
        .kaboom(&mut armed(), &mut reporter, "RM-PgData", None)
        .unwrap());
    // Invoked exactly once
    assert_eq!(reporter.notices.len(), 1);
    assert!(reporter.notices[0].message.starts_with("(dry-run) /bin/rm -Rf "));
}

#[test]
fn test_arsenal_rows_match_registry() {
    let rows: Vec<(&str, &str)> = arsenal::arsenal().collect();
    assert_eq!(rows.len(), ARSENAL.len());
    assert_eq!(rows[0].0, "break-archive");
    assert!(rows.iter().any(|(name, _)| *name == "random"));
    assert!(rows.iter().all(|(_, description)| !description.is_empty()));
}

// =============================================================================
// Weapons (dry-run)
// =============================================================================

#[test]
fn test_rm_pgdata_dry_run_leaves_directory() {
    let c = cluster();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();

    kaboom
        .kaboom(&mut armed(), &mut reporter, "rm-pgdata", None)
        .unwrap();

    assert_eq!(
        reporter.messages(),
        vec![format!("(dry-run) /bin/rm -Rf {}", c.data_dir.display()).as_str()]
    );
    assert!(c.data_dir.join("PG_VERSION").exists());
    assert!(launcher.launched().is_empty());
}

#[test]
fn test_segfault_without_disclaimer_is_refused() {
    let c = cluster();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();
    let mut settings = Settings {
        execute: true,
        ..Settings::default()
    };

    let err = kaboom
        .kaboom(&mut settings, &mut reporter, "segfault", None)
        .unwrap_err();
    assert!(matches!(err, KaboomError::InsufficientPrivilege { .. }));
    assert!(err.hint().is_some());
    assert!(launcher.launched().is_empty());
}

#[test]
fn test_dry_run_never_launches() {
    let c = cluster();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);

    for arm in ARSENAL {
        let mut reporter = MemoryReporter::new();
        let handled = kaboom
            .kaboom(&mut armed(), &mut reporter, arm.name, None)
            .unwrap_or_else(|e| panic!("{} failed: {}", arm.name, e));
        assert!(handled, "{}", arm.name);
    }

    assert!(launcher.launched().is_empty());
    assert!(c.host.applied().is_empty());
}

#[test]
fn test_fill_pgwal_targets_wal_directory() {
    let c = cluster();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();

    kaboom
        .kaboom(&mut armed(), &mut reporter, "fill-pgwal", None)
        .unwrap();
    let expected = format!(
        "(dry-run) /bin/dd if=/dev/zero of={}/pg_kaboom.fill bs=1M",
        c.data_dir.join("pg_wal").display()
    );
    assert_eq!(reporter.messages(), vec![expected.as_str()]);
}

#[test]
fn test_fill_log_requires_existing_directory() {
    let c = cluster();
    c.host.set_option("log_directory", "missing_logs");
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();

    let err = kaboom
        .kaboom(&mut armed(), &mut reporter, "fill-log", None)
        .unwrap_err();
    assert!(matches!(err, KaboomError::NotWritableDirectory(ref p) if p.ends_with("missing_logs")));
}

#[test]
fn test_xact_wrap_announces_settings_then_restart() {
    let c = cluster();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();

    kaboom
        .kaboom(
            &mut armed(),
            &mut reporter,
            "xact-wrap",
            Some(serde_json::json!({"max_age": 150000})),
        )
        .unwrap();

    let messages = reporter.messages();
    assert_eq!(messages[0], "(dry-run) ALTER SYSTEM SET autovacuum = 'on'");
    assert_eq!(
        messages[1],
        "(dry-run) ALTER SYSTEM SET autovacuum_freeze_max_age = '150000'"
    );
    assert!(messages[2].starts_with("(dry-run) kill -9 4242; sleep 1; "));
    assert!(messages[2].contains("pg_ctl start -D"));
}

#[test]
fn test_restart_without_pg_ctl_is_fatal() {
    let mut c = cluster();
    c.host.executables.clear();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();

    let err = kaboom
        .kaboom(&mut armed(), &mut reporter, "restart", None)
        .unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_missing_data_directory_is_reported() {
    let c = cluster();
    c.host.set_option("data_directory", "");
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();

    let err = kaboom
        .kaboom(&mut armed(), &mut reporter, "fill-pgdata", None)
        .unwrap_err();
    assert_eq!(err.to_string(), "data directory not found");
}

// =============================================================================
// Meta Weapons
// =============================================================================

#[test]
fn test_random_picks_a_real_weapon() {
    let c = cluster();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);

    for _ in 0..100 {
        let mut reporter = MemoryReporter::new();
        assert!(kaboom
            .kaboom(&mut armed(), &mut reporter, "random", None)
            .unwrap());

        let first = &reporter.notices[0].message;
        let chosen = first
            .strip_prefix("random weapon selected: '")
            .and_then(|rest| rest.strip_suffix('\''))
            .unwrap_or_else(|| panic!("unexpected first notice: {}", first));
        assert_ne!(chosen, "random");
        assert_ne!(chosen, "null");
        assert!(arsenal::lookup(chosen).is_some());
    }
    assert!(launcher.launched().is_empty());
}

#[test]
fn test_payload_must_be_object() {
    let c = cluster();
    let launcher = RecordingLauncher::new();
    let kaboom = Kaboom::new(&c.host, &launcher);
    let mut reporter = MemoryReporter::new();

    let err = kaboom
        .kaboom(
            &mut armed(),
            &mut reporter,
            "signal",
            Some(serde_json::json!([15])),
        )
        .unwrap_err();
    assert!(matches!(err, KaboomError::InvalidArgument { .. }));
}
