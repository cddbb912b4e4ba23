//! CLI Integration Tests
//!
//! Spawn the real `kaboom` binary against a throwaway data directory. Live
//! runs only ever reach a data directory without a running server.

#![cfg(unix)]

use pg_kaboom::arsenal::ARSENAL;
use pg_kaboom::config::DISCLAIMER;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use wait_timeout::ChildExt;

/// Run kaboom with a clean environment and a settings file that may not exist
fn run_kaboom(config: &Path, args: &[&str]) -> Output {
    run_kaboom_with(config, args, &[])
}

fn run_kaboom_with(config: &Path, args: &[&str], envs: &[(&str, &OsStr)]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_kaboom"))
        .args(args)
        .envs(envs.iter().copied())
        .env("KABOOM_CONFIG", config)
        .env_remove("KABOOM_DISCLAIMER")
        .env_remove("KABOOM_EXECUTE")
        .env_remove("KABOOM_FORMAT")
        .env_remove("PGDATA")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn kaboom");

    match child.wait_timeout(Duration::from_secs(10)) {
        Ok(Some(_)) => child.wait_with_output().expect("Failed to collect output"),
        _ => {
            let _ = child.kill();
            panic!("kaboom did not finish within 10s");
        }
    }
}

fn scratch() -> (TempDir, String) {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("data");
    fs::create_dir(&data).unwrap();
    fs::write(data.join("PG_VERSION"), "16\n").unwrap();
    let data = fs::canonicalize(data).unwrap().to_string_lossy().into_owned();
    (temp, data)
}

#[test]
fn test_arsenal_lists_every_weapon() {
    let (temp, _) = scratch();
    let output = run_kaboom(&temp.path().join("kaboom.toml"), &["arsenal"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let names: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    let expected: Vec<&str> = ARSENAL.iter().map(|arm| arm.name).collect();
    assert_eq!(names, expected);
}

#[test]
fn test_arsenal_json_rows() {
    let (temp, _) = scratch();
    let output = run_kaboom(
        &temp.path().join("kaboom.toml"),
        &["--format", "json", "arsenal"],
    );
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), ARSENAL.len());
    assert!(events.iter().all(|e| e["event"] == "weapon"));
    assert_eq!(events[0]["name"], "break-archive");
}

#[test]
fn test_missing_disclaimer_fails() {
    let (temp, data) = scratch();
    let output = run_kaboom(
        &temp.path().join("kaboom.toml"),
        &["-D", &data, "fire", "rm-pgdata"],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR:  for safety, pg_kaboom.disclaimer must be explicitly set"));
    assert!(Path::new(&data).join("PG_VERSION").exists());
}

#[test]
fn test_unknown_weapon_prints_hint() {
    let (temp, data) = scratch();
    let output = run_kaboom(
        &temp.path().join("kaboom.toml"),
        &["-D", &data, "--disclaimer", DISCLAIMER, "fire", "bogus"],
    );

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "f");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("NOTICE:  unrecognized operation: 'bogus'"));
    assert!(stderr.contains("HINT:  must be one of 'break-archive'"));
}

#[test]
fn test_dry_run_rm_pgdata_from_settings_file() {
    let (temp, data) = scratch();
    let config = temp.path().join("kaboom.toml");
    fs::write(
        &config,
        format!("[pg_kaboom]\ndisclaimer = \"{}\"\nexecute = false\n", DISCLAIMER),
    )
    .unwrap();

    let output = run_kaboom(&config, &["-D", &data, "fire", "RM-PGDATA"]);

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "t");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(&format!("NOTICE:  (dry-run) /bin/rm -Rf {}", data)));
    assert!(Path::new(&data).join("PG_VERSION").exists());
}

#[test]
fn test_invalid_payload_json_fails() {
    let (temp, data) = scratch();
    let output = run_kaboom(
        &temp.path().join("kaboom.toml"),
        &[
            "-D",
            &data,
            "--disclaimer",
            DISCLAIMER,
            "fire",
            "signal",
            "--payload",
            "{not json",
        ],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("payload is not valid JSON"));
}

#[test]
fn test_missing_data_directory_flag_fails() {
    let (temp, _) = scratch();
    let output = run_kaboom(
        &temp.path().join("kaboom.toml"),
        &["--disclaimer", DISCLAIMER, "fire", "null"],
    );

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("pass -D or set PGDATA"));
}

#[test]
fn test_unknown_weapon_ignores_bad_payload() {
    let (temp, data) = scratch();
    let output = run_kaboom(
        &temp.path().join("kaboom.toml"),
        &[
            "-D",
            &data,
            "--disclaimer",
            DISCLAIMER,
            "fire",
            "bogus",
            "--payload",
            "{not json",
        ],
    );

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "f");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("NOTICE:  unrecognized operation: 'bogus'"));
    assert!(!stderr.contains("payload is not valid JSON"));
}

#[test]
fn test_break_archive_persists_saved_command() {
    let (temp, data) = scratch();
    fs::write(
        Path::new(&data).join("postgresql.conf"),
        "archive_command = 'cp %p /archive/%f'\n",
    )
    .unwrap();

    // pg_ctl is found on PATH; without postmaster.pid the restart stops early
    let bin = temp.path().join("bin");
    fs::create_dir(&bin).unwrap();
    let pg_ctl = bin.join("pg_ctl");
    fs::write(&pg_ctl, "#!/bin/sh\nexit 0\n").unwrap();
    fs::set_permissions(&pg_ctl, fs::Permissions::from_mode(0o755)).unwrap();

    let config = temp.path().join("kaboom.toml");
    fs::write(
        &config,
        format!("[pg_kaboom]\ndisclaimer = \"{}\"\n", DISCLAIMER),
    )
    .unwrap();

    let output = run_kaboom_with(
        &config,
        &["-D", &data, "--execute", "fire", "break-archive"],
        &[("PATH", bin.as_os_str())],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("postmaster pid not found"), "{}", stderr);

    let stored: toml::Table = fs::read_to_string(&config).unwrap().parse().unwrap();
    let section = stored["pg_kaboom"].as_table().unwrap();
    assert_eq!(
        section["saved_archive_command"].as_str(),
        Some("cp %p /archive/%f")
    );
    assert_eq!(section["disclaimer"].as_str(), Some(DISCLAIMER));

    let auto_conf = fs::read_to_string(Path::new(&data).join("postgresql.auto.conf")).unwrap();
    assert!(auto_conf.contains("archive_command = '/bin/false'\n"));
}
