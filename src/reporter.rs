//! Reporter Module: the client-facing notice channel
//!
//! Weapons never print directly. Everything an operator should see (the
//! constructed command, the weapon `random` picked, the list of valid names
//! after a typo) goes through a `Reporter`.
//!
//! - `HumanReporter` writes `NOTICE:`/`HINT:` lines to stderr
//! - `JsonReporter` writes NDJSON events to stdout
//! - `MemoryReporter` keeps notices in memory for callers that inspect them

use serde::Serialize;

/// Machine-readable events for JSON output
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MachineEvent<'a> {
    Notice {
        message: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<&'a str>,
    },
    /// One arsenal row
    Weapon {
        name: &'a str,
        description: &'a str,
    },
    /// Final result of a `fire`
    Fired { operation: &'a str, handled: bool },
    Error {
        message: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<&'a str>,
    },
}

/// Reporter trait for output abstraction
pub trait Reporter {
    /// Informational notice, optionally with a hint
    fn on_notice(&mut self, message: &str, hint: Option<&str>);

    /// Called once per arsenal row
    fn on_weapon(&mut self, name: &str, description: &str);

    /// Called after a dispatch completes
    fn on_fired(&mut self, operation: &str, handled: bool);

    /// Called when a dispatch fails
    fn on_error(&mut self, message: &str, hint: Option<&str>);
}

/// JSON Reporter - outputs NDJSON to stdout
pub struct JsonReporter;

impl JsonReporter {
    fn emit(event: &MachineEvent<'_>) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::error!(error = %e, "failed to encode event"),
        }
    }
}

impl Reporter for JsonReporter {
    fn on_notice(&mut self, message: &str, hint: Option<&str>) {
        Self::emit(&MachineEvent::Notice { message, hint });
    }

    fn on_weapon(&mut self, name: &str, description: &str) {
        Self::emit(&MachineEvent::Weapon { name, description });
    }

    fn on_fired(&mut self, operation: &str, handled: bool) {
        Self::emit(&MachineEvent::Fired { operation, handled });
    }

    fn on_error(&mut self, message: &str, hint: Option<&str>) {
        Self::emit(&MachineEvent::Error { message, hint });
    }
}

/// Human Reporter - outputs readable text to stderr
pub struct HumanReporter;

impl Reporter for HumanReporter {
    fn on_notice(&mut self, message: &str, hint: Option<&str>) {
        eprintln!("NOTICE:  {}", message);
        if let Some(hint) = hint {
            eprintln!("HINT:  {}", hint);
        }
    }

    fn on_weapon(&mut self, name: &str, description: &str) {
        // Rows are the command's actual output
        println!("{:<14} {}", name, description);
    }

    fn on_fired(&mut self, _operation: &str, handled: bool) {
        println!("{}", if handled { "t" } else { "f" });
    }

    fn on_error(&mut self, message: &str, hint: Option<&str>) {
        eprintln!("ERROR:  {}", message);
        if let Some(hint) = hint {
            eprintln!("HINT:  {}", hint);
        }
    }
}

/// A notice captured by [`MemoryReporter`]
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub message: String,
    pub hint: Option<String>,
}

/// Collects everything in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    pub notices: Vec<Notice>,
    pub weapons: Vec<(String, String)>,
    pub errors: Vec<Notice>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages only, in emission order
    pub fn messages(&self) -> Vec<&str> {
        self.notices.iter().map(|n| n.message.as_str()).collect()
    }
}

impl Reporter for MemoryReporter {
    fn on_notice(&mut self, message: &str, hint: Option<&str>) {
        self.notices.push(Notice {
            message: message.to_string(),
            hint: hint.map(str::to_string),
        });
    }

    fn on_weapon(&mut self, name: &str, description: &str) {
        self.weapons.push((name.to_string(), description.to_string()));
    }

    fn on_fired(&mut self, _operation: &str, _handled: bool) {}

    fn on_error(&mut self, message: &str, hint: Option<&str>) {
        self.errors.push(Notice {
            message: message.to_string(),
            hint: hint.map(str::to_string),
        });
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_event_serialization() {
        let event = MachineEvent::Notice {
            message: "(dry-run) /bin/rm -Rf /data",
            hint: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"notice\""));
        assert!(json.contains("\"message\":\"(dry-run) /bin/rm -Rf /data\""));
        assert!(!json.contains("hint")); // skip_serializing_if = None
    }

    #[test]
    fn test_fired_event_serialization() {
        let event = MachineEvent::Fired {
            operation: "bogus",
            handled: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"fired","operation":"bogus","handled":false}"#);
    }

    #[test]
    fn test_memory_reporter_records_hints() {
        let mut reporter = MemoryReporter::new();
        reporter.on_notice("unrecognized operation: 'x'", Some("must be one of 'a' or 'b'"));
        reporter.on_notice("plain", None);

        assert_eq!(reporter.messages(), vec!["unrecognized operation: 'x'", "plain"]);
        assert_eq!(
            reporter.notices[0].hint.as_deref(),
            Some("must be one of 'a' or 'b'")
        );
        assert!(reporter.notices[1].hint.is_none());
    }
}
