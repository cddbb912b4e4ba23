//! ALTER SYSTEM statements and the override file they persist to
//!
//! `parse` understands exactly the statement family weapons synthesize:
//! `ALTER SYSTEM SET name = value`, `ALTER SYSTEM SET name TO value` and
//! `ALTER SYSTEM RESET name`. Statements are split on `;` outside quotes, so a
//! value that smuggles a second statement shows up as two statements.

use std::fmt;

pub const AUTO_CONF_FILE: &str = "postgresql.auto.conf";

const AUTO_CONF_HEADER: &str = "# Do not edit this file manually!\n\
                                # It will be overwritten by the ALTER SYSTEM command.\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    AlterSystemSet { name: String, value: String },
    AlterSystemReset { name: String },
}

impl Statement {
    pub fn name(&self) -> &str {
        match self {
            Statement::AlterSystemSet { name, .. } | Statement::AlterSystemReset { name } => name,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::AlterSystemSet { name, value } => {
                write!(f, "ALTER SYSTEM SET {} = {}", name, quote_literal(value))
            }
            Statement::AlterSystemReset { name } => write!(f, "ALTER SYSTEM RESET {}", name),
        }
    }
}

/// Build the statement text for one setting; `value` must already be quoted
/// if the setting is string-typed.
pub fn synthesize(name: &str, value: &str) -> String {
    format!("ALTER SYSTEM SET {} = {}", name, value)
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Literal(String),
    Equals,
}

/// Parse one or more `;`-separated statements
pub fn parse(sql: &str) -> Result<Vec<Statement>, String> {
    split_statements(sql)?
        .iter()
        .map(|text| parse_one(&tokenize(text)?))
        .collect()
}

fn split_statements(sql: &str) -> Result<Vec<String>, String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for c in sql.chars() {
        match c {
            '\'' => {
                // '' inside a literal toggles twice and stays quoted
                in_quote = !in_quote;
                current.push(c);
            }
            ';' if !in_quote => {
                if !current.trim().is_empty() {
                    statements.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if in_quote {
        return Err("unterminated quoted string".to_string());
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    Ok(statements)
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '=' {
            chars.next();
            tokens.push(Token::Equals);
        } else if c == '\'' {
            chars.next();
            let mut literal = String::new();
            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        literal.push('\'');
                    }
                    Some('\'') => break,
                    Some(ch) => literal.push(ch),
                    None => return Err("unterminated quoted string".to_string()),
                }
            }
            tokens.push(Token::Literal(literal));
        } else if c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '+') {
            let mut word = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || matches!(ch, '_' | '.' | '-' | '+') {
                    word.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Word(word));
        } else {
            return Err(format!("unexpected character '{}'", c));
        }
    }
    Ok(tokens)
}

fn keyword(token: Option<&Token>, expected: &str) -> Result<(), String> {
    match token {
        Some(Token::Word(w)) if w.eq_ignore_ascii_case(expected) => Ok(()),
        Some(other) => Err(format!("expected {}, found {:?}", expected, other)),
        None => Err(format!("expected {}, found end of input", expected)),
    }
}

fn identifier(token: Option<&Token>) -> Result<String, String> {
    match token {
        Some(Token::Word(w)) if w.starts_with(|c: char| c.is_alphabetic() || c == '_') => {
            Ok(w.to_lowercase())
        }
        _ => Err("expected configuration parameter name".to_string()),
    }
}

fn parse_one(tokens: &[Token]) -> Result<Statement, String> {
    let mut it = tokens.iter();
    keyword(it.next(), "ALTER")?;
    keyword(it.next(), "SYSTEM")?;

    let statement = match it.next() {
        Some(Token::Word(w)) if w.eq_ignore_ascii_case("SET") => {
            let name = identifier(it.next())?;
            match it.next() {
                Some(Token::Equals) => {}
                Some(Token::Word(w)) if w.eq_ignore_ascii_case("TO") => {}
                _ => return Err("expected = or TO".to_string()),
            }
            let value = match it.next() {
                Some(Token::Literal(v)) | Some(Token::Word(v)) => v.clone(),
                _ => return Err("expected a value".to_string()),
            };
            Statement::AlterSystemSet { name, value }
        }
        Some(Token::Word(w)) if w.eq_ignore_ascii_case("RESET") => Statement::AlterSystemReset {
            name: identifier(it.next())?,
        },
        _ => return Err("expected SET or RESET".to_string()),
    };

    if let Some(extra) = it.next() {
        return Err(format!("unexpected trailing input {:?}", extra));
    }
    Ok(statement)
}

// =============================================================================
// Configuration files
// =============================================================================

/// Parse `name = value` lines of a postgresql.conf-style file, in order.
///
/// Later duplicates are kept; the last one wins for lookups.
pub fn parse_conf(contents: &str) -> Vec<(String, String)> {
    contents.lines().filter_map(parse_conf_line).collect()
}

fn parse_conf_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let name_end = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let name = line[..name_end].to_lowercase();
    let rest = line[name_end..].trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim_start();

    let value = match rest.strip_prefix('\'') {
        Some(quoted) => unquote_conf_value(quoted),
        None => rest.split('#').next().unwrap_or("").trim().to_string(),
    };

    Some((name, value))
}

/// Decode a quoted configuration value up to its closing quote.
///
/// Understands `''`, the C escapes `\b \f \n \r \t`, octal `\ooo`, and
/// `\x` for any other `x`.
fn unquote_conf_value(quoted: &str) -> String {
    let mut value = String::new();
    let mut chars = quoted.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if chars.peek() == Some(&'\'') => {
                chars.next();
                value.push('\'');
            }
            '\'' => break,
            '\\' => match chars.next() {
                Some('b') => value.push('\u{8}'),
                Some('f') => value.push('\u{c}'),
                Some('n') => value.push('\n'),
                Some('r') => value.push('\r'),
                Some('t') => value.push('\t'),
                Some(d @ '0'..='7') => {
                    let mut code = d.to_digit(8).unwrap_or(0);
                    for _ in 0..2 {
                        match chars.peek().and_then(|c| c.to_digit(8)) {
                            Some(digit) => {
                                code = code * 8 + digit;
                                chars.next();
                            }
                            None => break,
                        }
                    }
                    value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                }
                Some(other) => value.push(other),
                None => value.push('\\'),
            },
            _ => value.push(c),
        }
    }
    value
}

/// Quote a value for a configuration file line. Backslashes are escapes
/// there, unlike in SQL literals.
pub fn quote_conf_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Look up the effective value of `name` (last assignment wins)
pub fn lookup<'a>(entries: &'a [(String, String)], name: &str) -> Option<&'a str> {
    entries
        .iter()
        .rev()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Apply a statement to auto.conf entries, keeping one line per setting
pub fn apply(entries: &mut Vec<(String, String)>, statement: &Statement) {
    match statement {
        Statement::AlterSystemSet { name, value } => {
            entries.retain(|(key, _)| key != name);
            entries.push((name.clone(), value.clone()));
        }
        Statement::AlterSystemReset { name } => entries.retain(|(key, _)| key != name),
    }
}

pub fn render_auto_conf(entries: &[(String, String)]) -> String {
    let mut out = String::from(AUTO_CONF_HEADER);
    for (name, value) in entries {
        out.push_str(&format!("{} = {}\n", name, quote_conf_value(value)));
    }
    out
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_with_quoted_value() {
        let parsed = parse("ALTER SYSTEM SET archive_command = '/bin/false'").unwrap();
        assert_eq!(
            parsed,
            vec![Statement::AlterSystemSet {
                name: "archive_command".to_string(),
                value: "/bin/false".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_set_to_bare_number() {
        let parsed = parse("alter system set autovacuum_freeze_max_age to 100000;").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name(), "autovacuum_freeze_max_age");
    }

    #[test]
    fn test_parse_reset() {
        let parsed = parse("ALTER SYSTEM RESET archive_command").unwrap();
        assert_eq!(
            parsed,
            vec![Statement::AlterSystemReset {
                name: "archive_command".to_string()
            }]
        );
    }

    #[test]
    fn test_embedded_quotes_stay_in_one_statement() {
        let sql = synthesize("archive_command", &quote_literal("echo 'a;b'"));
        let parsed = parse(&sql).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(
            parsed[0],
            Statement::AlterSystemSet {
                name: "archive_command".to_string(),
                value: "echo 'a;b'".to_string(),
            }
        );
    }

    #[test]
    fn test_unquoted_value_can_smuggle_second_statement() {
        let sql = synthesize("work_mem", "1; ALTER SYSTEM SET fsync = off");
        assert_eq!(parse(&sql).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("SELECT 1").is_err());
        assert!(parse("ALTER SYSTEM SET x = 'open").is_err());
        assert!(parse("ALTER SYSTEM SET x = 1 2").is_err());
        assert!(parse("ALTER SYSTEM SET = 1").is_err());
    }

    #[test]
    fn test_parse_conf_lines() {
        let conf = "\
# comment
archive_command = 'cp %p /archive/%f'   # trailing
log_directory log
shared_buffers=128MB
quoted = 'it''s'
";
        let entries = parse_conf(conf);
        assert_eq!(lookup(&entries, "archive_command"), Some("cp %p /archive/%f"));
        assert_eq!(lookup(&entries, "log_directory"), Some("log"));
        assert_eq!(lookup(&entries, "shared_buffers"), Some("128MB"));
        assert_eq!(lookup(&entries, "quoted"), Some("it's"));
    }

    #[test]
    fn test_last_assignment_wins() {
        let entries = parse_conf("port = 5432\nport = 6543\n");
        assert_eq!(lookup(&entries, "port"), Some("6543"));
    }

    #[test]
    fn test_apply_and_render_auto_conf() {
        let mut entries = parse_conf("archive_command = 'cp %p /x'\nwork_mem = '4MB'\n");
        apply(
            &mut entries,
            &Statement::AlterSystemSet {
                name: "archive_command".to_string(),
                value: "/bin/false".to_string(),
            },
        );
        apply(
            &mut entries,
            &Statement::AlterSystemReset {
                name: "work_mem".to_string(),
            },
        );

        let rendered = render_auto_conf(&entries);
        assert!(rendered.starts_with("# Do not edit this file manually!"));
        assert!(rendered.contains("archive_command = '/bin/false'\n"));
        assert!(!rendered.contains("work_mem"));
        assert_eq!(parse_conf(&rendered), entries);
    }

    #[test]
    fn test_conf_escapes_decoded() {
        let entries = parse_conf(
            "a = 'x\\ty'\nb = 'it\\'s'\nc = '\\101\\102'\nd = 'C:\\\\temp'\ne = 'line\\nbreak'\n",
        );
        assert_eq!(lookup(&entries, "a"), Some("x\ty"));
        assert_eq!(lookup(&entries, "b"), Some("it's"));
        assert_eq!(lookup(&entries, "c"), Some("AB"));
        assert_eq!(lookup(&entries, "d"), Some("C:\\temp"));
        assert_eq!(lookup(&entries, "e"), Some("line\nbreak"));
    }

    #[test]
    fn test_backslashes_survive_auto_conf_rewrite() {
        let values = [
            "test ! -f /a\\b",
            "printf '%s\\n' %f >> /tmp/log",
            "trailing\\",
            "C:\\new\\table",
        ];
        let entries: Vec<(String, String)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("setting_{}", i), v.to_string()))
            .collect();

        let rendered = render_auto_conf(&entries);
        assert!(rendered.contains("setting_0 = 'test ! -f /a\\\\b'\n"));
        assert!(rendered.contains("setting_1 = 'printf ''%s\\\\n'' %f >> /tmp/log'\n"));
        assert_eq!(parse_conf(&rendered), entries);
    }
}
