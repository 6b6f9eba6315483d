use std::sync::LazyLock;

use regex::Regex;

/// Accepted read-statement shape, matched against a trimmed line:
/// `NAME = input()`, `NAME = input("...")` or `NAME = input('...')`.
/// Only the start of the line is anchored; trailing text after the call is ignored.
pub(crate) static READ_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(\w+)\s*=\s*input\s*\(\s*(?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)')?\s*\)"#,
    )
    .expect("regex")
});

/// Any call of the read builtin, well-formed statement or not.
pub(crate) static READ_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\binput\s*\(").expect("regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub variable: String,
    pub prompt: String,
}

/// Returns the first unresolved read statement in document order, or `None` when the
/// script is ready to run.
pub fn extract_read_request(code: &str) -> Option<ReadRequest> {
    code.lines().find_map(|line| parse_read_statement(line.trim()))
}

pub(crate) fn parse_read_statement(line: &str) -> Option<ReadRequest> {
    let cap = READ_STATEMENT.captures(line)?;
    let variable = cap[1].to_owned();
    let literal = cap
        .get(2)
        .map(|m| unescape_literal(m.as_str(), '"'))
        .or_else(|| cap.get(3).map(|m| unescape_literal(m.as_str(), '\'')));
    let prompt = match literal {
        Some(text) if !text.is_empty() => text,
        _ => default_prompt(&variable),
    };
    Some(ReadRequest { variable, prompt })
}

pub fn default_prompt(variable: &str) -> String {
    format!("Enter value for {variable}:")
}

fn unescape_literal(raw: &str, quote: char) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some(next) if next == quote || next == '\\' => out.push(next),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
