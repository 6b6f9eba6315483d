use crate::prompt::{READ_CALL, READ_STATEMENT};

/// Resolves the read statement for `variable` with `value`.
///
/// Lines are processed in order:
/// - a read statement assigning `variable` becomes a literal assignment, keeping its indent;
/// - a well-formed read statement for another variable is kept for a later round;
/// - any other line still calling `input(` is dropped;
/// - everything else passes through untouched.
pub fn substitute_value(code: &str, variable: &str, value: &str) -> String {
    let assignment = format!("{variable} = {}", literal_for(value));
    let mut lines = Vec::new();
    for line in code.lines() {
        let trimmed = line.trim();
        match READ_STATEMENT.captures(trimmed) {
            Some(cap) if &cap[1] == variable => {
                let indent = &line[..line.len() - line.trim_start().len()];
                lines.push(format!("{indent}{assignment}"));
            }
            Some(_) => lines.push(line.to_owned()),
            None if READ_CALL.is_match(line) => {}
            None => lines.push(line.to_owned()),
        }
    }
    lines.join("\n")
}

/// Numbers are inserted verbatim; anything else becomes a double-quoted string literal.
pub fn literal_for(value: &str) -> String {
    if is_number(value) {
        value.to_owned()
    } else {
        format!("\"{}\"", escape_string(value))
    }
}

/// Numeric text in the float grammar. The spelled-out `inf`/`infinity`/`nan` forms are
/// not Python literals, so they count as text.
pub fn is_number(value: &str) -> bool {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let spelled = ["inf", "infinity", "nan"]
        .iter()
        .any(|word| unsigned.eq_ignore_ascii_case(word));
    !spelled && value.parse::<f64>().is_ok()
}

fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}
