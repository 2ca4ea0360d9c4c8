use std::time::Duration;

/// Parses a duration string such as "500ms", "30s", "10m", "5h", "3d".
///
/// A bare integer is taken as seconds, so `TEST_DURATION=30` works the same
/// as `TEST_DURATION=30s`.
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let (value_str, unit) = split_unit(s);

    let value: u64 = value_str
        .parse()
        .map_err(|_| format!("Invalid numeric value in duration: '{}'", value_str))?;

    let secs_per_unit: u64 = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                other
            ))
        }
    };

    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration value too large: '{}'", s))
}

fn split_unit(s: &str) -> (&str, &str) {
    let idx = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    (&s[..idx], &s[idx..])
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "Connection:keep-alive,Keep-Alive:timeout=5\,max=200"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => {
                if !current.trim().is_empty() {
                    headers.push(std::mem::take(&mut current));
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if !current.trim().is_empty() {
        headers.push(current);
    }

    headers
}
