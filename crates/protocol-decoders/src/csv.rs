//! Minimal quoted-field CSV splitting for the result-monitor line format.
//! Fields may be bare or double-quoted (quoted fields may contain commas).

pub fn split_fields(input: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

pub fn parse_seconds_to_ms(field: &str) -> Option<i64> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    field.parse::<f64>().ok().map(|secs| (secs * 1000.0).round() as i64)
}

pub fn non_empty(field: &str) -> Option<String> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bare_and_quoted_fields() {
        let fields = split_fields(r#"H,42,1,"600.000",600.000"#);
        assert_eq!(fields, vec!["H", "42", "1", "600.000", "600.000"]);
    }

    #[test]
    fn parses_seconds_to_milliseconds() {
        assert_eq!(parse_seconds_to_ms("600.000"), Some(600_000));
        assert_eq!(parse_seconds_to_ms(""), None);
    }
}
