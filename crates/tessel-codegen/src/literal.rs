//! Literal normalization and quoting for host text

/// Value of an integer literal; out-of-range decimal literals become -1 and
/// hex literals wrap to 32 bits.
pub fn parse_integer(text: &str) -> i32 {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        if hex.is_empty() {
            return 0;
        }
        return match u64::from_str_radix(hex, 16) {
            Ok(v) if v <= u32::MAX as u64 => v as u32 as i32,
            _ => -1,
        };
    }
    match text.parse::<i64>() {
        Ok(v) if v <= i32::MAX as i64 + 1 => v as i32,
        _ => -1,
    }
}

/// Rewrite a float literal as written in guest source (`1.`, `.5`, `1.5f`,
/// `2e3`) into a well-formed host literal.
pub fn normalize_float(text: &str) -> Result<String, String> {
    let trimmed = text.trim_end_matches(['f', 'F']);
    let mut normalized = String::with_capacity(trimmed.len() + 2);
    if trimmed.starts_with('.') {
        normalized.push('0');
    }
    normalized.push_str(trimmed);
    if let Some(dot) = normalized.find('.') {
        let after = normalized[dot + 1..].chars().next();
        if !after.is_some_and(|c| c.is_ascii_digit()) {
            normalized.insert(dot + 1, '0');
        }
    }

    let value: f64 = normalized
        .parse()
        .map_err(|_| format!("malformed float literal '{}'", text))?;
    if !value.is_finite() {
        return Err(format!("float literal '{}' is out of range", text));
    }
    Ok(format_float(value))
}

/// Host text of a float value that always reads back identically
pub fn format_float(value: f64) -> String {
    format!("{:?}", value)
}

/// Quote a string for host text
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Inverse of [`quote`]; returns `None` for text that is not a quoted string
pub fn unquote(text: &str) -> Option<String> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_forms() {
        assert_eq!(normalize_float("1.").unwrap(), "1.0");
        assert_eq!(normalize_float(".5").unwrap(), "0.5");
        assert_eq!(normalize_float("1.5f").unwrap(), "1.5");
        assert_eq!(normalize_float("2e3").unwrap(), "2000.0");
        assert_eq!(normalize_float("1.e2").unwrap(), "100.0");
    }

    #[test]
    fn test_float_out_of_range() {
        assert!(normalize_float("1e999").is_err());
    }

    #[test]
    fn test_integers() {
        assert_eq!(parse_integer("42"), 42);
        assert_eq!(parse_integer("0xFFFFFFFF"), -1);
        assert_eq!(parse_integer("0x10"), 16);
        assert_eq!(parse_integer("99999999999"), -1);
        assert_eq!(parse_integer("2147483648"), i32::MIN);
    }

    #[test]
    fn test_quote_unquote() {
        let text = "say \"hi\"\n\\";
        assert_eq!(unquote(&quote(text)).as_deref(), Some(text));
        assert_eq!(unquote("nope"), None);
    }
}
