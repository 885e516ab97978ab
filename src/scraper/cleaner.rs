// ── Text cleanup ──────────────────────────────────────────────────────────────

/// Trim every text node and join them, the way the cards render visually.
/// `[" 1,234 ", "\n"]` → `"1,234"`
pub fn clean_text<'a>(pieces: impl Iterator<Item = &'a str>) -> String {
    pieces.map(str::trim).collect()
}

/// `Some(s)` only when `s` has visible content.
pub fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

/// Parse a displayed number: `%`, thousands separators and whitespace are
/// ignored. `"25%"` → 25.0 | `"1,234"` → 1234.0 | `"-"` → None
pub fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| *c != '%' && *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text([" 1,234 ", "\n", "次"].into_iter()), "1,234次");
        assert_eq!(clean_text(std::iter::empty()), "");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("25%"), Some(25.0));
        assert_eq!(parse_number(" 1,234.5 "), Some(1234.5));
        assert_eq!(parse_number("0"), Some(0.0));
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("加载中"), None);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  ".into()), None);
        assert_eq!(non_empty("杯子".into()), Some("杯子".into()));
    }
}
