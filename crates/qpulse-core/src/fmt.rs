//! Shared formatting helpers.
//!
//! All pure formatting functions live here. Functions that differ between
//! compact table columns and verbose detail output are parameterized via
//! [`FmtStyle`].

/// Controls compact (table columns) vs verbose (detail views) output.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FmtStyle {
    /// Compact: `"1.5s"`, `"2.0m"`, `"120ms"`
    Compact,
    /// Detail: `"1.5s"`, `"120ms"`, `"0.4ms"`
    Detail,
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Format milliseconds as human-readable.
///
/// Compact: has minute case (`>= 60_000` -> `"1.5m"`)
/// Detail:  no minute case, has sub-ms case (`< 1.0` -> `"0.5ms"`)
pub fn format_ms(ms: f64, style: FmtStyle) -> String {
    match style {
        FmtStyle::Compact => {
            if ms >= 60_000.0 {
                format!("{:.1}m", ms / 60_000.0)
            } else if ms >= 1_000.0 {
                format!("{:.1}s", ms / 1_000.0)
            } else {
                format!("{:.0}ms", ms)
            }
        }
        FmtStyle::Detail => {
            if ms >= 1000.0 {
                format!("{:.1}s", ms / 1000.0)
            } else if ms >= 1.0 {
                format!("{:.0}ms", ms)
            } else {
                format!("{:.1}ms", ms)
            }
        }
    }
}

/// Parse a duration-like string into milliseconds.
///
/// Accepts the forms produced by [`format_ms`] (`"120ms"`, `"4.2s"`,
/// `"1.5m"`) plus `"us"`, `"h"` suffixes and bare numbers (taken as ms).
/// Returns `None` for anything else.
pub fn parse_duration_ms(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (num, factor) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix("us") {
        (n, 0.001)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000.0)
    } else {
        (s, 1.0)
    };
    num.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v * factor)
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

/// Format ops-per-second rate, `"~"` prefix for approximate values.
pub fn format_rate(rate: u64, approximate: bool) -> String {
    let body = if rate >= 1_000_000 {
        format!("{:.1}M/s", rate as f64 / 1_000_000.0)
    } else if rate >= 1_000 {
        format!("{:.1}K/s", rate as f64 / 1_000.0)
    } else {
        format!("{}/s", rate)
    };
    if approximate { format!("~{}", body) } else { body }
}

/// Format `Option<f64>` with precision, `"--"` for `None`.
pub fn format_opt_f64(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(v) => format!("{:.prec$}", v, prec = precision),
        None => "--".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Text normalization
// ---------------------------------------------------------------------------

/// Truncate string to `max_chars` characters with unicode ellipsis (`…`).
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Normalize text for single-line display with whitespace collapsing.
pub fn normalize_for_display(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                result.push(' ');
            }
            prev_space = true;
        } else {
            result.push(ch);
            prev_space = false;
        }
    }
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_ms_styles() {
        assert_eq!(format_ms(120.0, FmtStyle::Compact), "120ms");
        assert_eq!(format_ms(4200.0, FmtStyle::Compact), "4.2s");
        assert_eq!(format_ms(90_000.0, FmtStyle::Compact), "1.5m");
        assert_eq!(format_ms(0.4, FmtStyle::Detail), "0.4ms");
        assert_eq!(format_ms(90_000.0, FmtStyle::Detail), "90.0s");
    }

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration_ms("123ms"), Some(123.0));
        assert_eq!(parse_duration_ms("4.2s"), Some(4200.0));
        assert_eq!(parse_duration_ms("1.5m"), Some(90_000.0));
        assert_eq!(parse_duration_ms("2h"), Some(7_200_000.0));
        assert_eq!(parse_duration_ms("500us"), Some(0.5));
        assert_eq!(parse_duration_ms(" 42 "), Some(42.0));
        assert_eq!(parse_duration_ms("fast"), None);
        assert_eq!(parse_duration_ms(""), None);
    }

    #[test]
    fn parse_inverts_compact_format() {
        for ms in [5.0, 999.0, 1500.0, 42_000.0, 120_000.0] {
            let text = format_ms(ms, FmtStyle::Compact);
            let back = parse_duration_ms(&text).unwrap();
            assert!((back - ms).abs() / ms < 0.05, "{text} -> {back}");
        }
    }

    #[test]
    fn rate_marks_approximation() {
        assert_eq!(format_rate(12, false), "12/s");
        assert_eq!(format_rate(1500, true), "~1.5K/s");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("조회 쿼리 테스트", 4), "조회 …");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(
            normalize_for_display("SELECT *\n\tFROM   t\r\n"),
            "SELECT * FROM t"
        );
    }
}
