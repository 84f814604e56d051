//! US-dollar and percentage display formatting.
//!
//! Output matches en-US conventions: `$1,234.56`, `-$0.82`, `+1.45%`.

/// Format as currency with exactly two fractional digits and thousands
/// separators.
pub fn format_usd(value: f64) -> String {
    let value = normalize_zero(value);
    let digits = group_thousands(&format!("{:.2}", value.abs()));
    if value < 0.0 {
        format!("-${digits}")
    } else {
        format!("${digits}")
    }
}

/// Format as currency with an explicit `+` for non-negative values.
pub fn format_signed_usd(value: f64) -> String {
    let value = normalize_zero(value);
    if value >= 0.0 {
        format!("+{}", format_usd(value))
    } else {
        format_usd(value)
    }
}

/// Format a ratio (0.0145 = 1.45%) as a percentage that always shows its sign.
pub fn format_percent(ratio: f64) -> String {
    let percent = normalize_zero(ratio * 100.0);
    format!("{percent:+.2}%")
}

fn normalize_zero(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

fn group_thousands(fixed: &str) -> String {
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed, ""));
    let mut grouped = String::with_capacity(fixed.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if !frac_part.is_empty() {
        grouped.push('.');
        grouped.push_str(frac_part);
    }
    grouped
}
