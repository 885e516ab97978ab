//! Derived columns computed during post-processing.

/// Round to `places` decimals on the exact binary value, ties to even:
/// `2.675` → `2.67`, `0.125` → `0.12`.
pub fn round_to(value: f64, places: usize) -> f64 {
    format!("{:.*}", places, value).parse().unwrap_or(value)
}

/// 总访客数: product index ÷ (conversion rate / 100). Unrounded; absent when
/// either input is missing or the rate is zero.
pub fn total_visitors(index: Option<f64>, rate_pct: Option<f64>) -> Option<f64> {
    let rate = rate_pct.filter(|r| *r != 0.0)?;
    Some(index? / (rate / 100.0))
}

/// 手淘占比 in percent: 100 × clicks ÷ estimate, 4 decimals. Absent without
/// a non-zero estimate.
pub fn channel_ratio(clicks: Option<f64>, estimate: Option<f64>) -> Option<f64> {
    let estimate = estimate.filter(|e| *e != 0.0)?;
    Some(round_to(100.0 * clicks? / estimate, 4))
}

pub fn with_percent(s: &str) -> String {
    if s.ends_with('%') { s.to_string() } else { format!("{s}%") }
}

pub fn without_percent(s: &str) -> String {
    s.replace('%', "").trim().to_string()
}
