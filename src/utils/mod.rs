use rust_decimal::{Decimal, RoundingStrategy};
use std::time::{Duration, Instant};
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.elapsed()
        );
    }
}

/// Insert thousands separators into a run of ASCII digits.
fn group_digits(digits: &str) -> String {
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result
}

/// Format a decimal with thousands separators and at most `max_dp` decimals,
/// dropping trailing zeros below `min_dp`.
pub fn fmt_decimal(value: Decimal, min_dp: u32, max_dp: u32) -> String {
    let rounded = value.round_dp_with_strategy(max_dp, RoundingStrategy::MidpointAwayFromZero);
    let mut s = rounded.abs().normalize().to_string();

    let (int_part, mut frac) = match s.find('.') {
        Some(i) => (s[..i].to_string(), s[i + 1..].to_string()),
        None => (std::mem::take(&mut s), String::new()),
    };
    while frac.len() < min_dp as usize {
        frac.push('0');
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    if frac.is_empty() {
        format!("{}{}", sign, group_digits(&int_part))
    } else {
        format!("{}{}.{}", sign, group_digits(&int_part), frac)
    }
}

/// "$1,234.56" | "-$12.00"
pub fn fmt_usd(value: Decimal) -> String {
    let s = fmt_decimal(value, 2, 2);
    match s.strip_prefix('-') {
        Some(rest) => format!("-${}", rest),
        None => format!("${}", s),
    }
}

/// "+ 12.50%" | "- 3.10%" | "0.00%"
pub fn fmt_change(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let body = fmt_decimal(rounded.abs(), 2, 2);
    if rounded.is_zero() {
        format!("{}%", body)
    } else if rounded.is_sign_positive() {
        format!("+ {}%", body)
    } else {
        format!("- {}%", body)
    }
}

/// Coin amounts: up to 8 decimals, no padding.
pub fn fmt_amount(value: Decimal) -> String {
    fmt_decimal(value, 0, 8)
}
