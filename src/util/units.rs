//! Units formatting and conversion utilities
//!
//! Provides functions for human-readable formatting of counts, rates and
//! durations shown by the command line driver.

use std::time::Duration;

/// Format an integer with thousands separators
///
/// # Examples
/// ```
/// use cgrb::util::units::format_count;
///
/// assert_eq!(format_count(999), "999");
/// assert_eq!(format_count(1234567), "1,234,567");
/// ```
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(c);
    }

    formatted
}

/// Scale a value with SI prefixes (K, M, G, T)
///
/// # Examples
/// ```
/// use cgrb::util::units::format_si;
///
/// assert_eq!(format_si(1500.0), "1.50K");
/// assert_eq!(format_si(2500000.0), "2.50M");
/// ```
pub fn format_si(value: f64) -> String {
    const PREFIXES: &[&str] = &["", "K", "M", "G", "T", "P"];
    const THRESHOLD: f64 = 1000.0;

    let mut scaled = value;
    let mut prefix_index = 0;

    while scaled.abs() >= THRESHOLD && prefix_index < PREFIXES.len() - 1 {
        scaled /= THRESHOLD;
        prefix_index += 1;
    }

    if prefix_index == 0 {
        format!("{:.0}", scaled)
    } else {
        format!("{:.2}{}", scaled, PREFIXES[prefix_index])
    }
}

/// Format a prime counting rate
///
/// # Examples
/// ```
/// use cgrb::util::units::format_prime_rate;
///
/// assert_eq!(format_prime_rate(1_250_000.0), "1.25M primes/s");
/// ```
pub fn format_prime_rate(primes_per_second: f64) -> String {
    format!("{} primes/s", format_si(primes_per_second))
}

/// Format a floating point rate given in GFLOPS
///
/// # Examples
/// ```
/// use cgrb::util::units::format_flops;
///
/// assert_eq!(format_flops(512.0), "512.00 GFLOPS");
/// assert_eq!(format_flops(12_500.0), "12.50 TFLOPS");
/// ```
pub fn format_flops(gflops: f64) -> String {
    if gflops >= 1000.0 {
        format!("{:.2} TFLOPS", gflops / 1000.0)
    } else if gflops >= 1.0 {
        format!("{:.2} GFLOPS", gflops)
    } else {
        format!("{:.2} MFLOPS", gflops * 1000.0)
    }
}

/// Format duration into human-readable string
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use cgrb::util::units::format_duration;
///
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 3600 {
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if total_secs >= 60 {
        let minutes = total_secs / 60;
        let seconds = total_secs % 60;
        format!("{}m {}s", minutes, seconds)
    } else if total_secs > 0 {
        if millis > 0 {
            format!("{}.{:02}s", total_secs, millis / 10)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        format!("{}ms", millis)
    }
}

/// Parse duration string into Duration
///
/// Accepts anything humantime does: "30s", "1m 30s", "2min", "500ms"
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use cgrb::util::units::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(input.trim())
        .map_err(|e| format!("Invalid duration '{}': {}", input.trim(), e))?;

    if duration.is_zero() {
        return Err("Duration must be greater than 0".to_string());
    }

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(100), "100");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(78498), "78,498");
        assert_eq!(format_count(u64::MAX), "18,446,744,073,709,551,615");
    }

    #[test]
    fn test_format_si() {
        assert_eq!(format_si(0.0), "0");
        assert_eq!(format_si(999.0), "999");
        assert_eq!(format_si(1000.0), "1.00K");
        assert_eq!(format_si(3_400_000_000.0), "3.40G");
    }

    #[test]
    fn test_format_flops() {
        assert_eq!(format_flops(0.5), "500.00 MFLOPS");
        assert_eq!(format_flops(1.0), "1.00 GFLOPS");
        assert_eq!(format_flops(2500.0), "2.50 TFLOPS");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m 0s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 2m ").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));

        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("1x").is_err());
        assert!(parse_duration("0s").is_err());
    }
}
