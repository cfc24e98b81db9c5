use std::str::FromStr;

/// Parses `"start,end"` (or `"start:end"`) into an increasing pair.
pub fn range_parser(s: &str) -> Result<(f64, f64), String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Range string cannot be empty".to_string());
    }
    let (lo, hi) = s
        .split_once(',')
        .or_else(|| s.split_once(':'))
        .ok_or_else(|| format!("Expected 'start,end', got '{}'", s))?;
    let lo = f64::from_str(lo.trim()).map_err(|e| format!("Invalid range start '{}': {}", lo, e))?;
    let hi = f64::from_str(hi.trim()).map_err(|e| format!("Invalid range end '{}': {}", hi, e))?;
    if !(hi > lo) {
        return Err(format!("Range end must exceed start, got {}..{}", lo, hi));
    }
    Ok((lo, hi))
}

pub fn positive_parser(s: &str) -> Result<f64, String> {
    let s = s.trim();
    f64::from_str(s)
        .map_err(|e| format!("Invalid value '{}': {}", s, e))
        .and_then(|v| {
            if v.is_finite() && v > 0.0 {
                Ok(v)
            } else {
                Err(format!("Value must be positive, got {}", v))
            }
        })
}

pub fn linspace(start: f64, end: f64, num: usize, endpoint: bool) -> Vec<f64> {
    if num == 0 { return Vec::new(); }
    if num == 1 { return vec![start]; }
    let step = if endpoint {
        (end - start) / (num - 1) as f64
    } else {
        (end - start) / num as f64
    };
    (0..num).map(|i| start + i as f64 * step).collect()
}

/// `num` points spaced evenly in log between `start` and `end` inclusive.
pub fn logspace(start: f64, end: f64, num: usize) -> Vec<f64> {
    linspace(start.ln(), end.ln(), num, true)
        .into_iter()
        .map(f64::exp)
        .collect()
}

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a * (1.0 - t) + b * t
}

/// Smallest power of two not below `x` (at least 1).
pub fn next_power_of_two(x: f64) -> usize {
    if !(x > 1.0) {
        return 1;
    }
    (x.ceil() as usize).next_power_of_two()
}

/// Median of `values`, reordering them. Zero for an empty slice.
pub fn median(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}
