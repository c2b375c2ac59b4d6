//! Utility functions

const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// transform bytes into a human readable format.
pub fn to_human_readable(n: u64) -> String {
    if n < 1000 {
        return format!("{n} B");
    }

    let mut n = n as f64;
    let mut unit = 0;

    while (n * 10.0).round() / 10.0 >= 1000.0 && unit < UNITS.len() - 1 {
        n /= 1000.0;
        unit += 1;
    }

    format!("{n:.2} {}", UNITS[unit])
}

/// How much of `total` is `done`, from 0 to 100.
pub fn percentage(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    done as f64 / total as f64 * 100.0
}
