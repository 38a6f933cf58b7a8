//! Display formatting for readings. One convention everywhere:
//! percentages, rates and temperatures are bare one-decimal strings,
//! byte sizes are GB with two decimals, power is watts with one decimal.

use crate::reading::Reading;

pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
pub const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

fn one_decimal(v: f64) -> Reading {
    if v.is_finite() {
        Reading::Text(format!("{v:.1}"))
    } else {
        Reading::Unavailable
    }
}

/// `50.5` -> `"50.5"`.
pub fn percent(v: f64) -> Reading {
    one_decimal(v)
}

/// Share of `part` in `whole` as a percentage; unavailable when `whole` is zero.
pub fn ratio_percent(part: u64, whole: u64) -> Reading {
    if whole == 0 {
        return Reading::Unavailable;
    }
    percent(part as f64 / whole as f64 * 100.0)
}

/// `17179869184` -> `"16.00 GB"`.
pub fn gigabytes(bytes: u64) -> Reading {
    gigabytes_f(bytes as f64)
}

pub fn gigabytes_f(bytes: f64) -> Reading {
    if bytes.is_finite() && bytes >= 0.0 {
        Reading::Text(format!("{:.2} GB", bytes / BYTES_PER_GB))
    } else {
        Reading::Unavailable
    }
}

/// Vendor tools report memory in MiB.
pub fn mebibytes_as_gigabytes(mib: f64) -> Reading {
    gigabytes_f(mib * BYTES_PER_MIB)
}

/// Bytes per second rendered as KB/s.
pub fn kilobytes_per_sec(bytes_per_sec: f64) -> Reading {
    one_decimal(bytes_per_sec / 1024.0)
}

/// Degrees Celsius.
pub fn celsius(v: f64) -> Reading {
    one_decimal(v)
}

pub fn watts(v: f64) -> Reading {
    if v.is_finite() {
        Reading::Text(format!("{v:.1} W"))
    } else {
        Reading::Unavailable
    }
}
