const SIZE_UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Human-readable size with 1024-based units and three decimals, e.g. `12.500 MB`.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value > 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.3} {}", SIZE_UNITS[unit])
}

/// Whole mebibytes, truncated.
pub fn whole_megabytes(bytes: u64) -> u64 {
    bytes / 1024 / 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_each_unit() {
        assert_eq!(format_bytes(0), "0.000 B");
        assert_eq!(format_bytes(1024), "1024.000 B");
        assert_eq!(format_bytes(1536), "1.500 KB");
        assert_eq!(format_bytes(12 * 1024 * 1024 + 512 * 1024), "12.500 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.000 GB");
    }

    #[test]
    fn megabytes_truncate() {
        assert_eq!(whole_megabytes(1024 * 1024 - 1), 0);
        assert_eq!(whole_megabytes(150 * 1024 * 1024 + 7), 150);
    }
}
