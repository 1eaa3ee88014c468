use std::collections::HashSet;

/// Shared numeric coercion: trim, parse as f64, reject empty and non-finite input.
pub fn coerce_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Integral values print without a fractional part, everything else uses the
/// shortest round-trip form.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}

/// Gives every repeated label a numeric suffix, skipping names already in use.
pub fn disambiguate_headers(labels: &[String]) -> Vec<String> {
    let mut existing_names: HashSet<String> = HashSet::new();
    let taken: HashSet<&str> = labels.iter().map(String::as_str).collect();

    labels
        .iter()
        .map(|label| {
            if existing_names.insert(label.clone()) {
                return label.clone();
            }

            let mut counter = 1;
            let mut cleaned = format!("{}_{}", label, counter);
            while taken.contains(cleaned.as_str()) || !existing_names.insert(cleaned.clone()) {
                counter += 1;
                cleaned = format!("{}_{}", label, counter);
            }
            cleaned
        })
        .collect()
}

/// Size in megabytes with two decimals.
pub fn file_size_mb(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number("3"), Some(3.0));
        assert_eq!(coerce_number("  -2.5 "), Some(-2.5));
        assert_eq!(coerce_number("1e3"), Some(1000.0));
        assert_eq!(coerce_number(""), None);
        assert_eq!(coerce_number("   "), None);
        assert_eq!(coerce_number("abc"), None);
        assert_eq!(coerce_number("12abc"), None);
        assert_eq!(coerce_number("inf"), None);
        assert_eq!(coerce_number("NaN"), None);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1e20), "100000000000000000000");
    }

    #[test]
    fn test_disambiguate_headers() {
        let labels: Vec<String> = ["name", "value", "name", "name_1", "name"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            disambiguate_headers(&labels),
            vec!["name", "value", "name_2", "name_1", "name_3"]
        );
    }

    #[test]
    fn test_file_size_mb() {
        assert_eq!(file_size_mb(10 * 1024 * 1024), "10.00");
        assert_eq!(file_size_mb(1536), "0.00");
    }
}
