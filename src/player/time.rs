/// Format a position in seconds as `MM:SS`, or `H:MM:SS` once an hour is
/// reached. Fractional seconds are truncated; negative and non-finite input
/// reads as zero.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };

    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;

    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

/// `elapsed/duration` as shown next to the transport. An unknown duration
/// reads `--:--`.
pub fn format_progress(position: f64, duration: Option<f64>) -> String {
    let total = match duration {
        Some(d) => format_time(d),
        None => "--:--".to_string(),
    };
    format!("{}/{}", format_time(position), total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(59.0), "00:59");
        assert_eq!(format_time(60.0), "01:00");
        assert_eq!(format_time(599.0), "09:59");
        assert_eq!(format_time(3599.0), "59:59");
    }

    #[test]
    fn hours_are_not_padded() {
        assert_eq!(format_time(3661.0), "1:01:01");
        assert_eq!(format_time(36000.0), "10:00:00");
    }

    #[test]
    fn fractions_truncate_instead_of_rolling_over() {
        assert_eq!(format_time(59.6), "00:59");
        assert_eq!(format_time(0.999), "00:00");
    }

    #[test]
    fn garbage_input_reads_as_zero() {
        assert_eq!(format_time(-3.0), "00:00");
        assert_eq!(format_time(f64::NAN), "00:00");
        assert_eq!(format_time(f64::INFINITY), "00:00");
    }

    #[test]
    fn monotonic_within_an_hour_bucket() {
        let mut previous = format_time(3600.0);
        for tenth in 36001..72000u32 {
            let current = format_time(tenth as f64 / 10.0);
            assert!(current >= previous, "{current} < {previous}");
            previous = current;
        }
    }

    #[test]
    fn progress_label() {
        assert_eq!(format_progress(61.0, Some(3661.0)), "01:01/1:01:01");
        assert_eq!(format_progress(5.0, None), "00:05/--:--");
    }
}
