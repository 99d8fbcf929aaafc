use chrono::{Local, TimeZone, Utc};

/// `HH:MM:SS`; hours keep growing past 99.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

const DATE_TIME_FORMAT: &str = "%d/%m/%Y, %H:%M";

fn format_in<Tz: TimeZone>(tz: &Tz, millis: i64) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match tz.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.format(DATE_TIME_FORMAT).to_string(),
        None => String::new(),
    }
}

/// `dd/MM/yyyy, HH:mm` in the local time zone.
pub fn format_date_time(millis: i64) -> String {
    format_in(&Local, millis)
}

pub fn format_date_time_utc(millis: i64) -> String {
    format_in(&Utc, millis)
}

/// Distance for display: meters below 1 km, kilometers with two decimals above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(59), "00:00:59");
        assert_eq!(format_duration(3725), "01:02:05");
        assert_eq!(format_duration(360_000), "100:00:00");
    }

    #[test]
    fn test_format_date_time_utc() {
        // 2024-03-09T14:05:00Z
        assert_eq!(format_date_time_utc(1_709_993_100_000), "09/03/2024, 14:05");
        assert_eq!(format_date_time_utc(0), "01/01/1970, 00:00");
    }

    #[test]
    fn test_format_date_time_local_shape() {
        let formatted = format_date_time(1_709_993_100_000);
        assert_eq!(formatted.len(), "dd/MM/yyyy, HH:mm".len());
        assert_eq!(&formatted[2..3], "/");
        assert_eq!(&formatted[10..12], ", ");
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(999.4), "999 m");
        assert_eq!(format_distance(5000.0), "5.00 km");
    }
}
