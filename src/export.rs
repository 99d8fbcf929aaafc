use chrono::{SecondsFormat, TimeZone, Utc};
use serde::Serialize;

use crate::format;
use crate::types::TrackingSession;

/// GPX track format for mapping applications
#[derive(Debug, Serialize)]
pub struct GpxTrack {
    pub name: String,
    pub description: String,
    pub track_points: Vec<GpxPoint>,
}

#[derive(Debug, Serialize)]
pub struct GpxPoint {
    pub lat: f64,
    pub lon: f64,
    /// RFC 3339, UTC
    pub time: String,
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn rfc3339(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

impl GpxTrack {
    pub fn from_session(session: &TrackingSession) -> Self {
        let name = if session.title.trim().is_empty() {
            format!("Session {}", format::format_date_time_utc(session.start_time_millis))
        } else {
            session.title.clone()
        };

        GpxTrack {
            name,
            description: format!(
                "{} over {}, {} steps",
                format::format_distance(session.distance_meters),
                format::format_duration(session.duration_seconds),
                session.steps
            ),
            track_points: session
                .points
                .iter()
                .map(|p| GpxPoint {
                    lat: p.latitude,
                    lon: p.longitude,
                    time: rfc3339(p.timestamp_millis),
                })
                .collect(),
        }
    }

    /// Generate GPX document XML string
    pub fn to_gpx_xml(&self) -> String {
        let name = escape_xml(&self.name);
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<gpx version=\"1.1\" creator=\"path_tracker\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n");
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>{}</name>\n", name));
        xml.push_str(&format!("    <desc>{}</desc>\n", escape_xml(&self.description)));
        xml.push_str("  </metadata>\n");
        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>{}</name>\n", name));
        xml.push_str("    <trkseg>\n");

        for point in &self.track_points {
            xml.push_str(&format!("      <trkpt lat=\"{}\" lon=\"{}\">\n", point.lat, point.lon));
            xml.push_str(&format!("        <time>{}</time>\n", point.time));
            xml.push_str("      </trkpt>\n");
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");

        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionPoint;

    fn session(title: &str) -> TrackingSession {
        TrackingSession {
            id: "abc".to_string(),
            title: title.to_string(),
            start_time_millis: 0,
            duration_seconds: 65,
            distance_meters: 120.0,
            average_speed_kmh: 6.6,
            steps: 150,
            points: vec![
                SessionPoint::new(40.0, -120.0, 0),
                SessionPoint::new(40.01, -120.01, 1_500),
            ],
        }
    }

    #[test]
    fn test_gpx_generation() {
        let xml = GpxTrack::from_session(&session("Ridge & valley")).to_gpx_xml();

        assert!(xml.contains("<name>Ridge &amp; valley</name>"));
        assert!(xml.contains("<trkpt lat=\"40.01\" lon=\"-120.01\">"));
        assert!(xml.contains("<time>1970-01-01T00:00:01.500Z</time>"));
        assert!(xml.contains("<desc>120 m over 00:01:05, 150 steps</desc>"));
        assert_eq!(xml.matches("<trkpt").count(), 2);
    }

    #[test]
    fn test_untitled_session_named_by_date() {
        let track = GpxTrack::from_session(&session("  "));
        assert_eq!(track.name, "Session 01/01/1970, 00:00");
    }
}
