//! Static map image URLs for a session's path.

use crate::config::MapConfig;
use crate::types::SessionPoint;

const PATH_STYLE: &str = "color:0xff0000ff|weight:5";
const START_MARKER: &str = "color:green|label:S";
const END_MARKER: &str = "color:red|label:E";

fn coord(point: &SessionPoint) -> String {
    format!("{},{}", point.latitude, point.longitude)
}

/// Empty string when there are no points.
pub fn build_static_map_url(
    points: &[SessionPoint],
    base_url: &str,
    width: u32,
    height: u32,
    api_key: &str,
) -> String {
    let (Some(start), Some(end)) = (points.first(), points.last()) else {
        return String::new();
    };

    let path = points.iter().map(coord).collect::<Vec<_>>().join("|");

    format!(
        "{base}?size={width}x{height}&path={PATH_STYLE}|{path}&markers={START_MARKER}|{start}&markers={END_MARKER}|{end}&key={api_key}",
        base = base_url.trim_end_matches('?'),
        start = coord(start),
        end = coord(end),
    )
}

/// Same as [`build_static_map_url`] with size, endpoint and key from config.
pub fn static_map_url(points: &[SessionPoint], config: &MapConfig) -> String {
    build_static_map_url(
        points,
        &config.base_url,
        config.width,
        config.height,
        &config.resolved_api_key(),
    )
}
