use crate::config::{MergeConfig, StreetFormat};
use crate::streets::Street;
use anyhow::{Result, anyhow};
use geo::{BoundingRect, Coord, Euclidean, Haversine, InterpolateLine, Length};
use geojson::{Feature, Geometry, JsonObject, Value};
use log::warn;
use std::io::Write;

const POLYLINE_PRECISION: u32 = 6;

pub fn encode_geometry(street: &Street, format: StreetFormat) -> Result<String> {
    match format {
        StreetFormat::Polyline => {
            polyline::encode_coordinates(street.path.coords().copied(), POLYLINE_PRECISION)
                .map_err(|e| anyhow!("Failed to encode polyline for '{}': {}", street.name, e))
        }
        StreetFormat::Wkt => {
            let coords: Vec<String> = street
                .path
                .coords()
                .map(|c| format!("{:.7} {:.7}", c.x, c.y))
                .collect();
            Ok(format!("LINESTRING({})", coords.join(",")))
        }
        StreetFormat::GeoJson => {
            let line = street.path.coords().map(|c| vec![c.x, c.y]).collect();
            let mut properties = JsonObject::new();
            properties.insert("name".to_string(), serde_json::Value::from(street.name.as_str()));
            let feature = Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::LineString(line))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            };
            Ok(serde_json::to_string(&feature)?)
        }
    }
}

/// Point halfway along the path by planar length.
pub fn midpoint(street: &Street) -> Option<Coord> {
    Euclidean
        .point_at_ratio_from_start(&street.path, 0.5)
        .map(|point| point.0)
}

/// Path length in meters over the haversine sphere.
pub fn geodesic_length(street: &Street) -> f64 {
    Haversine.length(&street.path)
}

/// One output line: geometry, optional derived columns, then the name.
pub fn format_street(street: &Street, config: &MergeConfig) -> Result<String> {
    let mut cols = vec![encode_geometry(street, config.format)?];

    if config.extended_columns {
        let centroid = midpoint(street).ok_or_else(|| anyhow!("Street '{}' has no points", street.name))?;
        cols.push(format!("{:.7}", centroid.x));
        cols.push(format!("{:.7}", centroid.y));

        cols.push(format!("{:.0}", geodesic_length(street)));

        let bounds = street
            .path
            .bounding_rect()
            .ok_or_else(|| anyhow!("Street '{}' has no points", street.name))?;
        let (sw, ne) = (bounds.min(), bounds.max());
        cols.push(format!("{:.7}", sw.x));
        cols.push(format!("{:.7}", sw.y));
        cols.push(format!("{:.7}", ne.x));
        cols.push(format!("{:.7}", ne.y));
    }

    cols.push(street.name.clone());
    Ok(cols.join(&config.delimiter))
}

/// Write one line per street. A street that cannot be encoded or written is logged and skipped.
pub fn write_streets<W: Write>(mut writer: W, streets: &[Street], config: &MergeConfig) -> usize {
    let mut written = 0usize;
    for street in streets {
        let line = match format_street(street, config) {
            Ok(line) => line,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        match writeln!(writer, "{}", line) {
            Ok(()) => written += 1,
            Err(e) => warn!("Failed to write street '{}': {}", street.name, e),
        }
    }
    if let Err(e) = writer.flush() {
        warn!("Failed to flush street output: {}", e);
    }
    written
}
