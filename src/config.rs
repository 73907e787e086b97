use crate::osm::TagFilter;
use std::path::PathBuf;

/// Geometry column encoding for merged streets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreetFormat {
    #[default]
    Polyline,
    Wkt,
    GeoJson,
}

impl StreetFormat {
    /// Case-insensitive; anything unrecognized falls back to polyline.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "wkt" => StreetFormat::Wkt,
            "geojson" => StreetFormat::GeoJson,
            _ => StreetFormat::Polyline,
        }
    }
}

pub const DEFAULT_DELIMITER: &str = "\x00";

#[derive(Debug, Clone, PartialEq)]
pub struct MergeConfig {
    pub format: StreetFormat,
    pub delimiter: String,
    /// Append centroid, length and bounding box columns before the name.
    pub extended_columns: bool,
    /// Treat footways, paths, cycleways and similar as streets too.
    pub include_paths: bool,
    /// Replaces the highway predicate entirely when set.
    pub tag_filter: Option<TagFilter>,
    /// Parent directory for the scratch store; system temp when None.
    pub temp_dir: Option<PathBuf>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            format: StreetFormat::default(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            extended_columns: false,
            include_paths: false,
            tag_filter: None,
            temp_dir: None,
        }
    }
}

impl MergeConfig {
    pub fn road_filter(&self) -> TagFilter {
        self.tag_filter
            .clone()
            .unwrap_or_else(|| TagFilter::roads(self.include_paths))
    }
}
