use crate::id_mask::IdMask;
use crate::osm::{OsmWay, TagFilter};
use crate::pipeline::Handler;
use crate::scratch_store::{ScratchStore, WayRow, decode_coordinate};
use anyhow::Result;
use geo::{Coord, LineString};
use log::{debug, info, warn};
use thiserror::Error;

/// A named road centerline; x is longitude, y is latitude.
#[derive(Debug, Clone, PartialEq)]
pub struct Street {
    pub name: String,
    pub path: LineString<f64>,
}

impl Street {
    pub fn new(name: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Street {
            name: name.into(),
            path: LineString::from(points),
        }
    }
}

/// Per-way problems found while rebuilding geometry. None of them stop a run.
#[derive(Debug, Error, PartialEq)]
pub enum WayError {
    #[error("invalid way {0}, nodes not included in file")]
    MissingNodes(i64),
    #[error("way {way}: stored coordinate at index {index} is not a number")]
    BadCoordinate { way: i64, index: usize },
    #[error("way {way}: {points} usable point(s) cannot form a line")]
    Degenerate { way: i64, points: usize },
}

/// First-pass handler for the merge workflow.
///
/// Road ways go to `sink` and every node they reference is marked in `node_mask`
/// so the second pass can keep just those nodes.
pub struct Streets<'a, H> {
    filter: TagFilter,
    node_mask: &'a IdMask,
    sink: H,
}

impl<'a, H: Handler> Streets<'a, H> {
    pub fn new(filter: TagFilter, node_mask: &'a IdMask, sink: H) -> Self {
        Streets {
            filter,
            node_mask,
            sink,
        }
    }
}

impl<H: Handler> Handler for Streets<'_, H> {
    fn way(&self, way: &OsmWay) -> Result<()> {
        if !self.filter.matches(&way.tags) {
            return Ok(());
        }
        for &node_id in &way.node_refs {
            self.node_mask.mark(node_id);
        }
        self.sink.way(way)
    }
}

/// Rebuild one street from a stored way.
pub fn street_from_row(row: &WayRow<'_>) -> Result<Street, WayError> {
    let Some(values) = &row.coordinates else {
        return Err(WayError::MissingNodes(row.id));
    };

    let mut coords = Vec::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        let (x, y) = decode_coordinate(value).ok_or(WayError::BadCoordinate {
            way: row.id,
            index,
        })?;
        coords.push(Coord { x, y });
    }

    if coords.len() < 2 {
        return Err(WayError::Degenerate {
            way: row.id,
            points: coords.len(),
        });
    }

    Ok(Street {
        name: row.name.clone().unwrap_or_default(),
        path: LineString::new(coords),
    })
}

/// Read every stored way, ascending by id, into a street list.
pub fn load_streets(store: &ScratchStore) -> Result<Vec<Street>> {
    let mut streets = Vec::new();
    let mut skipped = 0usize;

    store.for_each_way(|row| {
        match street_from_row(&row) {
            Ok(street) => streets.push(street),
            Err(e @ WayError::Degenerate { .. }) => debug!("{}", e),
            Err(e) => {
                warn!("{}", e);
                skipped += 1;
            }
        }
        Ok(())
    })?;

    info!(
        "Reconstructed {} streets ({} ways skipped)",
        streets.len(),
        skipped
    );
    Ok(streets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratch_store::StoreRecord;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn named_way(id: i64, node_refs: Vec<i64>, name: Option<&str>) -> StoreRecord {
        StoreRecord::Way {
            id,
            node_refs,
            name: name.map(str::to_string),
        }
    }

    fn node(id: i64, lon: f64, lat: f64) -> StoreRecord {
        StoreRecord::Node { id, lon, lat }
    }

    #[test]
    fn test_single_point_way_is_discarded() -> Result<()> {
        let store = ScratchStore::create(None)?;
        store.write_all(&[node(5, 1.0, 1.0), named_way(1, vec![5], Some("Short St"))])?;

        assert!(load_streets(&store)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_way_with_absent_nodes_is_skipped() -> Result<()> {
        let store = ScratchStore::create(None)?;
        store.write_all(&[
            node(1, 0.0, 0.0),
            node(2, 0.0, 1.0),
            named_way(1, vec![9], Some("Gone Rd")),
            named_way(2, vec![1, 2], Some("Here Rd")),
        ])?;

        let mut errors = Vec::new();
        store.for_each_way(|row| {
            if let Err(e) = street_from_row(&row) {
                errors.push(e);
            }
            Ok(())
        })?;
        assert_eq!(errors, vec![WayError::MissingNodes(1)]);

        let streets = load_streets(&store)?;
        assert_eq!(streets.len(), 1);
        assert_eq!(streets[0].name, "Here Rd");
        Ok(())
    }

    #[test]
    fn test_unnamed_way_gets_empty_name() -> Result<()> {
        let store = ScratchStore::create(None)?;
        store.write_all(&[
            node(1, 0.5, 0.25),
            node(2, 0.75, 0.5),
            named_way(3, vec![2, 1], None),
        ])?;

        let streets = load_streets(&store)?;
        assert_eq!(streets, vec![Street::new("", vec![(0.75, 0.5), (0.5, 0.25)])]);
        Ok(())
    }

    #[test]
    fn test_bad_coordinate_reported() {
        let bad = [0u8; 3];
        let good = [1.0f64.to_be_bytes(), 2.0f64.to_be_bytes()].concat();
        let row = WayRow {
            id: 77,
            coordinates: Some(vec![&good[..], &bad[..]]),
            name: Some("Broken Way".to_string()),
        };
        assert_eq!(
            street_from_row(&row),
            Err(WayError::BadCoordinate { way: 77, index: 1 })
        );
    }

    #[derive(Default)]
    struct WayIds(Mutex<Vec<i64>>);

    impl Handler for WayIds {
        fn way(&self, way: &OsmWay) -> Result<()> {
            self.0.lock().unwrap().push(way.id);
            Ok(())
        }
    }

    #[test]
    fn test_streets_handler_marks_road_nodes_only() -> Result<()> {
        let mask = IdMask::new();
        let sink = WayIds::default();
        let handler = Streets::new(TagFilter::roads(false), &mask, &sink);

        let road = OsmWay {
            id: 1,
            node_refs: vec![10, 11],
            tags: HashMap::from([("highway".to_string(), "primary".to_string())]),
        };
        let river = OsmWay {
            id: 2,
            node_refs: vec![20, 21],
            tags: HashMap::from([("waterway".to_string(), "river".to_string())]),
        };
        handler.way(&road)?;
        handler.way(&river)?;

        assert!(mask.contains(10) && mask.contains(11));
        assert!(!mask.contains(20) && !mask.contains(21));
        assert_eq!(*sink.0.lock().unwrap(), vec![1]);
        Ok(())
    }
}
