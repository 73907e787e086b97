use crate::id_mask::IdMask;
use crate::osm::{OsmNode, OsmWay, TagFilter};
use crate::pipeline::{Handler, Pipeline};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const CSV_HEADER: [&str; 7] = ["source", "id", "layer", "lat", "lon", "street", "cross_street"];

/// One intersection between two differently named roads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossroadRow {
    pub source: String,
    pub id: String,
    pub layer: String,
    pub lat: String,
    pub lon: String,
    pub street: String,
    pub cross_street: String,
}

#[derive(Default)]
struct CrossroadState {
    node_ways: HashMap<i64, Vec<i64>>,
    way_names: HashMap<i64, String>,
    coords: HashMap<i64, (f64, f64)>,
}

/// Two-pass intersection detector.
///
/// Pass 1 builds node -> ways adjacency for road ways, the caller trims nodes
/// touched by fewer than two ways and advances the pass, then pass 2 collects
/// coordinates for the nodes that remain.
pub struct Crossroads {
    filter: TagFilter,
    pass: u32,
    junctions: IdMask,
    state: Mutex<CrossroadState>,
}

impl Crossroads {
    pub fn new(filter: TagFilter) -> Self {
        Crossroads {
            filter,
            pass: 1,
            junctions: IdMask::new(),
            state: Mutex::new(CrossroadState::default()),
        }
    }

    pub fn next_pass(&mut self) {
        self.pass += 1;
    }

    fn lock(&self) -> MutexGuard<'_, CrossroadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every node referenced by fewer than two ways. Returns how many remain.
    pub fn trim_non_intersections(&mut self) -> usize {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.node_ways.retain(|_, ways| ways.len() >= 2);
        for &node_id in state.node_ways.keys() {
            self.junctions.mark(node_id);
        }
        state.node_ways.len()
    }

    /// Emit one row per unordered pair of distinct, differently named ways at each junction.
    ///
    /// Junctions are visited by ascending node id and way ids within a junction ascend,
    /// so output is stable across runs.
    pub fn rows(&self) -> Vec<CrossroadRow> {
        let state = self.lock();

        let mut node_ids: Vec<i64> = state
            .node_ways
            .iter()
            .filter(|(_, ways)| ways.len() > 1)
            .map(|(&node_id, _)| node_id)
            .collect();
        node_ids.sort_unstable();

        let mut rows = Vec::new();
        for node_id in node_ids {
            let Some(&(lat, lon)) = state.coords.get(&node_id) else {
                warn!("Intersection node {} not found in file", node_id);
                continue;
            };

            let mut ways = state.node_ways[&node_id].clone();
            ways.sort_unstable();

            for (i, &way_a) in ways.iter().enumerate() {
                for &way_b in &ways[i + 1..] {
                    let name_a = state.way_names.get(&way_a).map(String::as_str).unwrap_or("");
                    let name_b = state.way_names.get(&way_b).map(String::as_str).unwrap_or("");
                    if way_a == way_b || name_a.is_empty() || name_b.is_empty() || name_a == name_b {
                        continue;
                    }
                    rows.push(CrossroadRow {
                        source: "osm".to_string(),
                        id: format!("w{}-n{}-w{}", way_a, node_id, way_b),
                        layer: "intersection".to_string(),
                        lat: format!("{:.6}", lat),
                        lon: format!("{:.6}", lon),
                        street: name_a.to_string(),
                        cross_street: name_b.to_string(),
                    });
                }
            }
        }
        rows
    }
}

impl Handler for Crossroads {
    fn node(&self, node: &OsmNode) -> Result<()> {
        if self.pass == 2 && self.junctions.contains(node.id) {
            self.lock().coords.insert(node.id, (node.lat, node.lon));
        }
        Ok(())
    }

    fn way(&self, way: &OsmWay) -> Result<()> {
        if self.pass != 1 || !self.filter.matches(&way.tags) {
            return Ok(());
        }

        let mut state = self.lock();
        state.way_names.insert(way.id, way.name().to_string());
        for &node_id in &way.node_refs {
            let ways = state.node_ways.entry(node_id).or_default();
            if !ways.contains(&way.id) {
                ways.push(way.id);
            }
        }
        Ok(())
    }
}

/// Write the header and rows as CSV. Failed rows are logged and skipped.
pub fn write_rows<W: Write>(writer: W, rows: &[CrossroadRow]) -> usize {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    if let Err(e) = csv_writer.write_record(CSV_HEADER) {
        warn!("Failed to write CSV header: {}", e);
    }

    let mut written = 0usize;
    for row in rows {
        match csv_writer.serialize(row) {
            Ok(()) => written += 1,
            Err(e) => warn!("Failed to write crossroad {}: {}", row.id, e),
        }
    }

    if let Err(e) = csv_writer.flush() {
        warn!("Failed to flush crossroad output: {}", e);
    }
    written
}

/// Full crossroad workflow: two passes over `input`, CSV to `output` or stdout.
pub fn run_crossroads(input: &Path, output: Option<&Path>, filter: TagFilter) -> Result<()> {
    let mut pipeline = Pipeline::open(input)?;
    let mut detector = Crossroads::new(filter);

    info!("Pass 1: Collecting road ways...");
    pipeline.traverse(&detector)?;
    let junctions = detector.trim_non_intersections();
    info!("Found {} candidate intersection nodes", junctions);

    pipeline.rewind()?;
    detector.next_pass();

    info!("Pass 2: Collecting intersection coordinates...");
    pipeline.traverse(&detector)?;

    let rows = detector.rows();
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stdout()),
    };
    let written = write_rows(writer, &rows);
    info!("Wrote {} crossroads", written);
    Ok(())
}
