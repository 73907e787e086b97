// Builds tiny uncompressed PBF files for end-to-end tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

fn varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn field_varint(buf: &mut Vec<u8>, field: u64, value: u64) {
    varint(buf, field << 3);
    varint(buf, value);
}

fn field_bytes(buf: &mut Vec<u8>, field: u64, data: &[u8]) {
    varint(buf, (field << 3) | 2);
    varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn field_packed(buf: &mut Vec<u8>, field: u64, values: impl IntoIterator<Item = u64>) {
    let mut packed = Vec::new();
    for value in values {
        varint(&mut packed, value);
    }
    field_bytes(buf, field, &packed);
}

#[derive(Default)]
struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, u64>,
}

impl StringTable {
    fn new() -> Self {
        let mut table = StringTable::default();
        table.id(""); // index 0 is reserved
        table
    }

    fn id(&mut self, s: &str) -> u64 {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = self.strings.len() as u64;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), id);
        id
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for s in &self.strings {
            field_bytes(&mut buf, 1, s.as_bytes());
        }
        buf
    }
}

#[derive(Clone)]
enum Entity {
    Node {
        id: i64,
        lat: f64,
        lon: f64,
    },
    Way {
        id: i64,
        refs: Vec<i64>,
        tags: Vec<(String, String)>,
    },
    Relation {
        id: i64,
        tags: Vec<(String, String)>,
    },
}

/// Collects entities and writes them one block per blob, in insertion order.
#[derive(Default)]
pub struct PbfBuilder {
    blocks: Vec<Vec<Entity>>,
    dense: bool,
}

fn owned_tags(tags: &[(&str, &str)]) -> Vec<(String, String)> {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl PbfBuilder {
    pub fn new() -> Self {
        PbfBuilder::default()
    }

    /// Write nodes as a delta-coded `DenseNodes` group, the way real extracts do.
    pub fn dense(mut self) -> Self {
        self.dense = true;
        self
    }

    /// Start a new block; later entities land in a separate blob.
    pub fn block(mut self) -> Self {
        self.blocks.push(Vec::new());
        self
    }

    fn push(mut self, entity: Entity) -> Self {
        if self.blocks.is_empty() {
            self.blocks.push(Vec::new());
        }
        self.blocks.last_mut().unwrap().push(entity);
        self
    }

    pub fn node(self, id: i64, lat: f64, lon: f64) -> Self {
        self.push(Entity::Node { id, lat, lon })
    }

    pub fn way(self, id: i64, refs: &[i64], tags: &[(&str, &str)]) -> Self {
        self.push(Entity::Way {
            id,
            refs: refs.to_vec(),
            tags: owned_tags(tags),
        })
    }

    pub fn relation(self, id: i64, tags: &[(&str, &str)]) -> Self {
        self.push(Entity::Relation {
            id,
            tags: owned_tags(tags),
        })
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut file = Vec::new();

        let mut header = Vec::new();
        field_bytes(&mut header, 4, b"OsmSchema-V0.6");
        write_blob(&mut file, "OSMHeader", &header);

        for block in self.blocks.iter().filter(|b| !b.is_empty()) {
            write_blob(&mut file, "OSMData", &encode_block(block, self.dense));
        }
        file
    }

    pub fn write(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp PBF");
        file.write_all(&self.bytes()).expect("Failed to write temp PBF");
        file.flush().expect("Failed to flush temp PBF");
        file
    }
}

fn write_blob(file: &mut Vec<u8>, kind: &str, data: &[u8]) {
    let mut blob = Vec::new();
    field_bytes(&mut blob, 1, data); // raw
    field_varint(&mut blob, 2, data.len() as u64); // raw_size

    let mut header = Vec::new();
    field_bytes(&mut header, 1, kind.as_bytes());
    field_varint(&mut header, 3, blob.len() as u64);

    file.extend_from_slice(&(header.len() as u32).to_be_bytes());
    file.extend_from_slice(&header);
    file.extend_from_slice(&blob);
}

fn encode_tags(buf: &mut Vec<u8>, table: &mut StringTable, tags: &[(String, String)]) {
    if tags.is_empty() {
        return;
    }
    let keys: Vec<u64> = tags.iter().map(|(k, _)| table.id(k)).collect();
    let vals: Vec<u64> = tags.iter().map(|(_, v)| table.id(v)).collect();
    field_packed(buf, 2, keys);
    field_packed(buf, 3, vals);
}

fn encode_dense(nodes: &[(i64, i64, i64)]) -> Vec<u8> {
    let deltas = |pick: fn(&(i64, i64, i64)) -> i64| {
        let mut previous = 0i64;
        nodes
            .iter()
            .map(|node| {
                let value = pick(node);
                let delta = value - previous;
                previous = value;
                zigzag(delta)
            })
            .collect::<Vec<u64>>()
    };

    let mut dense = Vec::new();
    field_packed(&mut dense, 1, deltas(|n| n.0));
    field_packed(&mut dense, 8, deltas(|n| n.1));
    field_packed(&mut dense, 9, deltas(|n| n.2));
    dense
}

// Granularity stays at the default 100 nanodegrees with zero offsets
fn encode_block(entities: &[Entity], dense: bool) -> Vec<u8> {
    let mut table = StringTable::new();
    let mut nodes = Vec::new();
    let mut dense_nodes = Vec::new();
    let mut ways = Vec::new();
    let mut relations = Vec::new();

    for entity in entities {
        match entity {
            Entity::Node { id, lat, lon } if dense => {
                dense_nodes.push((*id, (lat * 1e7).round() as i64, (lon * 1e7).round() as i64));
            }
            Entity::Node { id, lat, lon } => {
                let mut node = Vec::new();
                field_varint(&mut node, 1, zigzag(*id));
                field_varint(&mut node, 8, zigzag((lat * 1e7).round() as i64));
                field_varint(&mut node, 9, zigzag((lon * 1e7).round() as i64));
                nodes.push(node);
            }
            Entity::Way { id, refs, tags } => {
                let mut way = Vec::new();
                field_varint(&mut way, 1, *id as u64);
                encode_tags(&mut way, &mut table, tags);
                let mut previous = 0i64;
                let deltas: Vec<u64> = refs
                    .iter()
                    .map(|&r| {
                        let delta = r - previous;
                        previous = r;
                        zigzag(delta)
                    })
                    .collect();
                if !deltas.is_empty() {
                    field_packed(&mut way, 8, deltas);
                }
                ways.push(way);
            }
            Entity::Relation { id, tags } => {
                let mut relation = Vec::new();
                field_varint(&mut relation, 1, *id as u64);
                encode_tags(&mut relation, &mut table, tags);
                relations.push(relation);
            }
        }
    }

    let mut block = Vec::new();
    field_bytes(&mut block, 1, &table.encode());

    // One primitive group per kind, each group holds a single kind
    if !dense_nodes.is_empty() {
        let mut group = Vec::new();
        field_bytes(&mut group, 2, &encode_dense(&dense_nodes));
        field_bytes(&mut block, 2, &group);
    }
    for (field, items) in [(1u64, &nodes), (3, &ways), (4, &relations)] {
        if items.is_empty() {
            continue;
        }
        let mut group = Vec::new();
        for item in items {
            field_bytes(&mut group, field, item);
        }
        field_bytes(&mut block, 2, &group);
    }
    block
}
