// Multi-pass streaming traversal over a PBF extract
use crate::osm::{OsmNode, OsmRelation, OsmWay};
use anyhow::{Context, Result, bail};
use log::{debug, info};
use osmpbf::{Blob, BlobDecode, BlobReader, Element, PrimitiveBlock};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Receives primitives during a traversal.
///
/// Callbacks of the same kind may run concurrently on several decode workers, so
/// implementations synchronize their own state. Kinds never overlap: every node
/// callback of a batch returns before the first way callback of that batch starts.
pub trait Handler: Sync {
    fn node(&self, _node: &OsmNode) -> Result<()> {
        Ok(())
    }

    fn way(&self, _way: &OsmWay) -> Result<()> {
        Ok(())
    }

    fn relation(&self, _relation: &OsmRelation) -> Result<()> {
        Ok(())
    }
}

impl<H: Handler + ?Sized> Handler for &H {
    fn node(&self, node: &OsmNode) -> Result<()> {
        (**self).node(node)
    }

    fn way(&self, way: &OsmWay) -> Result<()> {
        (**self).way(way)
    }

    fn relation(&self, relation: &OsmRelation) -> Result<()> {
        (**self).relation(relation)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub nodes: u64,
    pub ways: u64,
    pub relations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Ready { rewound: bool },
    Consumed { rewound: bool },
}

/// Drives full in-order passes over a PBF file: one pass, plus exactly one more after `rewind`.
pub struct Pipeline {
    path: PathBuf,
    batch_size: usize,
    state: PassState,
}

#[derive(Default)]
struct DecodedBlock {
    nodes: Vec<OsmNode>,
    ways: Vec<OsmWay>,
    relations: Vec<OsmRelation>,
}

impl Pipeline {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        File::open(&path)
            .with_context(|| format!("Failed to open PBF file: {}", path.display()))?;

        Ok(Pipeline {
            path,
            batch_size: num_cpus::get().max(1),
            state: PassState::Ready { rewound: false },
        })
    }

    /// Number of blobs decoded in parallel before dispatching them.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn traverse<H: Handler>(&mut self, handler: &H) -> Result<TraversalStats> {
        let rewound = match self.state {
            PassState::Ready { rewound } => rewound,
            PassState::Consumed { .. } => bail!("Pipeline already traversed; rewind before another pass"),
        };
        self.state = PassState::Consumed { rewound };

        let reader = BlobReader::from_path(&self.path)
            .with_context(|| format!("Failed to open PBF file: {}", self.path.display()))?;

        let mut stats = TraversalStats::default();
        let mut batch: Vec<Blob> = Vec::with_capacity(self.batch_size);

        for blob in reader {
            batch.push(blob.context("Failed to read blob")?);
            if batch.len() == self.batch_size {
                dispatch_batch(std::mem::take(&mut batch), handler, &mut stats)?;
            }
        }
        if !batch.is_empty() {
            dispatch_batch(batch, handler, &mut stats)?;
        }

        info!(
            "Traversal complete: {} nodes, {} ways, {} relations",
            stats.nodes, stats.ways, stats.relations
        );
        if let Some(memory_usage) = get_memory_usage_mb() {
            debug!("Memory usage: {} MB", memory_usage);
        }

        Ok(stats)
    }

    pub fn rewind(&mut self) -> Result<()> {
        match self.state {
            PassState::Consumed { rewound: false } => {
                self.state = PassState::Ready { rewound: true };
                Ok(())
            }
            PassState::Consumed { rewound: true } => bail!("Pipeline can only be rewound once"),
            PassState::Ready { .. } => bail!("Pipeline has not been traversed yet"),
        }
    }
}

fn dispatch_batch<H: Handler>(
    blobs: Vec<Blob>,
    handler: &H,
    stats: &mut TraversalStats,
) -> Result<()> {
    let blocks: Vec<DecodedBlock> = blobs
        .into_par_iter()
        .map(decode_blob)
        .collect::<Result<Vec<Option<DecodedBlock>>>>()?
        .into_iter()
        .flatten()
        .collect();

    // Category barrier: nodes, then ways, then relations
    blocks
        .par_iter()
        .try_for_each(|block| block.nodes.par_iter().try_for_each(|node| handler.node(node)))?;
    blocks
        .par_iter()
        .try_for_each(|block| block.ways.par_iter().try_for_each(|way| handler.way(way)))?;
    blocks.par_iter().try_for_each(|block| {
        block
            .relations
            .par_iter()
            .try_for_each(|relation| handler.relation(relation))
    })?;

    for block in &blocks {
        stats.nodes += block.nodes.len() as u64;
        stats.ways += block.ways.len() as u64;
        stats.relations += block.relations.len() as u64;
    }
    Ok(())
}

fn decode_blob(blob: Blob) -> Result<Option<DecodedBlock>> {
    match blob.decode().context("Failed to decode blob")? {
        BlobDecode::OsmData(block) => Ok(Some(decode_block(&block))),
        // Skip header and unknown blobs
        BlobDecode::OsmHeader(_) | BlobDecode::Unknown(_) => Ok(None),
    }
}

fn decode_block(block: &PrimitiveBlock) -> DecodedBlock {
    let mut decoded = DecodedBlock::default();
    for element in block.elements() {
        match element {
            Element::Node(node) => decoded.nodes.push(OsmNode {
                id: node.id(),
                lat: node.lat(),
                lon: node.lon(),
            }),
            Element::DenseNode(dense_node) => decoded.nodes.push(OsmNode {
                id: dense_node.id(),
                lat: dense_node.lat(),
                lon: dense_node.lon(),
            }),
            Element::Way(way) => {
                let tags: HashMap<String, String> = way
                    .tags()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                decoded.ways.push(OsmWay {
                    id: way.id(),
                    node_refs: way.refs().collect(),
                    tags,
                });
            }
            Element::Relation(relation) => {
                let tags: HashMap<String, String> = relation
                    .tags()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                decoded.relations.push(OsmRelation {
                    id: relation.id(),
                    tags,
                });
            }
        }
    }
    decoded
}

fn get_memory_usage_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        use std::fs;
        let contents = fs::read_to_string("/proc/self/status").ok()?;
        for line in contents.lines() {
            if line.starts_with("VmRSS:") {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() >= 2 {
                    return parts[1].parse::<u64>().ok().map(|kb| kb / 1024);
                }
            }
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
