// Street centerline workflow: two passes into the scratch store, reconstruct, merge, print
use crate::config::MergeConfig;
use crate::filter::IdFilter;
use crate::id_mask::IdMask;
use crate::merge::merge_streets;
use crate::output::write_streets;
use crate::pipeline::Pipeline;
use crate::scratch_store::ScratchStore;
use crate::streets::{Street, Streets, load_streets};
use anyhow::{Context, Result};
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Extract road ways from `input` and rebuild them as merged streets.
///
/// The scratch store only lives for the duration of this call.
pub fn extract_streets(input: &Path, config: &MergeConfig) -> Result<Vec<Street>> {
    let mut pipeline = Pipeline::open(input)?;
    let store = ScratchStore::create(config.temp_dir.as_deref())?;
    let node_mask = IdMask::new();

    info!("Pass 1: Storing road ways and marking their nodes...");
    store.writer(|sink| {
        let streets = Streets::new(config.road_filter(), &node_mask, sink);
        pipeline.traverse(&streets)
    })?;

    pipeline.rewind()?;

    info!("Pass 2: Storing referenced nodes...");
    store.writer(|sink| {
        let marked_nodes = IdFilter::new(sink).nodes(&node_mask);
        pipeline.traverse(&marked_nodes)
    })?;

    let streets = load_streets(&store).context("Failed to reconstruct streets")?;
    Ok(merge_streets(streets))
}

/// Full street-merge workflow, one line per street to `output` or stdout.
pub fn run_street_merge(input: &Path, output: Option<&Path>, config: &MergeConfig) -> Result<()> {
    let streets = extract_streets(input, config)?;

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stdout()),
    };
    let written = write_streets(writer, &streets, config);
    info!("Wrote {} streets", written);
    Ok(())
}
