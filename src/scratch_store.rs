use crate::osm::{OsmNode, OsmWay};
use crate::pipeline::Handler;
use anyhow::{Context, Result, anyhow, bail};
use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;
use tempfile::TempDir;

const MAP_SIZE: usize = 500 * 1024 * 1024 * 1024; // 500GB max map size for planet files
const COMMIT_EVERY: usize = 10_000;
const CHANNEL_BOUND: usize = 1000;
const SIGN_BIT: u64 = 1 << 63;

/// One fact captured during a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRecord {
    Node {
        id: i64,
        lon: f64,
        lat: f64,
    },
    /// Only the `name` tag is kept; nothing downstream reads the others.
    Way {
        id: i64,
        node_refs: Vec<i64>,
        name: Option<String>,
    },
}

/// A way as read back from the store, with its node values in source order.
///
/// `coordinates` is `None` when not a single referenced node was stored.
pub struct WayRow<'txn> {
    pub id: i64,
    pub coordinates: Option<Vec<&'txn [u8]>>,
    pub name: Option<String>,
}

/// Disk-backed scratch relation shared by both passes and the reconstruction query.
///
/// Lives in its own temporary directory which is removed when the store is dropped.
pub struct ScratchStore {
    env: Environment,
    nodes: Database,
    ways: Database,
    way_nodes: Database,
    way_names: Database,
    temp_dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchStore {
    /// Create a fresh store under `parent`, or under the system temp dir if None
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("pbf_");
            builder
        };
        let temp_dir = match parent {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        let path = temp_dir.path().join("scratch.mdb");

        let env = Environment::new()
            .set_flags(lmdb::EnvironmentFlags::NO_SUB_DIR) // Use single file, not directory
            .set_max_dbs(4)
            .set_map_size(MAP_SIZE)
            .open(&path)
            .with_context(|| format!("Failed to open scratch store at {}", path.display()))?;

        let nodes = env.create_db(Some("nodes"), DatabaseFlags::empty())?;
        let ways = env.create_db(Some("ways"), DatabaseFlags::empty())?;
        let way_nodes = env.create_db(Some("way_nodes"), DatabaseFlags::empty())?;
        let way_names = env.create_db(Some("way_names"), DatabaseFlags::empty())?;

        debug!("Scratch store created: {}", path.display());

        Ok(ScratchStore {
            env,
            nodes,
            ways,
            way_nodes,
            way_names,
            temp_dir: Some(temp_dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` with a sink that funnels records into a single writer thread.
    ///
    /// A writer failure is reported in preference to the error `f` saw from the closed sink.
    pub fn writer<R>(&self, f: impl FnOnce(&StoreWriter) -> Result<R>) -> Result<R> {
        let (tx, rx) = mpsc::sync_channel::<StoreRecord>(CHANNEL_BOUND);

        thread::scope(|scope| {
            let writer_thread = scope.spawn(move || self.drain(rx));

            let sink = StoreWriter { tx };
            let result = f(&sink);
            drop(sink);

            let written = writer_thread
                .join()
                .map_err(|_| anyhow!("Scratch store writer thread panicked"))??;
            debug!("Scratch store writer committed {} records", written);
            result
        })
    }

    /// Store records synchronously in a single transaction
    #[cfg(test)]
    pub(crate) fn write_all(&self, records: &[StoreRecord]) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        for record in records {
            self.put_record(&mut txn, record)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn drain(&self, rx: Receiver<StoreRecord>) -> Result<u64> {
        let mut txn = self.env.begin_rw_txn()?;
        let mut pending = 0usize;
        let mut total = 0u64;

        while let Ok(record) = rx.recv() {
            self.put_record(&mut txn, &record)?;
            pending += 1;
            total += 1;

            if pending >= COMMIT_EVERY {
                txn.commit().context("Failed to commit scratch store batch")?;
                txn = self.env.begin_rw_txn()?;
                pending = 0;
            }
        }

        txn.commit().context("Failed to commit scratch store batch")?;
        Ok(total)
    }

    fn put_record(&self, txn: &mut RwTransaction, record: &StoreRecord) -> Result<()> {
        match record {
            StoreRecord::Node { id, lon, lat } => {
                let value = [lon.to_be_bytes(), lat.to_be_bytes()].concat();
                txn.put(self.nodes, &id_key(*id), &value, WriteFlags::empty())?;
            }
            StoreRecord::Way {
                id,
                node_refs,
                name,
            } => {
                let count = u32::try_from(node_refs.len())
                    .with_context(|| format!("Way {} has too many node refs", id))?;
                txn.put(
                    self.ways,
                    &id_key(*id),
                    &count.to_be_bytes(),
                    WriteFlags::empty(),
                )?;
                for (position, node_id) in (0u32..).zip(node_refs) {
                    txn.put(
                        self.way_nodes,
                        &way_node_key(*id, position),
                        &id_key(*node_id),
                        WriteFlags::empty(),
                    )?;
                }
                if let Some(name) = name {
                    txn.put(self.way_names, &id_key(*id), name, WriteFlags::empty())?;
                }
            }
        }
        Ok(())
    }

    /// Retrieve (lon, lat) for a node ID
    #[cfg(test)]
    pub(crate) fn get_node(&self, node_id: i64) -> Result<Option<(f64, f64)>> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.nodes, &id_key(node_id)) {
            Ok(value) => Ok(decode_coordinate(value)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Visit every stored way in ascending id order.
    pub fn for_each_way<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(WayRow<'_>) -> Result<()>,
    {
        let txn = self.env.begin_ro_txn()?;
        let mut cursor = txn.open_ro_cursor(self.ways)?;

        for (key, value) in cursor.iter_start() {
            let id = decode_id(key)?;
            let ref_count = match <[u8; 4]>::try_from(value) {
                Ok(bytes) => u32::from_be_bytes(bytes),
                Err(_) => bail!("Corrupt ref count for way {}", id),
            };

            let mut coordinates = Vec::with_capacity(ref_count as usize);
            for position in 0..ref_count {
                let node_id = match txn.get(self.way_nodes, &way_node_key(id, position)) {
                    Ok(value) => decode_id(value)?,
                    Err(lmdb::Error::NotFound) => {
                        bail!("Way {} is missing node position {}", id, position)
                    }
                    Err(e) => return Err(e.into()),
                };
                // Inner join: unresolved references drop out
                match txn.get(self.nodes, &id_key(node_id)) {
                    Ok(value) => coordinates.push(value),
                    Err(lmdb::Error::NotFound) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            let name = match txn.get(self.way_names, &id_key(id)) {
                Ok(value) => Some(String::from_utf8_lossy(value).into_owned()),
                Err(lmdb::Error::NotFound) => None,
                Err(e) => return Err(e.into()),
            };

            f(WayRow {
                id,
                coordinates: (!coordinates.is_empty()).then_some(coordinates),
                name,
            })?;
        }

        Ok(())
    }
}

impl Drop for ScratchStore {
    fn drop(&mut self) {
        if let Some(temp_dir) = self.temp_dir.take() {
            let path = temp_dir.path().to_path_buf();
            match temp_dir.close() {
                Ok(()) => debug!("Scratch store deleted: {}", path.display()),
                Err(e) => warn!("Failed to remove scratch store {}: {}", path.display(), e),
            }
        }
    }
}

/// Synchronized sink feeding the store's writer thread.
pub struct StoreWriter {
    tx: SyncSender<StoreRecord>,
}

impl StoreWriter {
    pub fn send(&self, record: StoreRecord) -> Result<()> {
        self.tx
            .send(record)
            .map_err(|_| anyhow!("Scratch store writer closed"))
    }
}

impl Handler for StoreWriter {
    fn node(&self, node: &OsmNode) -> Result<()> {
        self.send(StoreRecord::Node {
            id: node.id,
            lon: node.lon,
            lat: node.lat,
        })
    }

    fn way(&self, way: &OsmWay) -> Result<()> {
        self.send(StoreRecord::Way {
            id: way.id,
            node_refs: way.node_refs.clone(),
            name: way.tags.get("name").cloned(),
        })
    }
}

/// Decode a stored node value into (lon, lat); None when it is not a usable coordinate.
pub fn decode_coordinate(value: &[u8]) -> Option<(f64, f64)> {
    if value.len() != 16 {
        return None;
    }
    let lon = f64::from_be_bytes(value[0..8].try_into().ok()?);
    let lat = f64::from_be_bytes(value[8..16].try_into().ok()?);
    (lon.is_finite() && lat.is_finite()).then_some((lon, lat))
}

// Flipping the sign bit makes big-endian byte order match signed numeric order
fn id_key(id: i64) -> [u8; 8] {
    ((id as u64) ^ SIGN_BIT).to_be_bytes()
}

fn decode_id(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| anyhow!("Corrupt id key of {} bytes", bytes.len()))?;
    Ok((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64)
}

fn way_node_key(way_id: i64, position: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&id_key(way_id));
    key[8..].copy_from_slice(&position.to_be_bytes());
    key
}
