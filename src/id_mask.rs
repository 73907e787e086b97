use std::collections::HashMap;
use std::sync::RwLock;

const BLOCK_BITS: u32 = 16; // 65536 ids per block
const BLOCK_WORDS: usize = (1 << BLOCK_BITS) / 64;
const SHARDS: usize = 64;

type Block = Box<[u64; BLOCK_WORDS]>;

/// Membership set over the full signed 64-bit id space.
///
/// Ids are grouped into fixed-size blocks and each block is a bitmap allocated
/// on first mark, so memory follows the number of touched blocks rather than the
/// largest id. Blocks are spread over independently locked shards so concurrent
/// decode workers rarely contend.
pub struct IdMask {
    shards: Vec<RwLock<HashMap<u64, Block>>>,
}

impl Default for IdMask {
    fn default() -> Self {
        Self::new()
    }
}

impl IdMask {
    pub fn new() -> Self {
        IdMask {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    #[inline]
    fn locate(id: i64) -> (u64, usize, u64) {
        let raw = id as u64;
        let block = raw >> BLOCK_BITS;
        let offset = (raw & ((1 << BLOCK_BITS) - 1)) as usize;
        (block, offset / 64, 1u64 << (offset % 64))
    }

    #[inline]
    fn shard(block: u64) -> usize {
        (block as usize) % SHARDS
    }

    pub fn mark(&self, id: i64) {
        let (block, word, bit) = Self::locate(id);
        let mut shard = self.shards[Self::shard(block)]
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let bits = shard
            .entry(block)
            .or_insert_with(|| Box::new([0u64; BLOCK_WORDS]));
        bits[word] |= bit;
    }

    pub fn contains(&self, id: i64) -> bool {
        let (block, word, bit) = Self::locate(id);
        let shard = self.shards[Self::shard(block)]
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        shard.get(&block).is_some_and(|bits| bits[word] & bit != 0)
    }
}
