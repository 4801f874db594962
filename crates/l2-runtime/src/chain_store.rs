//! Chain Store
//!
//! Persists L1 blocks, rollups, derived rollup states and per-block states on
//! top of a [`KvStore`], and keeps the head pointers. Reads never fail on a
//! missing key: they return `None`/`false`. Every write that touches more than
//! one key goes through a single [`WriteBatch`], and all read-modify-write
//! paths (head pointer, indexes, counters) run under one write lock.

use crate::error::{StoreError, StoreResult};
use crate::ledger::RollupState;
use crate::persistence::{KvStore, MemoryKv, SledKv, WriteBatch};
use crate::rollup::Rollup;
use crate::transaction::L2Tx;
use dashmap::DashMap;
use l1_integration::{Hash, L1Block};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

mod keys {
    use l1_integration::Hash;

    pub const HEAD_ROLLUP: &[u8] = b"head-rollup";
    pub const HEAD_BLOCK: &[u8] = b"head-block";
    pub const GENESIS_ROLLUP: &[u8] = b"genesis-rollup";
    pub const TOTAL_TXS: &[u8] = b"total-txs";
    pub const PENDING_TXS: &[u8] = b"pending-txs";
    pub const SHARED_SECRET: &[u8] = b"shared-secret";

    fn with_hash(prefix: &[u8], hash: &Hash) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + 32);
        key.extend_from_slice(prefix);
        key.extend_from_slice(hash.as_bytes());
        key
    }

    pub fn block(hash: &Hash) -> Vec<u8> {
        with_hash(b"blk/", hash)
    }

    pub fn block_state(hash: &Hash) -> Vec<u8> {
        with_hash(b"bst/", hash)
    }

    pub fn ingested(hash: &Hash) -> Vec<u8> {
        with_hash(b"ing/", hash)
    }

    pub fn rollup(hash: &Hash) -> Vec<u8> {
        with_hash(b"rol/", hash)
    }

    pub fn rollup_txs(hash: &Hash) -> Vec<u8> {
        with_hash(b"rtx/", hash)
    }

    pub fn rollup_state(hash: &Hash) -> Vec<u8> {
        with_hash(b"rst/", hash)
    }

    pub fn tx(hash: &Hash) -> Vec<u8> {
        with_hash(b"ptx/", hash)
    }

    pub fn rollups_at(height: u64) -> Vec<u8> {
        let mut key = b"hgt/".to_vec();
        key.extend_from_slice(&height.to_be_bytes());
        key
    }
}

/// Result of folding one L1 block into the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockState {
    /// The block that was folded
    pub block: L1Block,
    /// Head rollup after the block
    pub head: Rollup,
    /// Derived state of `head`
    pub state: RollupState,
    /// Whether the block carried a rollup that became the new head
    pub found_new_rollup: bool,
}

#[derive(Serialize, Deserialize)]
struct StoredBlockState {
    head: Hash,
    found_new_rollup: bool,
}

/// Chain storage shared by every enclave operation
pub struct ChainStore {
    kv: Arc<dyn KvStore>,
    /// Serializes read-modify-write paths
    write_lock: Mutex<()>,
    /// Derived rollup states, keyed by rollup hash
    states: DashMap<Hash, RollupState>,
}

impl ChainStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
            states: DashMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()))
    }

    /// Open a sled-backed store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Ok(Self::new(Arc::new(SledKv::open(path)?)))
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.kv.flush()
    }

    // ---- blocks -------------------------------------------------------------

    pub fn store_block(&self, block: &L1Block) -> StoreResult<()> {
        self.kv.put(&keys::block(&block.hash()), &encode(block)?)
    }

    pub fn resolve_block(&self, hash: &Hash) -> StoreResult<Option<L1Block>> {
        self.read(&keys::block(hash))
    }

    /// Mark a block as fully processed by the enclave
    pub fn mark_ingested(&self, hash: &Hash) -> StoreResult<()> {
        self.kv.put(&keys::ingested(hash), &[1])
    }

    pub fn is_ingested(&self, hash: &Hash) -> StoreResult<bool> {
        self.kv.has(&keys::ingested(hash))
    }

    pub fn height_block(&self, block: &L1Block) -> u64 {
        block.height
    }

    pub fn parent_block(&self, block: &L1Block) -> StoreResult<Option<L1Block>> {
        if block.is_genesis() {
            return Ok(None);
        }
        self.resolve_block(&block.parent_hash)
    }

    /// True if `ancestor` is `block` itself or one of its stored ancestors
    pub fn is_ancestor(&self, block: &L1Block, ancestor: &L1Block) -> StoreResult<bool> {
        let target = ancestor.hash();
        let mut current = block.clone();
        while current.height > ancestor.height {
            match self.parent_block(&current)? {
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
        Ok(current.hash() == target)
    }

    // ---- rollups ------------------------------------------------------------

    /// True if the rollup is the genesis rollup or sits exactly one above a
    /// stored parent
    pub fn extends_stored_parent(&self, rollup: &Rollup) -> StoreResult<bool> {
        if rollup.is_genesis() {
            return Ok(true);
        }
        Ok(match self.fetch_rollup(&rollup.parent_hash())? {
            Some(parent) => parent.height() + 1 == rollup.height(),
            None => false,
        })
    }

    /// Store a rollup with its indexes, advancing the head pointer when the
    /// rollup is at least as high as the current head. Storing an existing
    /// rollup again is a no-op. Rollups that do not extend a stored parent
    /// are refused with [`StoreError::Detached`].
    pub fn store_rollup(&self, rollup: &Rollup) -> StoreResult<()> {
        let _guard = self.write_lock.lock();

        let hash = rollup.hash();
        if self.kv.has(&keys::rollup(&hash))? {
            return Ok(());
        }
        if !self.extends_stored_parent(rollup)? {
            return Err(StoreError::Detached(hash));
        }

        let mut batch = WriteBatch::new();
        batch.put(keys::rollup(&hash), encode(rollup)?);

        let tx_hashes: Vec<Hash> = rollup.transactions.iter().map(L2Tx::hash).collect();
        batch.put(keys::rollup_txs(&hash), encode(&tx_hashes)?);

        let height_key = keys::rollups_at(rollup.height());
        let mut at_height: Vec<Hash> = self.read(&height_key)?.unwrap_or_default();
        at_height.push(hash);
        batch.put(height_key, encode(&at_height)?);

        let total: u64 = self.read(keys::TOTAL_TXS)?.unwrap_or(0);
        batch.put(keys::TOTAL_TXS, encode(&(total + tx_hashes.len() as u64))?);

        let advance = match self.head()? {
            None => true,
            Some(head) => head.height() <= rollup.height(),
        };
        if advance {
            batch.put(keys::HEAD_ROLLUP, encode(&hash)?);
        }

        if hash == Rollup::genesis().hash() {
            batch.put(keys::GENESIS_ROLLUP, encode(&hash)?);
        }

        self.kv.write_batch(batch)?;

        tracing::trace!(
            "Stored rollup r_{} at height {} (head advanced: {})",
            hash.short(),
            rollup.height(),
            advance
        );
        Ok(())
    }

    pub fn fetch_rollup(&self, hash: &Hash) -> StoreResult<Option<Rollup>> {
        self.read(&keys::rollup(hash))
    }

    pub fn exist_rollup(&self, hash: &Hash) -> StoreResult<bool> {
        self.kv.has(&keys::rollup(hash))
    }

    pub fn parent_rollup(&self, rollup: &Rollup) -> StoreResult<Option<Rollup>> {
        if rollup.is_genesis() {
            return Ok(None);
        }
        self.fetch_rollup(&rollup.parent_hash())
    }

    pub fn height_rollup(&self, rollup: &Rollup) -> u64 {
        rollup.height()
    }

    /// The genesis rollup, once an L1 block has published it
    pub fn genesis_rollup(&self) -> StoreResult<Option<Rollup>> {
        match self.read::<Hash>(keys::GENESIS_ROLLUP)? {
            Some(hash) => self.fetch_rollup(&hash),
            None => Ok(None),
        }
    }

    /// Every stored rollup at height `min_height` or above
    pub fn fetch_gossiped_rollups(&self, min_height: u64) -> StoreResult<Vec<Rollup>> {
        let mut rollups = Vec::new();
        let mut height = min_height;

        // Heights are contiguous: a rollup is only stored once its parent is
        while let Some(hashes) = self.read::<Vec<Hash>>(&keys::rollups_at(height))? {
            for hash in hashes {
                let rollup = self
                    .fetch_rollup(&hash)?
                    .ok_or(StoreError::Missing("rollup", hash))?;
                rollups.push(rollup);
            }
            height += 1;
        }

        Ok(rollups)
    }

    pub fn rollup_tx_hashes(&self, hash: &Hash) -> StoreResult<Option<Vec<Hash>>> {
        self.read(&keys::rollup_txs(hash))
    }

    /// Number of transactions across every stored rollup
    pub fn total_transactions(&self) -> StoreResult<u64> {
        Ok(self.read(keys::TOTAL_TXS)?.unwrap_or(0))
    }

    /// Highest stored rollup (ties go to the most recently stored)
    pub fn head(&self) -> StoreResult<Option<Rollup>> {
        match self.read::<Hash>(keys::HEAD_ROLLUP)? {
            Some(hash) => Ok(Some(
                self.fetch_rollup(&hash)?
                    .ok_or(StoreError::Missing("head rollup", hash))?,
            )),
            None => Ok(None),
        }
    }

    /// Point the head at a stored rollup, unless the current head is higher
    pub fn set_head(&self, rollup: &Rollup) -> StoreResult<bool> {
        let _guard = self.write_lock.lock();

        let hash = rollup.hash();
        if !self.kv.has(&keys::rollup(&hash))? {
            return Err(StoreError::Missing("rollup", hash));
        }
        let advance = match self.head()? {
            None => true,
            Some(head) => head.height() <= rollup.height(),
        };
        if advance {
            self.kv.put(keys::HEAD_ROLLUP, &encode(&hash)?)?;
        }
        Ok(advance)
    }

    // ---- derived state ------------------------------------------------------

    pub fn fetch_rollup_state(&self, hash: &Hash) -> StoreResult<Option<RollupState>> {
        if let Some(state) = self.states.get(hash) {
            return Ok(Some(state.value().clone()));
        }

        let state: Option<RollupState> = self.read(&keys::rollup_state(hash))?;
        if let Some(state) = &state {
            self.states.insert(*hash, state.clone());
        }
        Ok(state)
    }

    pub fn set_rollup_state(&self, hash: &Hash, state: &RollupState) -> StoreResult<()> {
        self.kv.put(&keys::rollup_state(hash), &encode(state)?)?;
        self.states.insert(*hash, state.clone());
        Ok(())
    }

    /// Record the state reached after a block, together with the head's derived
    /// state, and advance the L1 head pointer
    pub fn set_block_state(&self, bs: &BlockState) -> StoreResult<()> {
        let _guard = self.write_lock.lock();

        let block_hash = bs.block.hash();
        let head_hash = bs.head.hash();

        let mut batch = WriteBatch::new();
        batch.put(
            keys::block_state(&block_hash),
            encode(&StoredBlockState {
                head: head_hash,
                found_new_rollup: bs.found_new_rollup,
            })?,
        );
        batch.put(keys::rollup_state(&head_hash), encode(&bs.state)?);

        let advance = match self.read::<Hash>(keys::HEAD_BLOCK)? {
            None => true,
            Some(current) => match self.resolve_block(&current)? {
                Some(current) => current.height <= bs.block.height,
                None => true,
            },
        };
        if advance {
            batch.put(keys::HEAD_BLOCK, encode(&block_hash)?);
        }

        self.kv.write_batch(batch)?;
        self.states.insert(head_hash, bs.state.clone());
        Ok(())
    }

    /// State reached after the given block, if it has been computed
    pub fn fetch_state(&self, block_hash: &Hash) -> StoreResult<Option<BlockState>> {
        let stored: StoredBlockState = match self.read(&keys::block_state(block_hash))? {
            Some(stored) => stored,
            None => return Ok(None),
        };

        let block = self
            .resolve_block(block_hash)?
            .ok_or(StoreError::Missing("block", *block_hash))?;
        let head = self
            .fetch_rollup(&stored.head)?
            .ok_or(StoreError::Missing("rollup", stored.head))?;
        let state = self
            .fetch_rollup_state(&stored.head)?
            .ok_or(StoreError::Missing("rollup state", stored.head))?;

        Ok(Some(BlockState {
            block,
            head,
            state,
            found_new_rollup: stored.found_new_rollup,
        }))
    }

    /// State after the highest block folded so far
    pub fn head_block_state(&self) -> StoreResult<Option<BlockState>> {
        match self.read::<Hash>(keys::HEAD_BLOCK)? {
            Some(hash) => self.fetch_state(&hash),
            None => Ok(None),
        }
    }

    // ---- pending transactions ----------------------------------------------

    /// Pending pool, in arrival order
    pub fn fetch_txs(&self) -> StoreResult<Vec<L2Tx>> {
        let index: Vec<Hash> = self.read(keys::PENDING_TXS)?.unwrap_or_default();
        index
            .iter()
            .map(|hash| {
                self.read(&keys::tx(hash))?
                    .ok_or(StoreError::Missing("pending transaction", *hash))
            })
            .collect()
    }

    /// Add a transaction to the pending pool; already pooled hashes are ignored
    pub fn store_tx(&self, tx: &L2Tx) -> StoreResult<()> {
        let _guard = self.write_lock.lock();

        let hash = tx.hash();
        if self.kv.has(&keys::tx(&hash))? {
            return Ok(());
        }

        let mut index: Vec<Hash> = self.read(keys::PENDING_TXS)?.unwrap_or_default();
        index.push(hash);

        let mut batch = WriteBatch::new();
        batch.put(keys::tx(&hash), encode(tx)?);
        batch.put(keys::PENDING_TXS, encode(&index)?);
        self.kv.write_batch(batch)
    }

    /// Drop confirmed transactions from the pending pool. Hashes that are not
    /// pooled are ignored. Returns how many were removed.
    pub fn prune_txs(&self, confirmed: &HashSet<Hash>) -> StoreResult<usize> {
        let _guard = self.write_lock.lock();

        let index: Vec<Hash> = self.read(keys::PENDING_TXS)?.unwrap_or_default();
        let (removed, kept): (Vec<Hash>, Vec<Hash>) =
            index.into_iter().partition(|h| confirmed.contains(h));

        if removed.is_empty() {
            return Ok(0);
        }

        let mut batch = WriteBatch::new();
        for hash in &removed {
            batch.delete(keys::tx(hash));
        }
        batch.put(keys::PENDING_TXS, encode(&kept)?);
        self.kv.write_batch(batch)?;

        tracing::debug!("Pruned {} confirmed transactions", removed.len());
        Ok(removed.len())
    }

    // ---- shared secret ------------------------------------------------------

    pub fn fetch_secret(&self) -> StoreResult<Option<[u8; 32]>> {
        self.read(keys::SHARED_SECRET)
    }

    pub fn store_secret(&self, secret: &[u8; 32]) -> StoreResult<()> {
        self.kv.put(keys::SHARED_SECRET, &encode(secret)?)
    }

    // ---- helpers ------------------------------------------------------------

    fn read<T: DeserializeOwned>(&self, key: &[u8]) -> StoreResult<Option<T>> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}
