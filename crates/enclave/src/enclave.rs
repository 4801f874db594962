//! Enclave façade
//!
//! Lifecycle: uninitialised until a shared secret is stored, initialised
//! afterwards, producing once `start` launched the speculative executor.
//! Block ingestion is serialized; the speculative executor runs on its own
//! thread and is only reached through its handle.

use crate::config::EnclaveConfig;
use crate::error::{EnclaveError, EnclaveResult};
use crate::response::{BlockSubmission, BlockSubmissionResponse, Rejection, RoundOutcome};
use crate::secret::{AttestationReport, EncryptedSharedSecret, SharedSecret};
use l1_integration::{Address, Hash, L1Block};
use l2_consensus::{find_round_winner, update_state, StatsCollector};
use l2_runtime::processor::{
    current_txs, execute_transactions, historic_txs, new_processed_state, process_deposits,
    proof_block, rollup_state,
};
use l2_runtime::{
    BlockState, ChainStore, EncryptedTx, ExecutorConfig, ExecutorHandle, ExtRollup, L2Tx, Rollup,
    SpeculativeExecutor, SpeculativeWork, StoreError,
};
use parking_lot::Mutex;
use rand::Rng;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

pub struct Enclave {
    config: EnclaveConfig,
    store: Arc<ChainStore>,
    stats: Arc<dyn StatsCollector>,
    /// Handle of the speculative executor, kept after `stop` so later
    /// requests fail instead of silently skipping speculation
    executor: Mutex<Option<ExecutorHandle>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Serializes block ingestion
    block_lock: Mutex<()>,
}

impl Enclave {
    /// Create an enclave backed by the store the configuration selects
    pub fn new(config: EnclaveConfig, stats: Arc<dyn StatsCollector>) -> EnclaveResult<Self> {
        let store = match &config.data_dir {
            Some(dir) => ChainStore::open(dir)?,
            None => ChainStore::in_memory(),
        };
        Ok(Self::with_store(config, Arc::new(store), stats))
    }

    pub fn with_store(
        config: EnclaveConfig,
        store: Arc<ChainStore>,
        stats: Arc<dyn StatsCollector>,
    ) -> Self {
        tracing::info!("Enclave created for node {:?}", config.node_address);
        Self {
            config,
            store,
            stats,
            executor: Mutex::new(None),
            worker: Mutex::new(None),
            block_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<ChainStore> {
        &self.store
    }

    pub fn address(&self) -> Address {
        self.config.node_address
    }

    // ---- bootstrap ----------------------------------------------------------

    /// Generate the network secret. Only the genesis node calls this.
    pub fn generate_secret(&self) -> EnclaveResult<EncryptedSharedSecret> {
        let secret = SharedSecret::generate();
        self.store.store_secret(secret.as_bytes())?;
        tracing::info!("Generated shared secret");
        Ok(secret.seal())
    }

    /// Store a secret received from a peer
    pub fn init(&self, secret: EncryptedSharedSecret) -> EnclaveResult<()> {
        let secret = secret.open().ok_or(EnclaveError::MalformedSecret)?;
        self.store.store_secret(secret.as_bytes())?;
        tracing::info!("Stored shared secret received from a peer");
        Ok(())
    }

    pub fn is_initialised(&self) -> EnclaveResult<bool> {
        Ok(self.store.fetch_secret()?.is_some())
    }

    pub fn attestation(&self) -> AttestationReport {
        AttestationReport {
            owner: self.config.node_address,
        }
    }

    /// Hand the shared secret to the enclave that produced `report`
    pub fn fetch_secret(&self, report: &AttestationReport) -> EnclaveResult<EncryptedSharedSecret> {
        let secret = self.store.fetch_secret()?.ok_or(EnclaveError::NotInitialised)?;
        tracing::info!("Sharing secret with {:?}", report.owner);
        Ok(SharedSecret::from_bytes(secret).seal())
    }

    fn ensure_initialised(&self) -> EnclaveResult<()> {
        if self.is_initialised()? {
            Ok(())
        } else {
            Err(EnclaveError::NotInitialised)
        }
    }

    // ---- chain --------------------------------------------------------------

    /// The network's fixed genesis rollup
    pub fn produce_genesis(&self) -> ExtRollup {
        Rollup::genesis().to_ext()
    }

    /// Catch-up path: fold blocks in the given order without producing
    /// rollups. Returns one response per folded block; orphans and blocks
    /// already ingested are skipped.
    pub fn ingest_blocks(&self, blocks: &[L1Block]) -> EnclaveResult<Vec<BlockSubmissionResponse>> {
        let _guard = self.block_lock.lock();

        let mut responses = Vec::with_capacity(blocks.len());
        for block in blocks {
            let hash = block.hash();
            if self.store.is_ingested(&hash)? {
                continue;
            }
            if self.is_orphan(block)? {
                tracing::warn!(
                    "Skipping orphan block b_{} at height {}",
                    hash.short(),
                    block.height
                );
                continue;
            }

            self.store.store_block(block)?;
            let response = match update_state(block, &self.store, self.stats.as_ref())? {
                Some(bs) => BlockSubmissionResponse::new(&bs, None),
                None => BlockSubmissionResponse::without_l2(block),
            };
            self.store.mark_ingested(&hash)?;
            responses.push(response);
        }

        tracing::info!("Ingested {} of {} blocks", responses.len(), blocks.len());
        Ok(responses)
    }

    /// Launch the speculative executor on top of the head reached at `block`.
    /// A running executor is stopped and replaced.
    pub fn start(&self, block: &L1Block) -> EnclaveResult<()> {
        self.ensure_initialised()?;

        let hash = block.hash();
        let bs = self
            .store
            .fetch_state(&hash)?
            .ok_or(EnclaveError::MissingBlockState(hash))?;

        self.stop();

        let config = ExecutorConfig {
            queue_bound: self.config.speculative_queue_bound,
        };
        let (handle, worker) = SpeculativeExecutor::spawn(self.store.clone(), bs.head, config)?;
        *self.executor.lock() = Some(handle);
        *self.worker.lock() = Some(worker);

        tracing::info!("Enclave producing from b_{} (height {})", hash.short(), block.height);
        Ok(())
    }

    /// Primary per-block entry point. Never panics: failures, including
    /// panics raised while processing, come back as `Fault`.
    pub fn submit_block(&self, block: L1Block) -> BlockSubmission {
        let _guard = self.block_lock.lock();

        match self.is_initialised() {
            Ok(true) => {}
            Ok(false) => return BlockSubmission::Rejected(Rejection::NotInitialised),
            Err(e) => return BlockSubmission::Fault(e),
        }

        match catch_unwind(AssertUnwindSafe(|| self.process_block(&block))) {
            Ok(Ok(submission)) => submission,
            Ok(Err(e)) => {
                tracing::error!("Failed to process b_{}: {}", block.hash().short(), e);
                BlockSubmission::Fault(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Panic while processing b_{}: {}", block.hash().short(), message);
                BlockSubmission::Fault(EnclaveError::Panic(message))
            }
        }
    }

    fn process_block(&self, block: &L1Block) -> EnclaveResult<BlockSubmission> {
        let hash = block.hash();
        if self.store.is_ingested(&hash)? {
            tracing::debug!("Block b_{} already ingested", hash.short());
            return Ok(BlockSubmission::Rejected(Rejection::AlreadySeen));
        }
        if self.is_orphan(block)? {
            tracing::warn!(
                "Rejecting orphan block b_{} at height {}: parent {:?} unknown",
                hash.short(),
                block.height,
                block.parent_hash
            );
            return Ok(BlockSubmission::Rejected(Rejection::OrphanBlock));
        }

        // Taken before any write so a stopped executor leaves the store untouched
        let work = self.speculative_work()?;

        self.store.store_block(block)?;
        let bs = match update_state(block, &self.store, self.stats.as_ref())? {
            Some(bs) => bs,
            None => {
                self.store.mark_ingested(&hash)?;
                return Ok(BlockSubmission::Ingested(Box::new(
                    BlockSubmissionResponse::without_l2(block),
                )));
            }
        };

        let confirmed = historic_txs(&bs.head, self.config.prune_depth, &self.store)?;
        self.store.prune_txs(&confirmed)?;

        let rollup = self.produce_rollup(block, &bs, work)?;
        self.store.store_rollup(&rollup)?;
        self.store.mark_ingested(&hash)?;

        tracing::info!(
            "Ingested b_{} (height {}): head r_{}, produced r_{} with {} txs",
            hash.short(),
            block.height,
            bs.head.hash().short(),
            rollup.hash().short(),
            rollup.transactions.len()
        );

        Ok(BlockSubmission::Ingested(Box::new(BlockSubmissionResponse::new(
            &bs,
            Some(rollup.to_ext()),
        ))))
    }

    /// Build this node's proposal on top of the block's head. The
    /// speculative work is reused when it was built on that head; otherwise
    /// the pending transactions are replayed from the head's state.
    fn produce_rollup(
        &self,
        block: &L1Block,
        bs: &BlockState,
        work: Option<SpeculativeWork>,
    ) -> EnclaveResult<Rollup> {
        let head = &bs.head;
        let head_hash = head.hash();

        let (txs, state) = match work {
            Some(work) if work.head.as_ref().map(Rollup::hash) == Some(head_hash) => {
                (work.txs, work.state)
            }
            work => {
                if work.is_some() {
                    tracing::info!(
                        "Speculative head differs from r_{}, recalculating",
                        head_hash.short()
                    );
                    self.stats.l2_recalc(&self.config.node_address);
                }
                let txs = current_txs(head, self.store.fetch_txs()?, &self.store)?;
                let state = execute_transactions(&txs, new_processed_state(&bs.state));
                (txs, state)
            }
        };

        // Deposits always go last
        let from = proof_block(head, &self.store)?;
        let state = process_deposits(from.as_ref(), block, state, &self.store)?;

        Ok(Rollup::new(
            block.hash(),
            head,
            self.config.node_address,
            txs,
            state.withdrawals().to_vec(),
            rand::thread_rng().gen(),
            state.state_blob(),
        ))
    }

    /// Snapshot of the speculative executor, `None` before `start`
    fn speculative_work(&self) -> EnclaveResult<Option<SpeculativeWork>> {
        let handle = self.executor.lock().clone();
        match handle {
            Some(handle) => Ok(Some(handle.snapshot()?)),
            None => Ok(None),
        }
    }

    fn is_orphan(&self, block: &L1Block) -> EnclaveResult<bool> {
        Ok(!block.is_genesis() && self.store.resolve_block(&block.parent_hash)?.is_none())
    }

    /// Accept a gossiped rollup if its parent is known. Orphans are dropped.
    pub fn submit_rollup(&self, ext: ExtRollup) -> EnclaveResult<bool> {
        self.ensure_initialised()?;

        let rollup = Rollup::from_ext(&ext)?;
        if !self.store.extends_stored_parent(&rollup)? {
            tracing::warn!(
                "Dropping rollup r_{} at height {}: no stored parent r_{} one below",
                rollup.hash().short(),
                rollup.height(),
                rollup.parent_hash().short()
            );
            return Ok(false);
        }

        self.store.store_rollup(&rollup)?;
        tracing::debug!(
            "Stored gossiped rollup r_{} at height {}",
            rollup.hash().short(),
            rollup.height()
        );
        Ok(true)
    }

    /// Verify and pool a transaction, then hand it to the speculative executor
    pub fn submit_tx(&self, encrypted: EncryptedTx) -> EnclaveResult<Hash> {
        self.ensure_initialised()?;

        let tx = encrypted.open()?;
        if let Err(e) = tx.verify(self.config.chain_id) {
            tracing::warn!("Rejecting transaction {:?}: {}", tx.hash(), e);
            return Err(e.into());
        }

        let hash = tx.hash();
        self.store.store_tx(&tx)?;

        if let Some(handle) = self.executor.lock().as_ref() {
            if handle.submit_tx(tx).is_err() {
                tracing::debug!("Executor stopped, {:?} stays in the pending pool", hash);
            }
        }
        Ok(hash)
    }

    /// Resolve the gossip round on top of `parent`: pick the winner among
    /// the stored candidates, persist its state, mark it as the head and
    /// hand it to the speculative executor
    pub fn round_winner(&self, parent: &Hash) -> EnclaveResult<RoundOutcome> {
        self.ensure_initialised()?;

        let parent = self
            .store
            .fetch_rollup(parent)?
            .ok_or(StoreError::Missing("rollup", *parent))?;
        let parent_state = rollup_state(&parent, &self.store)?;

        let height = parent.height() + 1;
        let candidates: Vec<Rollup> = self
            .store
            .fetch_gossiped_rollups(height)?
            .into_iter()
            .filter(|r| r.height() == height)
            .collect();

        let found = find_round_winner(&candidates, &parent, &parent_state, &self.store)?;
        let (winner, state) = match found {
            Some(found) => found,
            None => {
                tracing::debug!("No candidate extends r_{}", parent.hash().short());
                return Ok(RoundOutcome::NoCandidates);
            }
        };

        let hash = winner.hash();
        self.store.set_rollup_state(&hash, &state)?;
        self.store.set_head(&winner)?;

        if let Some(handle) = self.executor.lock().as_ref() {
            if handle.notify_winner(winner.clone()).is_err() {
                tracing::debug!("Executor stopped, round winner r_{} not forwarded", hash.short());
            }
        }

        if winner.header.agg == self.config.node_address {
            tracing::info!(
                "Publish rollup r_{} at height {} with {} txs",
                hash.short(),
                winner.height(),
                winner.transactions.len()
            );
            Ok(RoundOutcome::Won(winner.to_ext()))
        } else {
            Ok(RoundOutcome::Lost { winner: hash })
        }
    }

    /// Stop the speculative executor and wait for it to drain its queue
    pub fn stop(&self) {
        if let Some(handle) = self.executor.lock().as_ref() {
            handle.stop();
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Speculative executor thread panicked");
            }
        }
    }

    // ---- queries ------------------------------------------------------------

    /// Balance at the head of the latest ingested block (0 if unknown)
    pub fn balance(&self, address: &Address) -> EnclaveResult<u64> {
        Ok(self
            .store
            .head_block_state()?
            .map(|bs| bs.state.balance(address))
            .unwrap_or(0))
    }

    /// Look up a transaction included in the current head's chain
    pub fn get_transaction(&self, hash: &Hash) -> EnclaveResult<Option<L2Tx>> {
        let mut current = match self.store.head_block_state()? {
            Some(bs) => bs.head,
            None => return Ok(None),
        };

        loop {
            if let Some(tx) = current.transactions.iter().find(|tx| tx.hash() == *hash) {
                return Ok(Some(tx.clone()));
            }
            match self.store.parent_rollup(&current)? {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }
}

impl Drop for Enclave {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
