//! Speculative Executor
//!
//! A dedicated thread owns the speculative head, its ledger and the ordered
//! list of transactions folded into it. Everything else talks to it through
//! [`ExecutorHandle`]; events are handled strictly in arrival order.

use crate::chain_store::ChainStore;
use crate::error::StoreResult;
use crate::ledger::ProcessedState;
use crate::processor::{
    copy_processed_state, current_txs, execute_transactions, execute_tx, new_processed_state,
    rollup_state,
};
use crate::rollup::Rollup;
use crate::transaction::L2Tx;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use l1_integration::Hash;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

/// Events processed by the executor loop
#[derive(Debug)]
pub enum ExecutorEvent {
    /// A new round winner replaces the speculative head
    RoundWinner(Rollup),
    /// A freshly submitted transaction
    Transaction(L2Tx),
    /// Request for a copy of the current speculative work
    Snapshot(Sender<SpeculativeWork>),
    /// Terminate the loop
    Stop,
}

/// Immutable copy of the executor's state at the time of a snapshot
#[derive(Debug, Clone, Default)]
pub struct SpeculativeWork {
    /// Head the work was built on (`None` if it could not be derived)
    pub head: Option<Rollup>,
    pub state: ProcessedState,
    pub txs: Vec<L2Tx>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("speculative executor is stopped")]
    Stopped,
}

/// Executor configuration
#[derive(Clone, Debug, Default)]
pub struct ExecutorConfig {
    /// Capacity of the event queue (0 = unbounded)
    pub queue_bound: usize,
}

/// Cloneable handle to a running executor
#[derive(Clone)]
pub struct ExecutorHandle {
    sender: Sender<ExecutorEvent>,
}

impl ExecutorHandle {
    /// Hand a new round winner to the executor without waiting. If the queue
    /// is full the notification is dropped and logged.
    pub fn notify_winner(&self, rollup: Rollup) -> Result<(), ExecutorError> {
        match self.sender.try_send(ExecutorEvent::RoundWinner(rollup)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(ExecutorEvent::RoundWinner(r))) => {
                tracing::warn!("Executor queue full, dropping round winner r_{}", r.hash().short());
                Ok(())
            }
            Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutorError::Stopped),
        }
    }

    /// Queue a transaction (fire-and-forget)
    pub fn submit_tx(&self, tx: L2Tx) -> Result<(), ExecutorError> {
        match self.sender.try_send(ExecutorEvent::Transaction(tx)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Executor queue full, transaction left to the pending pool");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(ExecutorError::Stopped),
        }
    }

    /// Copy of the current speculative work. Blocks until the loop reaches
    /// the request; fails if the loop stopped before answering.
    pub fn snapshot(&self) -> Result<SpeculativeWork, ExecutorError> {
        let (reply, response) = bounded(1);
        self.sender
            .send(ExecutorEvent::Snapshot(reply))
            .map_err(|_| ExecutorError::Stopped)?;
        response.recv().map_err(|_| ExecutorError::Stopped)
    }

    /// Ask the loop to terminate after the events already queued
    pub fn stop(&self) {
        if self.sender.send(ExecutorEvent::Stop).is_err() {
            tracing::debug!("Speculative executor already stopped");
        }
    }
}

/// Speculative Executor
///
/// Folds incoming transactions onto the latest round winner so that a
/// rollup proposal is ready as soon as the next L1 block arrives.
pub struct SpeculativeExecutor {
    store: Arc<ChainStore>,
    events: Receiver<ExecutorEvent>,
    head: Option<Rollup>,
    state: ProcessedState,
    txs: Vec<L2Tx>,
    included: HashSet<Hash>,
}

impl SpeculativeExecutor {
    /// Spawn the loop on its own thread, seeded with `head` exactly as if it
    /// had just won a round
    pub fn spawn(
        store: Arc<ChainStore>,
        head: Rollup,
        config: ExecutorConfig,
    ) -> std::io::Result<(ExecutorHandle, JoinHandle<()>)> {
        let (sender, events) = if config.queue_bound == 0 {
            unbounded()
        } else {
            bounded(config.queue_bound)
        };

        let mut executor = Self {
            store,
            events,
            head: None,
            state: ProcessedState::default(),
            txs: Vec::new(),
            included: HashSet::new(),
        };
        executor.on_round_winner(head);

        let worker = std::thread::Builder::new()
            .name("speculative-executor".to_string())
            .spawn(move || executor.run())?;

        Ok((ExecutorHandle { sender }, worker))
    }

    /// Run the loop until `Stop` or until every handle is dropped
    pub fn run(mut self) {
        tracing::info!("Speculative executor started");

        while let Ok(event) = self.events.recv() {
            match event {
                ExecutorEvent::RoundWinner(rollup) => self.on_round_winner(rollup),
                ExecutorEvent::Transaction(tx) => self.on_transaction(tx),
                ExecutorEvent::Snapshot(reply) => {
                    // The requester may have given up, nothing to do then
                    let _ = reply.send(self.work());
                }
                ExecutorEvent::Stop => break,
            }
        }

        tracing::info!(
            "Speculative executor stopped with {} speculative txs",
            self.txs.len()
        );
    }

    fn on_round_winner(&mut self, rollup: Rollup) {
        let hash = rollup.hash();
        match self.rebase(&rollup) {
            Ok((state, txs)) => {
                tracing::debug!(
                    "Speculating on r_{} (height {}) with {} txs",
                    hash.short(),
                    rollup.height(),
                    txs.len()
                );
                self.included = txs.iter().map(L2Tx::hash).collect();
                self.state = state;
                self.txs = txs;
                self.head = Some(rollup);
            }
            Err(e) => {
                // Without a head, the next proposal recomputes from the store
                tracing::error!("Cannot speculate on r_{}: {}", hash.short(), e);
                self.head = None;
                self.state = ProcessedState::default();
                self.txs.clear();
                self.included.clear();
            }
        }
    }

    fn rebase(&self, rollup: &Rollup) -> StoreResult<(ProcessedState, Vec<L2Tx>)> {
        let base = rollup_state(rollup, &self.store)?;
        let txs = current_txs(rollup, self.store.fetch_txs()?, &self.store)?;
        let state = execute_transactions(&txs, new_processed_state(&base));
        Ok((state, txs))
    }

    fn on_transaction(&mut self, tx: L2Tx) {
        if !self.included.insert(tx.hash()) {
            tracing::debug!("Speculative executor already holds {:?}", tx.hash());
            return;
        }
        execute_tx(&mut self.state, &tx);
        self.txs.push(tx);
    }

    fn work(&self) -> SpeculativeWork {
        SpeculativeWork {
            head: self.head.clone(),
            state: copy_processed_state(&self.state),
            txs: self.txs.clone(),
        }
    }
}
