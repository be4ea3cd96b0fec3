//! The ledger store: the single component allowed to mutate the chain.
//!
//! ## Commit protocol
//!
//! A block commits in three durable steps, in a fixed order:
//!
//! 1. **Block store** — block content, current pointer, header index
//!    chunk when one is due (and, for genesis, the version marker).
//! 2. **Event store** — per-transaction notifications. Idempotent to
//!    re-save, which is why it precedes the state store.
//! 3. **State store** — write-set, merkle accumulators, per-height
//!    roots, account state hashes.
//!
//! A layer2 anchor accompanying a block is written directly (no batch)
//! just before step 1's commit, so the anchor is never newer than the
//! block pointer; the write is idempotent by key, and resubmitting an
//! already-committed block with its anchor re-stores the anchor.
//!
//! Only after all three does the in-memory chain pointer advance and the
//! commit notification go out. A crash between steps leaves the block
//! store ahead of the state store; startup recovery re-executes exactly
//! the heights in that gap.
//!
//! ## Concurrency
//!
//! All mutating operations serialize on a single-slot gate. Readers go
//! through a separate `RwLock` over the chain pointer and the sub-store
//! read paths, so queries keep flowing during a commit and observe
//! either the old tip or the new one, never a half-committed height.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{LedgerConfig, HEADER_INDEX_BATCH_SIZE, LAYER2_STATE_VERSION};
use crate::crypto::hash::{sha256, Hash};
use crate::crypto::merkle::{tree_root, MerkleProof};
use crate::crypto::multisig::{
    bookkeeper_address, quorum, sort_bookkeepers, verify_multisig, Address,
};
use crate::error::LedgerError;
use crate::events::{CommitEvent, CommitNotifier};
use crate::exec::{ExecContext, ExecutionEngine, GasTable};
use crate::store::common::{contract_key, storage_key, TAG_CONTRACT, TAG_STORAGE};
use crate::store::{BlockStore, EventStore, Layer2Store, OverlayDb, StateStore};
use crate::types::block::compute_tx_root;
use crate::types::{
    Block, BookkeeperState, ExecNotify, ExecuteResult, Header, Layer2State, PreExecResult,
    Transaction,
};
use crate::config::{DIR_BLOCK, DIR_EVENT, DIR_LAYER2, DIR_STATE};

struct ChainState {
    /// Height-to-hash index for every committed height.
    header_index: Vec<Hash>,
    /// How many index entries are already flushed to disk as chunks.
    stored_index_count: u64,
    current_height: u64,
    current_hash: Hash,
    initialized: bool,
    closing: bool,
    poisoned: bool,
}

/// The commitment layer's public face. See the module docs for the
/// commit protocol and concurrency rules.
pub struct LedgerStore {
    config: LedgerConfig,
    block_store: BlockStore,
    state_store: StateStore,
    event_store: EventStore,
    layer2_store: Layer2Store,
    engine: Box<dyn ExecutionEngine>,
    gas: RwLock<GasTable>,
    chain: RwLock<ChainState>,
    submit_gate: Mutex<()>,
    notifier: CommitNotifier,
}

impl LedgerStore {
    /// Open the ledger store rooted at `data_dir`, running crash
    /// recovery if the store is already initialized. A fresh store
    /// accepts nothing but [`init_with_genesis_block`](Self::init_with_genesis_block).
    pub fn open(
        data_dir: &Path,
        config: LedgerConfig,
        engine: Box<dyn ExecutionEngine>,
    ) -> Result<Self, LedgerError> {
        let block_store = BlockStore::open(&data_dir.join(DIR_BLOCK))?;
        let state_store = StateStore::open(&data_dir.join(DIR_STATE))?;
        let event_store = EventStore::open(&data_dir.join(DIR_EVENT))?;
        let layer2_store = Layer2Store::open(&data_dir.join(DIR_LAYER2))?;

        let initialized = block_store.version()?.is_some();
        let store = Self {
            config,
            block_store,
            state_store,
            event_store,
            layer2_store,
            engine,
            gas: RwLock::new(GasTable::new()),
            chain: RwLock::new(ChainState {
                header_index: Vec::new(),
                stored_index_count: 0,
                current_height: 0,
                current_hash: Hash::ZERO,
                initialized,
                closing: false,
                poisoned: false,
            }),
            submit_gate: Mutex::new(()),
            notifier: CommitNotifier::new(),
        };

        if initialized {
            store.load_chain_state()?;
            store.recover()?;
            store.gas.write().refresh_from_params(&store.state_store)?;
            let chain = store.chain.read();
            info!(
                height = chain.current_height,
                hash = %chain.current_hash,
                "ledger store opened"
            );
        } else {
            info!("ledger store opened uninitialized, awaiting genesis");
        }
        Ok(store)
    }

    /// Rebuild the in-memory chain pointer and header index from disk.
    /// Heights newer than the last flushed index chunk are recovered by
    /// walking parent links back from the block store's current pointer.
    fn load_chain_state(&self) -> Result<(), LedgerError> {
        let (height, hash) = self.block_store.current_block()?.ok_or_else(|| {
            LedgerError::Inconsistent("version marker present but no current block".into())
        })?;
        let mut index = self.block_store.load_header_index()?;
        let stored_index_count = index.len() as u64;

        if stored_index_count > height + 1 {
            return Err(LedgerError::Inconsistent(format!(
                "header index covers {} heights but tip is {height}",
                stored_index_count
            )));
        }
        // Fill the unflushed tail by walking back from the tip.
        let mut tail = Vec::new();
        let mut cursor = hash;
        let mut cursor_height = height;
        while cursor_height + 1 > stored_index_count {
            let header = self.block_store.header(&cursor)?.ok_or_else(|| {
                LedgerError::Inconsistent(format!("missing block {cursor} at height {cursor_height}"))
            })?;
            if header.height != cursor_height {
                return Err(LedgerError::Inconsistent(format!(
                    "block {cursor} claims height {} but is linked at {cursor_height}",
                    header.height
                )));
            }
            tail.push(cursor);
            cursor = header.prev_hash;
            if cursor_height == 0 {
                break;
            }
            cursor_height -= 1;
        }
        tail.reverse();
        index.extend(tail);

        let mut chain = self.chain.write();
        chain.header_index = index;
        chain.stored_index_count = stored_index_count;
        chain.current_height = height;
        chain.current_hash = hash;
        chain.initialized = true;
        Ok(())
    }

    /// Repair partial commits: re-execute every height committed to the
    /// block store but not yet to the state store. Event records in the
    /// gap are rewritten, which is safe because re-saving them is
    /// idempotent.
    fn recover(&self) -> Result<(), LedgerError> {
        let (block_height, _) = self.block_store.current_block()?.ok_or_else(|| {
            LedgerError::Inconsistent("recovery without a block store tip".into())
        })?;
        let state = self.state_store.current_block()?;

        let replay_from = match state {
            None => 0,
            Some((state_height, _)) if state_height == block_height => return Ok(()),
            Some((state_height, _)) if state_height < block_height => state_height + 1,
            Some((state_height, _)) => {
                return Err(LedgerError::Inconsistent(format!(
                    "state store at {state_height} is ahead of block store at {block_height}"
                )));
            }
        };

        warn!(
            from = replay_from,
            to = block_height,
            "replaying blocks to repair partial commit"
        );
        for height in replay_from..=block_height {
            let hash = self.chain.read().header_index[height as usize];
            let block = self.block_store.block(&hash)?.ok_or_else(|| {
                LedgerError::Inconsistent(format!("indexed block {hash} missing at {height}"))
            })?;
            let result = self.execute_block_inner(&block)?;
            self.commit_events_and_state(&block, &result)?;
            debug!(height, "replayed block");
        }
        Ok(())
    }

    /// Initialize a fresh store with its genesis block: execute it, run
    /// the full commit protocol, and write the version marker in the
    /// same block store batch so a crash mid-genesis leaves a store that
    /// simply initializes again.
    ///
    /// Calling this on an initialized store verifies the stored genesis
    /// matches and otherwise does nothing.
    pub fn init_with_genesis_block(&self, genesis: &Block) -> Result<(), LedgerError> {
        let _gate = self.submit_gate.lock();
        self.check_writable()?;

        if self.chain.read().initialized {
            let stored = self.chain.read().header_index[0];
            if stored == genesis.hash() {
                return Ok(());
            }
            return Err(LedgerError::Init(format!(
                "data dir already initialized with genesis {stored}, refusing {}",
                genesis.hash()
            )));
        }

        let header = &genesis.header;
        if header.height != 0 || !header.prev_hash.is_zero() {
            return Err(LedgerError::Init("genesis must be height 0 with no parent".into()));
        }
        if header.tx_root != compute_tx_root(&genesis.transactions) {
            return Err(LedgerError::Init("genesis tx root does not match its transactions".into()));
        }
        if !header.block_root.is_zero() {
            return Err(LedgerError::Init("genesis block root must be the zero sentinel".into()));
        }
        let derived = bookkeeper_address(&header.bookkeepers)
            .map_err(|e| LedgerError::Init(e.to_string()))?;
        if derived != header.next_bookkeeper {
            return Err(LedgerError::Init(
                "genesis next-bookkeeper address does not match its key list".into(),
            ));
        }

        // Leftovers from an aborted genesis attempt carry no version
        // marker; wipe them so initialization starts from nothing.
        self.block_store.clear_all()?;
        self.state_store.clear_all()?;
        self.event_store.clear_all()?;

        let result = self.execute_block_inner(genesis)?;
        self.commit_block(genesis, &result, None, true)?;

        let hash = genesis.hash();
        {
            let mut chain = self.chain.write();
            chain.header_index = vec![hash];
            chain.stored_index_count = 0;
            chain.current_height = 0;
            chain.current_hash = hash;
            chain.initialized = true;
        }
        self.gas.write().refresh_from_params(&self.state_store)?;
        info!(hash = %hash, "genesis committed");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------

    /// Validate a non-genesis header against the committed tip: parent
    /// linkage, height, timestamp, bookkeeper hand-off, and the m-of-n
    /// multisignature.
    pub fn verify_header(&self, header: &Header) -> Result<(), LedgerError> {
        let (current_height, current_hash) = {
            let chain = self.chain.read();
            if !chain.initialized {
                return Err(LedgerError::Init("store not initialized".into()));
            }
            (chain.current_height, chain.current_hash)
        };

        if header.height != current_height + 1 {
            return Err(LedgerError::OutOfOrder {
                got: header.height,
                current: current_height,
            });
        }
        if header.prev_hash != current_hash {
            return Err(LedgerError::InvalidHeader(format!(
                "parent {} is not the tip {current_hash}",
                header.prev_hash
            )));
        }
        let parent = self
            .block_store
            .header(&current_hash)?
            .ok_or_else(|| LedgerError::Inconsistent(format!("tip block {current_hash} missing")))?;
        if header.timestamp <= parent.timestamp {
            return Err(LedgerError::InvalidHeader(format!(
                "timestamp {} does not advance past parent's {}",
                header.timestamp, parent.timestamp
            )));
        }
        if sort_bookkeepers(&header.bookkeepers) != header.bookkeepers {
            return Err(LedgerError::InvalidHeader(
                "bookkeeper list is not in canonical order".into(),
            ));
        }
        let derived = bookkeeper_address(&header.bookkeepers)?;
        if derived != parent.next_bookkeeper {
            return Err(LedgerError::InvalidHeader(
                "bookkeeper set does not match the parent's hand-off commitment".into(),
            ));
        }
        verify_multisig(
            &header.hash(),
            &header.bookkeepers,
            quorum(header.bookkeepers.len()),
            &header.sig_data,
        )?;
        Ok(())
    }

    /// Validate a layer2 anchor accompanying a block: version, height
    /// matching the block it rides with, and the multisignature of that
    /// block's bookkeepers over the anchor hash.
    pub fn verify_layer2_state(
        &self,
        anchor: &Layer2State,
        header: &Header,
    ) -> Result<(), LedgerError> {
        if anchor.version != LAYER2_STATE_VERSION {
            return Err(LedgerError::InvalidLayer2State(format!(
                "unsupported version {}",
                anchor.version
            )));
        }
        if anchor.height != header.height {
            return Err(LedgerError::InvalidLayer2State(format!(
                "anchor height {} does not match block height {}",
                anchor.height, header.height
            )));
        }
        verify_multisig(
            &anchor.hash(),
            &header.bookkeepers,
            quorum(header.bookkeepers.len()),
            &anchor.sig_data,
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------

    /// Execute a block against the committed state without persisting
    /// anything. Pure given the committed state, which is what makes
    /// crash recovery a replay.
    ///
    /// For a height at or below the committed tip this returns the
    /// already-persisted roots and notifications instead of re-running
    /// anything; heights beyond the next expected one are rejected
    /// before execution.
    ///
    /// Holds the writer gate for the whole run, so the committed state
    /// the overlay reads through cannot shift mid-execution.
    pub fn execute_block(&self, block: &Block) -> Result<ExecuteResult, LedgerError> {
        let _gate = self.submit_gate.lock();
        let height = block.height();
        let (initialized, current) = {
            let chain = self.chain.read();
            (chain.initialized, chain.current_height)
        };
        if initialized {
            if height <= current {
                return self.persisted_result(height);
            }
            if height != current + 1 {
                return Err(LedgerError::OutOfOrder {
                    got: height,
                    current,
                });
            }
        } else if height != 0 {
            // Pre-init the committed state is empty; only genesis may
            // execute against it.
            return Err(LedgerError::Init("store not initialized".into()));
        }
        self.execute_block_inner(block)
    }

    /// The execution outcome of an already-committed height, rebuilt
    /// from the sub-stores.
    fn persisted_result(&self, height: u64) -> Result<ExecuteResult, LedgerError> {
        let state_root = self.state_store.state_root_at(height)?.ok_or_else(|| {
            LedgerError::Inconsistent(format!("no persisted state root at {height}"))
        })?;
        Ok(ExecuteResult {
            change_hash: Hash::ZERO,
            write_set: BTreeMap::new(),
            state_root,
            notify: self.event_store.notify_at_height(height)?,
            account_state_root: self
                .state_store
                .account_state_root_at(height)?
                .unwrap_or(Hash::ZERO),
            account_states: self.state_store.account_states_at(height)?.unwrap_or_default(),
        })
    }

    fn execute_block_inner(&self, block: &Block) -> Result<ExecuteResult, LedgerError> {
        if block.height() > 0 {
            self.gas.write().refresh_from_params(&self.state_store)?;
        }
        let gas = self.gas.read().clone();
        let ctx = ExecContext {
            height: block.height(),
            timestamp: block.header.timestamp,
            block_hash: block.hash(),
            pre_exec: false,
        };

        let mut overlay = OverlayDb::new(&self.state_store);
        let mut notify = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let n = self
                .engine
                .execute(&ctx, tx, &mut overlay, &gas)
                .map_err(|e| LedgerError::ExecutionAborted(e.to_string()))?;
            notify.push(n);
        }

        let change_hash = overlay.change_hash();
        let state_root = self.state_root_for(block.height(), change_hash, &overlay)?;
        let (account_states, account_state_root) = account_state_hashes(&overlay)?;

        Ok(ExecuteResult {
            change_hash,
            write_set: overlay.into_write_set(),
            state_root,
            notify,
            account_state_root,
            account_states,
        })
    }

    /// The three-phase state root policy, keyed on the checkpoint height.
    fn state_root_for(
        &self,
        height: u64,
        change_hash: Hash,
        overlay: &OverlayDb<'_>,
    ) -> Result<Hash, LedgerError> {
        let checkpoint = self.config.state_checkpoint_height;
        if height < checkpoint {
            return Ok(Hash::ZERO);
        }
        if height == checkpoint {
            // One-time anchor: a hash over the entire post-block state.
            let mut entries = overlay.scan_prefix(&[TAG_CONTRACT])?;
            entries.extend(overlay.scan_prefix(&[TAG_STORAGE])?);
            return Ok(sha256(
                &bincode::serialize(&entries)
                    .map_err(|e| LedgerError::ExecutionAborted(e.to_string()))?,
            ));
        }
        Ok(self.state_store.state_root_with(&[change_hash]))
    }

    /// Speculatively execute one transaction on top of the committed
    /// state. Nothing persists.
    pub fn pre_execute(&self, tx: &Transaction) -> Result<PreExecResult, LedgerError> {
        Ok(self
            .pre_execute_batch(std::slice::from_ref(tx), false)?
            .remove(0))
    }

    /// Speculatively execute transactions as one sequence: each sees
    /// the writes of those before it, exactly as in a block. Nothing
    /// persists. With `atomic` set the batch holds the writer gate, so
    /// the committed state cannot shift underneath it.
    pub fn pre_execute_batch(
        &self,
        txs: &[Transaction],
        atomic: bool,
    ) -> Result<Vec<PreExecResult>, LedgerError> {
        let _gate = atomic.then(|| self.submit_gate.lock());
        let chain = self.chain.read();
        if !chain.initialized {
            return Err(LedgerError::Init("store not initialized".into()));
        }
        let ctx = ExecContext {
            height: chain.current_height + 1,
            timestamp: 0,
            block_hash: Hash::ZERO,
            pre_exec: true,
        };
        drop(chain);

        let gas = self.gas.read().clone();
        let mut overlay = OverlayDb::new(&self.state_store);
        let mut results = Vec::with_capacity(txs.len());
        for tx in txs {
            let n = self
                .engine
                .execute(&ctx, tx, &mut overlay, &gas)
                .map_err(|e| LedgerError::ExecutionAborted(e.to_string()))?;
            results.push(PreExecResult {
                state: n.state,
                gas: n.gas_consumed,
                result: n.result,
                notify: n.events,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------
    // Submit
    // -----------------------------------------------------------------

    /// Validate a block (and the layer2 anchor riding with it, if any)
    /// together with an execution result, then run the commit protocol.
    /// Re-submitting an already committed block is a no-op; a block that
    /// conflicts with a committed height is rejected. Nothing is written
    /// until every validation has passed.
    pub fn submit_block(
        &self,
        block: &Block,
        layer2: Option<&Layer2State>,
        result: ExecuteResult,
    ) -> Result<(), LedgerError> {
        let _gate = self.submit_gate.lock();
        self.check_writable()?;

        let hash = block.hash();
        let height = block.height();
        {
            let chain = self.chain.read();
            if !chain.initialized {
                return Err(LedgerError::Init("store not initialized".into()));
            }
            if height <= chain.current_height {
                if chain.header_index[height as usize] == hash {
                    drop(chain);
                    // The block is durable; make sure its anchor is too.
                    // Covers an anchor lost between its write and the
                    // block commit in an earlier crashed submit.
                    if let Some(anchor) = layer2 {
                        self.verify_layer2_state(anchor, &block.header)?;
                        self.layer2_store.put(anchor)?;
                        debug!(height, "layer2 anchor stored for committed block");
                    }
                    debug!(height, "block already committed");
                    return Ok(());
                }
                return Err(LedgerError::InvalidHeader(format!(
                    "height {height} already committed with a different block"
                )));
            }
        }
        self.verify_header(&block.header)?;
        if block.header.tx_root != compute_tx_root(&block.transactions) {
            return Err(LedgerError::InvalidHeader(
                "tx root does not match block transactions".into(),
            ));
        }
        let expected = self.state_store.block_root_with(&[block.header.tx_root]);
        if expected != block.header.block_root {
            return Err(LedgerError::BlockRootMismatch {
                height,
                expected: expected.to_hex(),
                got: block.header.block_root.to_hex(),
            });
        }
        if let Some(anchor) = layer2 {
            self.verify_layer2_state(anchor, &block.header)?;
        }

        let flushed_chunk = self.commit_block(block, &result, layer2, false)?;

        let state_root = result.state_root;
        {
            let mut chain = self.chain.write();
            chain.header_index.push(hash);
            chain.current_height = height;
            chain.current_hash = hash;
            if flushed_chunk {
                chain.stored_index_count += HEADER_INDEX_BATCH_SIZE;
            }
        }
        info!(height, hash = %hash, "block committed");
        self.notifier.publish(CommitEvent {
            height,
            block_hash: hash,
            state_root,
            notify: Arc::new(result.notify),
        });
        Ok(())
    }

    /// Convenience wrapper: execute, then submit.
    pub fn execute_and_submit(&self, block: &Block) -> Result<(), LedgerError> {
        let result = self.execute_block(block)?;
        self.submit_block(block, None, result)
    }

    /// The layer2 anchor write if one rides along, step 1 of the commit
    /// protocol, then steps 2 and 3. Returns whether a header index
    /// chunk was flushed. A failure after step 1 poisons the store: the
    /// block is durable but events and state are not, and only a restart
    /// (which replays the gap) may continue from there.
    fn commit_block(
        &self,
        block: &Block,
        result: &ExecuteResult,
        layer2: Option<&Layer2State>,
        genesis: bool,
    ) -> Result<bool, LedgerError> {
        let hash = block.hash();
        let height = block.height();

        self.block_store.begin_batch()?;
        let staged = (|| -> Result<bool, LedgerError> {
            self.block_store.stage_block(block)?;
            self.block_store.stage_current(height, hash)?;
            if genesis {
                self.block_store.stage_version()?;
            }
            let chunk = {
                let chain = self.chain.read();
                let total = height + 1;
                if total - chain.stored_index_count >= HEADER_INDEX_BATCH_SIZE {
                    let start = chain.stored_index_count as usize;
                    let end = start + HEADER_INDEX_BATCH_SIZE as usize;
                    let mut hashes: Vec<Hash> = chain.header_index[start..].to_vec();
                    hashes.push(hash);
                    hashes.truncate(end - start);
                    Some((chain.stored_index_count, hashes))
                } else {
                    None
                }
            };
            let flushed = chunk.is_some();
            if let Some((start, hashes)) = chunk {
                self.block_store.stage_header_index_chunk(start, &hashes)?;
            }
            Ok(flushed)
        })();
        let flushed_chunk = match staged {
            Ok(f) => f,
            Err(e) => {
                self.block_store.discard_batch();
                return Err(e);
            }
        };
        // The anchor lands before the block pointer advances. A crash
        // after this write but before the block commit is repaired by
        // resubmitting the block, which rewrites the anchor by key.
        if let Some(anchor) = layer2 {
            if let Err(e) = self.layer2_store.put(anchor) {
                self.block_store.discard_batch();
                return Err(e.into());
            }
            debug!(height, "layer2 anchor stored");
        }
        self.block_store.commit_batch()?;

        if let Err(e) = self.commit_events_and_state_genesis(block, result, genesis) {
            self.chain.write().poisoned = true;
            warn!(height, "commit interrupted after block store, restart required");
            return Err(e);
        }
        Ok(flushed_chunk)
    }

    fn commit_events_and_state(
        &self,
        block: &Block,
        result: &ExecuteResult,
    ) -> Result<(), LedgerError> {
        self.commit_events_and_state_genesis(block, result, block.height() == 0)
    }

    /// Steps 2 and 3: events, then state. Shared between submit and
    /// recovery replay.
    fn commit_events_and_state_genesis(
        &self,
        block: &Block,
        result: &ExecuteResult,
        genesis: bool,
    ) -> Result<(), LedgerError> {
        let hash = block.hash();
        let height = block.height();

        self.event_store.begin_batch()?;
        if let Err(e) = self
            .event_store
            .stage_block_notify(height, hash, &result.notify)
        {
            self.event_store.discard_batch();
            return Err(e.into());
        }
        self.event_store.commit_batch()?;

        self.state_store.begin_batch()?;
        let staged = (|| -> Result<(), LedgerError> {
            self.state_store.stage_write_set(&result.write_set)?;
            self.state_store.stage_current(height, hash)?;
            self.state_store.stage_state_root(height, result.state_root)?;
            self.state_store.append_block_leaf(block.header.tx_root)?;
            if height > self.config.state_checkpoint_height {
                self.state_store.append_state_leaf(height, result.change_hash)?;
            }
            self.state_store.stage_account_states(
                height,
                result.account_state_root,
                &result.account_states,
            )?;
            if genesis {
                let keys = sort_bookkeepers(&block.header.bookkeepers);
                self.state_store.stage_bookkeeper_state(&BookkeeperState {
                    current: keys.clone(),
                    next: keys,
                })?;
            }
            Ok(())
        })();
        if let Err(e) = staged {
            self.state_store.discard_batch();
            return Err(e);
        }
        self.state_store.commit_batch()?;
        Ok(())
    }

    fn check_writable(&self) -> Result<(), LedgerError> {
        let chain = self.chain.read();
        if chain.closing {
            return Err(LedgerError::Closing);
        }
        if chain.poisoned {
            return Err(LedgerError::Inconsistent(
                "a commit was interrupted mid-protocol, restart to recover".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    /// The committed tip, `None` before genesis.
    pub fn current_block(&self) -> Option<(u64, Hash)> {
        let chain = self.chain.read();
        chain
            .initialized
            .then_some((chain.current_height, chain.current_hash))
    }

    /// The block hash committed at one height.
    pub fn block_hash_at(&self, height: u64) -> Option<Hash> {
        let chain = self.chain.read();
        if !chain.initialized {
            return None;
        }
        chain.header_index.get(height as usize).copied()
    }

    /// Fetch a committed block by height.
    pub fn block_at(&self, height: u64) -> Result<Option<Block>, LedgerError> {
        match self.block_hash_at(height) {
            Some(hash) => Ok(self.block_store.block(&hash)?),
            None => Ok(None),
        }
    }

    /// Fetch a committed block by hash.
    pub fn block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, LedgerError> {
        Ok(self.block_store.block(hash)?)
    }

    /// Fetch a committed header by height.
    pub fn header_at(&self, height: u64) -> Result<Option<Header>, LedgerError> {
        Ok(self.block_at(height)?.map(|b| b.header))
    }

    /// Whether a block with this hash is committed.
    pub fn contains_block(&self, hash: &Hash) -> Result<bool, LedgerError> {
        Ok(self.block_store.contains(hash)?)
    }

    /// Whether a committed block carries this transaction.
    pub fn contains_transaction(&self, tx_hash: &Hash) -> Result<bool, LedgerError> {
        Ok(self.block_store.tx_height(tx_hash)?.is_some())
    }

    /// Fetch a committed transaction together with the height it
    /// committed at.
    pub fn transaction(
        &self,
        tx_hash: &Hash,
    ) -> Result<Option<(Transaction, u64)>, LedgerError> {
        let Some(height) = self.block_store.tx_height(tx_hash)? else {
            return Ok(None);
        };
        let block = self.block_at(height)?.ok_or_else(|| {
            LedgerError::Inconsistent(format!(
                "transaction {tx_hash} indexed at missing height {height}"
            ))
        })?;
        match block.transactions.into_iter().find(|tx| tx.hash() == *tx_hash) {
            Some(tx) => Ok(Some((tx, height))),
            None => Err(LedgerError::Inconsistent(format!(
                "transaction {tx_hash} indexed at {height} but absent from its block"
            ))),
        }
    }

    /// The block root the next block at the tip must declare, given its
    /// transaction root.
    pub fn next_block_root(&self, tx_root: Hash) -> Hash {
        self.state_store.block_root_with(&[tx_root])
    }

    /// The committed state root for one height.
    pub fn state_root_at(&self, height: u64) -> Result<Option<Hash>, LedgerError> {
        Ok(self.state_store.state_root_at(height)?)
    }

    /// Inclusion proof for `proof_height`'s change leaf in the state
    /// merkle chain as it stood at `root_height`; verifies against the
    /// state root committed at `root_height`. `None` for heights at or
    /// below the checkpoint (they have no leaf), for a proof height past
    /// the root height, or for a root height beyond the tip.
    pub fn state_merkle_proof(
        &self,
        proof_height: u64,
        root_height: u64,
    ) -> Result<Option<MerkleProof>, LedgerError> {
        let checkpoint = self.config.state_checkpoint_height;
        let Some((current, _)) = self.current_block() else {
            return Ok(None);
        };
        if proof_height <= checkpoint || proof_height > root_height || root_height > current {
            return Ok(None);
        }
        let leaves = self.state_store.change_leaves(checkpoint + 1, root_height)?;
        Ok(MerkleProof::for_leaf(
            (proof_height - checkpoint - 1) as usize,
            &leaves,
        ))
    }

    /// Account state hashes recorded for one height.
    pub fn account_states_at(&self, height: u64) -> Result<Option<Vec<Hash>>, LedgerError> {
        Ok(self.state_store.account_states_at(height)?)
    }

    /// Root over the account state hashes recorded for one height.
    pub fn account_state_root_at(&self, height: u64) -> Result<Option<Hash>, LedgerError> {
        Ok(self.state_store.account_state_root_at(height)?)
    }

    /// Inclusion proof for one account state hash among the hashes
    /// recorded at a height, against that height's account state root.
    /// `None` when the height has no record or the hash is not in it.
    pub fn layer2_state_proof(
        &self,
        height: u64,
        state_hash: &Hash,
    ) -> Result<Option<MerkleProof>, LedgerError> {
        let Some(states) = self.state_store.account_states_at(height)? else {
            return Ok(None);
        };
        Ok(MerkleProof::for_value(state_hash, &states))
    }

    /// The execution notification for one transaction.
    pub fn notify_by_tx(&self, tx_hash: &Hash) -> Result<Option<ExecNotify>, LedgerError> {
        Ok(self.event_store.notify_by_tx(tx_hash)?)
    }

    /// All notifications for one height, block order.
    pub fn notify_at_height(&self, height: u64) -> Result<Vec<ExecNotify>, LedgerError> {
        Ok(self.event_store.notify_at_height(height)?)
    }

    /// The layer2 anchor stored for one height.
    pub fn layer2_state_at(&self, height: u64) -> Result<Option<Layer2State>, LedgerError> {
        Ok(self.layer2_store.get(height)?)
    }

    /// The highest height with a stored layer2 anchor.
    pub fn latest_layer2_height(&self) -> Result<Option<u64>, LedgerError> {
        Ok(self.layer2_store.latest_height()?)
    }

    /// The persisted bookkeeper state.
    pub fn bookkeeper_state(&self) -> Result<Option<BookkeeperState>, LedgerError> {
        Ok(self.state_store.bookkeeper_state()?)
    }

    /// Committed contract code at an address.
    pub fn contract_code(&self, contract: &Address) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.state_store.get(&contract_key(contract))?)
    }

    /// Committed storage record of one account under a contract.
    pub fn storage_value(
        &self,
        contract: &Address,
        account: &Address,
    ) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self.state_store.get(&storage_key(contract, account))?)
    }

    /// Whether a mutation currently holds the writer gate. Diagnostic
    /// probe, racy by nature.
    pub fn writer_busy(&self) -> bool {
        self.submit_gate.try_lock().is_none()
    }

    /// Subscribe to commit notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CommitEvent> {
        self.notifier.subscribe()
    }

    /// Refuse further mutations, wait out any in-flight commit, and
    /// flush every sub-store.
    pub fn close(&self) -> Result<(), LedgerError> {
        self.chain.write().closing = true;
        let _gate = self.submit_gate.lock();
        self.block_store.close()?;
        self.state_store.close()?;
        self.event_store.close()?;
        self.layer2_store.close()?;
        info!("ledger store closed");
        Ok(())
    }
}

/// Hash the post-block state of every touched account, canonical order,
/// plus the merkle root over those hashes. This is what layer2 inclusion
/// proofs are anchored to.
fn account_state_hashes(overlay: &OverlayDb<'_>) -> Result<(Vec<Hash>, Hash), LedgerError> {
    let mut states = Vec::new();
    for (contract, account) in overlay.touched_accounts() {
        let value = overlay.get(&storage_key(&contract, &account))?;
        let mut preimage = Vec::with_capacity(41 + value.as_ref().map_or(0, |v| v.len()));
        preimage.extend_from_slice(contract.as_bytes());
        preimage.extend_from_slice(account.as_bytes());
        match &value {
            Some(v) => {
                preimage.push(1);
                preimage.extend_from_slice(v);
            }
            None => preimage.push(0),
        }
        states.push(sha256(&preimage));
    }
    let root = tree_root(&states);
    Ok((states, root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GAS_STORAGE_PUT, GAS_TX_BASE};
    use crate::crypto::keys::Keypair;
    use crate::exec::{NativeEngine, StorageOp};
    use crate::types::ExecState;
    use tempfile::TempDir;

    fn keyset() -> Vec<Keypair> {
        (0..4u8).map(|i| Keypair::from_seed(&[i + 1; 32])).collect()
    }

    fn pubs(kps: &[Keypair]) -> Vec<crate::crypto::keys::PublicKey> {
        kps.iter().map(|k| k.public_key()).collect()
    }

    fn open_store(dir: &TempDir) -> LedgerStore {
        LedgerStore::open(
            dir.path(),
            LedgerConfig::default(),
            Box::new(NativeEngine::new()),
        )
        .unwrap()
    }

    fn init_genesis(store: &LedgerStore, kps: &[Keypair]) -> Block {
        let genesis = Block::genesis(&pubs(kps), 1_700_000_000, vec![]).unwrap();
        store.init_with_genesis_block(&genesis).unwrap();
        genesis
    }

    fn set_op(c: u8, a: u8, v: u8) -> StorageOp {
        StorageOp::Set {
            contract: Address([c; 20]),
            account: Address([a; 20]),
            value: vec![v],
        }
    }

    fn ops_tx(ops: &[StorageOp], nonce: u64) -> Transaction {
        Transaction::invoke(
            bincode::serialize(&ops.to_vec()).unwrap(),
            Address([9; 20]),
            nonce,
            1_000_000,
        )
    }

    /// Build a signed block extending the current tip.
    fn next_block(store: &LedgerStore, kps: &[Keypair], txs: Vec<Transaction>) -> Block {
        let (height, hash) = store.current_block().unwrap();
        let parent = store.block_by_hash(&hash).unwrap().unwrap().header;
        let tx_root = compute_tx_root(&txs);
        let mut block = Block::build(
            &parent,
            txs,
            &pubs(kps),
            parent.next_bookkeeper,
            parent.timestamp + 1 + height,
            store.next_block_root(tx_root),
        );
        for kp in kps {
            block.header.sign(kp);
        }
        block
    }

    #[test]
    fn genesis_then_blocks_commit_in_order() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        let genesis = init_genesis(&store, &kps);
        assert_eq!(store.current_block(), Some((0, genesis.hash())));

        let tx = ops_tx(&[set_op(1, 1, 7)], 0);
        let tx_hash = tx.hash();
        let b1 = next_block(&store, &kps, vec![tx]);
        store.execute_and_submit(&b1).unwrap();
        let b2 = next_block(&store, &kps, vec![ops_tx(&[set_op(1, 2, 8)], 1)]);
        store.execute_and_submit(&b2).unwrap();

        assert_eq!(store.current_block(), Some((2, b2.hash())));
        assert_eq!(store.block_hash_at(1), Some(b1.hash()));
        assert_eq!(store.block_at(1).unwrap().unwrap(), b1);
        assert_eq!(
            store
                .storage_value(&Address([1; 20]), &Address([1; 20]))
                .unwrap(),
            Some(vec![7])
        );
        let notify = store.notify_by_tx(&tx_hash).unwrap().unwrap();
        assert_eq!(notify.state, ExecState::Success);
        assert_eq!(notify.gas_consumed, GAS_TX_BASE + GAS_STORAGE_PUT);
        assert!(store.state_root_at(2).unwrap().is_some());

        assert!(store.contains_block(&b1.hash()).unwrap());
        assert!(store.contains_transaction(&tx_hash).unwrap());
        let (tx, height) = store.transaction(&tx_hash).unwrap().unwrap();
        assert_eq!((tx.hash(), height), (tx_hash, 1));
        assert!(!store.contains_transaction(&sha256(b"nowhere")).unwrap());
    }

    #[test]
    fn state_merkle_proofs_verify_against_chain_root() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);

        for n in 0..3u64 {
            let block = next_block(&store, &kps, vec![ops_tx(&[set_op(1, n as u8 + 1, 1)], n)]);
            store.execute_and_submit(&block).unwrap();
        }

        // Every change leaf proves into the state root of any later
        // height, including the tip.
        for root_height in 1..=3u64 {
            let root = store.state_root_at(root_height).unwrap().unwrap();
            for height in 1..=root_height {
                let proof = store
                    .state_merkle_proof(height, root_height)
                    .unwrap()
                    .unwrap();
                let leaf = store.state_store.change_leaves(height, height).unwrap()[0];
                assert!(proof.verify(&leaf, &root), "{height} in {root_height}");
            }
        }
        assert!(store.state_merkle_proof(0, 3).unwrap().is_none());
        assert!(store.state_merkle_proof(3, 2).unwrap().is_none());
        assert!(store.state_merkle_proof(2, 9).unwrap().is_none());
    }

    #[test]
    fn wrong_block_root_rejected_with_nothing_committed() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        let genesis = init_genesis(&store, &kps);

        let mut block = next_block(&store, &kps, vec![]);
        block.header.block_root = sha256(b"wrong");
        block.header.sig_data.clear();
        for kp in &kps {
            block.header.sign(kp);
        }
        let result = store.execute_block(&block).unwrap();
        let err = store.submit_block(&block, None, result).unwrap_err();
        assert!(matches!(err, LedgerError::BlockRootMismatch { height: 1, .. }));
        assert_eq!(store.current_block(), Some((0, genesis.hash())));
        assert!(store.notify_at_height(1).unwrap().is_empty());
    }

    #[test]
    fn unsigned_and_underquorum_headers_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);

        let (_, hash) = store.current_block().unwrap();
        let parent = store.block_by_hash(&hash).unwrap().unwrap().header;
        let mut block = Block::build(
            &parent,
            vec![],
            &pubs(&kps),
            parent.next_bookkeeper,
            parent.timestamp + 1,
            store.next_block_root(Hash::ZERO),
        );
        // No signatures at all.
        assert!(matches!(
            store.verify_header(&block.header),
            Err(LedgerError::Multisig(_))
        ));
        // Two of four is below the quorum of three.
        for kp in &kps[..2] {
            block.header.sign(kp);
        }
        assert!(matches!(
            store.verify_header(&block.header),
            Err(LedgerError::Multisig(_))
        ));
        // Three of four meets it.
        block.header.sign(&kps[2]);
        store.verify_header(&block.header).unwrap();
    }

    #[test]
    fn out_of_order_and_conflicting_blocks_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);
        let b1 = next_block(&store, &kps, vec![]);
        store.execute_and_submit(&b1).unwrap();

        // A gap.
        let mut skip = next_block(&store, &kps, vec![]);
        skip.header.height = 5;
        assert!(matches!(
            store.verify_header(&skip.header),
            Err(LedgerError::OutOfOrder { got: 5, current: 1 })
        ));

        // Executing past the next expected height is refused outright.
        assert!(matches!(
            store.execute_block(&skip),
            Err(LedgerError::OutOfOrder { got: 5, current: 1 })
        ));

        // Re-executing a committed height returns the persisted outcome.
        let replay = store.execute_block(&b1).unwrap();
        assert_eq!(Some(replay.state_root), store.state_root_at(1).unwrap());
        assert!(replay.write_set.is_empty());

        // Resubmitting the committed block is a quiet no-op.
        store.submit_block(&b1, None, replay).unwrap();
        assert_eq!(store.current_block().unwrap().0, 1);

        // A different block at a committed height is a conflict.
        let mut conflicting = b1.clone();
        conflicting.header.timestamp += 99;
        conflicting.header.sig_data.clear();
        for kp in &kps {
            conflicting.header.sign(kp);
        }
        let result = store.execute_block(&conflicting).unwrap();
        assert!(matches!(
            store.submit_block(&conflicting, None, result),
            Err(LedgerError::InvalidHeader(_))
        ));
    }

    #[test]
    fn recovery_replays_partially_committed_block() {
        let dir = TempDir::new().unwrap();
        let kps = keyset();
        let expected_state_root;
        let b2;
        {
            let store = open_store(&dir);
            init_genesis(&store, &kps);
            let b1 = next_block(&store, &kps, vec![ops_tx(&[set_op(1, 1, 1)], 0)]);
            store.execute_and_submit(&b1).unwrap();

            // Simulate a crash after step 1 of the protocol: block 2
            // lands in the block store, events and state never do.
            b2 = next_block(&store, &kps, vec![ops_tx(&[set_op(1, 2, 2)], 1)]);
            let result = store.execute_block(&b2).unwrap();
            expected_state_root = result.state_root;
            store.block_store.begin_batch().unwrap();
            store.block_store.stage_block(&b2).unwrap();
            store.block_store.stage_current(2, b2.hash()).unwrap();
            store.block_store.commit_batch().unwrap();
            store.close().unwrap();
        }

        let store = open_store(&dir);
        assert_eq!(store.current_block(), Some((2, b2.hash())));
        assert_eq!(store.state_root_at(2).unwrap(), Some(expected_state_root));
        assert_eq!(
            store
                .storage_value(&Address([1; 20]), &Address([2; 20]))
                .unwrap(),
            Some(vec![2])
        );
        assert_eq!(store.notify_at_height(2).unwrap().len(), 1);

        // And the chain keeps extending normally after the repair.
        let b3 = next_block(&store, &kps, vec![]);
        store.execute_and_submit(&b3).unwrap();
        assert_eq!(store.current_block().unwrap().0, 3);
    }

    #[test]
    fn recovery_replays_a_multi_height_gap() {
        let dir = TempDir::new().unwrap();
        let kps = keyset();
        let b3_hash;
        {
            let store = open_store(&dir);
            init_genesis(&store, &kps);
            let b1 = next_block(&store, &kps, vec![ops_tx(&[set_op(1, 1, 1)], 0)]);
            store.execute_and_submit(&b1).unwrap();

            // Blocks 2 and 3 reach the block store, events and state
            // never do, as a crash spanning two submits would leave
            // things.
            let tx2 = ops_tx(&[set_op(1, 2, 2)], 1);
            let tx3 = ops_tx(&[set_op(1, 3, 3)], 2);
            let root2 = compute_tx_root(std::slice::from_ref(&tx2));
            let root3 = compute_tx_root(std::slice::from_ref(&tx3));
            let mut b2 = Block::build(
                &b1.header,
                vec![tx2],
                &pubs(&kps),
                b1.header.next_bookkeeper,
                b1.header.timestamp + 1,
                store.state_store.block_root_with(&[root2]),
            );
            for kp in &kps {
                b2.header.sign(kp);
            }
            let mut b3 = Block::build(
                &b2.header,
                vec![tx3],
                &pubs(&kps),
                b2.header.next_bookkeeper,
                b2.header.timestamp + 1,
                store.state_store.block_root_with(&[root2, root3]),
            );
            for kp in &kps {
                b3.header.sign(kp);
            }
            b3_hash = b3.hash();
            store.block_store.begin_batch().unwrap();
            store.block_store.stage_block(&b2).unwrap();
            store.block_store.stage_block(&b3).unwrap();
            store.block_store.stage_current(3, b3_hash).unwrap();
            store.block_store.commit_batch().unwrap();
            store.close().unwrap();
        }

        let store = open_store(&dir);
        assert_eq!(store.current_block(), Some((3, b3_hash)));
        for (account, value, height) in [(2u8, 2u8, 2u64), (3, 3, 3)] {
            assert_eq!(
                store
                    .storage_value(&Address([1; 20]), &Address([account; 20]))
                    .unwrap(),
                Some(vec![value]),
                "height {height}"
            );
            assert_eq!(store.notify_at_height(height).unwrap().len(), 1);
            assert!(store.state_root_at(height).unwrap().is_some());
        }
        assert_ne!(
            store.state_root_at(2).unwrap(),
            store.state_root_at(3).unwrap()
        );
        // The replayed accumulators line up: the chain keeps extending.
        let b4 = next_block(&store, &kps, vec![]);
        store.execute_and_submit(&b4).unwrap();
        assert_eq!(store.current_block().unwrap().0, 4);
    }

    #[test]
    fn reopen_preserves_chain_and_roots() {
        let dir = TempDir::new().unwrap();
        let kps = keyset();
        let tip;
        let root;
        {
            let store = open_store(&dir);
            init_genesis(&store, &kps);
            for n in 0..2u64 {
                let block = next_block(&store, &kps, vec![ops_tx(&[set_op(2, n as u8, 5)], n)]);
                store.execute_and_submit(&block).unwrap();
            }
            tip = store.current_block().unwrap();
            root = store.state_root_at(2).unwrap().unwrap();
            store.close().unwrap();
        }
        let store = open_store(&dir);
        assert_eq!(store.current_block(), Some(tip));
        assert_eq!(store.state_root_at(2).unwrap(), Some(root));
        let b3 = next_block(&store, &kps, vec![]);
        store.execute_and_submit(&b3).unwrap();
    }

    #[test]
    fn reinit_with_different_genesis_refused() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        let genesis = init_genesis(&store, &kps);

        // Same genesis: idempotent.
        store.init_with_genesis_block(&genesis).unwrap();

        let other = Block::genesis(&pubs(&kps), 1_800_000_000, vec![]).unwrap();
        assert!(matches!(
            store.init_with_genesis_block(&other),
            Err(LedgerError::Init(_))
        ));
    }

    #[test]
    fn pre_execute_is_speculative_and_batch_is_sequential() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);

        let payload = crate::types::DeployPayload {
            code: vec![0xEE; 8],
            name: "probe".into(),
            version: "1".into(),
            author: "dev".into(),
        };
        let address = payload.contract_address();
        let deploy = Transaction::deploy(payload, Address([9; 20]), 0, 1_000_000);

        let single = store.pre_execute(&deploy).unwrap();
        assert_eq!(single.state, ExecState::Success);
        assert_eq!(single.result, Some(address.as_bytes().to_vec()));
        // Nothing persisted.
        assert!(store.contract_code(&address).unwrap().is_none());
        assert_eq!(store.current_block().unwrap().0, 0);

        // In a batch, later transactions observe earlier writes: the
        // second write to the same slot costs the same but the slot holds
        // the later value in its notification context.
        let batch = store
            .pre_execute_batch(
                &[ops_tx(&[set_op(3, 1, 1)], 0), ops_tx(&[set_op(3, 1, 2)], 1)],
                false,
            )
            .unwrap();
        assert!(batch.iter().all(|r| r.state == ExecState::Success));
        // Atomic mode takes and releases the writer gate.
        assert!(!store.writer_busy());
        store
            .pre_execute_batch(&[ops_tx(&[set_op(3, 2, 1)], 2)], true)
            .unwrap();
        assert!(!store.writer_busy());
        assert!(store
            .storage_value(&Address([3; 20]), &Address([1; 20]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn failed_transactions_commit_without_their_writes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);

        let good = ops_tx(&[set_op(1, 1, 1)], 0);
        let bad = Transaction::invoke(vec![0xFF, 0xFF], Address([9; 20]), 1, 1_000_000);
        let bad_hash = bad.hash();
        let block = next_block(&store, &kps, vec![good, bad]);
        store.execute_and_submit(&block).unwrap();

        let notify = store.notify_at_height(1).unwrap();
        assert_eq!(notify.len(), 2);
        assert_eq!(notify[1].state, ExecState::Failed);
        assert_eq!(
            store.notify_by_tx(&bad_hash).unwrap().unwrap().state,
            ExecState::Failed
        );
        assert_eq!(
            store
                .storage_value(&Address([1; 20]), &Address([1; 20]))
                .unwrap(),
            Some(vec![1])
        );
    }

    #[test]
    fn account_state_hashes_recorded_per_height() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);

        let block = next_block(
            &store,
            &kps,
            vec![ops_tx(&[set_op(1, 1, 1), set_op(1, 2, 2)], 0)],
        );
        store.execute_and_submit(&block).unwrap();

        let states = store.account_states_at(1).unwrap().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(
            store.account_state_root_at(1).unwrap(),
            Some(tree_root(&states))
        );
        // A proof for one account's state verifies against the root.
        let proof = store.layer2_state_proof(1, &states[0]).unwrap().unwrap();
        assert!(proof.verify(&states[0], &tree_root(&states)));
        assert!(store
            .layer2_state_proof(1, &sha256(b"absent"))
            .unwrap()
            .is_none());
    }

    fn signed_anchor(kps: &[Keypair], height: u64) -> Layer2State {
        let mut anchor = Layer2State {
            height,
            version: LAYER2_STATE_VERSION,
            state_root: sha256(b"l2"),
            tx_root: sha256(b"l2 txs"),
            sig_data: Vec::new(),
        };
        for kp in kps {
            anchor.sign(kp);
        }
        anchor
    }

    #[test]
    fn layer2_anchor_commits_with_its_block() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);

        let b1 = next_block(&store, &kps, vec![]);
        let anchor = signed_anchor(&kps, 1);
        let result = store.execute_block(&b1).unwrap();
        store.submit_block(&b1, Some(&anchor), result).unwrap();

        assert_eq!(store.layer2_state_at(1).unwrap(), Some(anchor));
        assert_eq!(store.latest_layer2_height().unwrap(), Some(1));
        // Blocks without an anchor leave the layer2 record untouched.
        let b2 = next_block(&store, &kps, vec![]);
        store.execute_and_submit(&b2).unwrap();
        assert_eq!(store.latest_layer2_height().unwrap(), Some(1));
    }

    #[test]
    fn invalid_layer2_anchor_blocks_the_whole_submit() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        let genesis = init_genesis(&store, &kps);
        let b1 = next_block(&store, &kps, vec![]);

        // Height must match the block the anchor rides with.
        let mismatched = signed_anchor(&kps, 7);
        let result = store.execute_block(&b1).unwrap();
        assert!(matches!(
            store.submit_block(&b1, Some(&mismatched), result),
            Err(LedgerError::InvalidLayer2State(_))
        ));

        // Wrong version.
        let mut stale = signed_anchor(&kps, 1);
        stale.version = LAYER2_STATE_VERSION + 1;
        let result = store.execute_block(&b1).unwrap();
        assert!(matches!(
            store.submit_block(&b1, Some(&stale), result),
            Err(LedgerError::InvalidLayer2State(_))
        ));

        // Under the quorum of three.
        let weak = signed_anchor(&kps[..1], 1);
        let result = store.execute_block(&b1).unwrap();
        assert!(matches!(
            store.submit_block(&b1, Some(&weak), result),
            Err(LedgerError::Multisig(_))
        ));

        // Nothing committed by the failed attempts.
        assert_eq!(store.current_block(), Some((0, genesis.hash())));
        assert!(store.layer2_state_at(1).unwrap().is_none());

        // The same block goes through once its anchor is valid.
        let anchor = signed_anchor(&kps, 1);
        let result = store.execute_block(&b1).unwrap();
        store.submit_block(&b1, Some(&anchor), result).unwrap();
        assert_eq!(store.current_block(), Some((1, b1.hash())));
    }

    #[test]
    fn execute_block_waits_for_the_writer_gate() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);
        let b1 = next_block(&store, &kps, vec![ops_tx(&[set_op(1, 1, 1)], 0)]);

        let finished = AtomicBool::new(false);
        std::thread::scope(|s| {
            let gate = store.submit_gate.lock();
            let worker = s.spawn(|| {
                let result = store.execute_block(&b1);
                finished.store(true, Ordering::SeqCst);
                result
            });
            std::thread::sleep(std::time::Duration::from_millis(50));
            assert!(
                !finished.load(Ordering::SeqCst),
                "execution ran while a mutating operation held the gate"
            );
            drop(gate);
            worker.join().unwrap().unwrap();
        });
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn execute_before_init_only_accepts_genesis() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();

        let mut block = Block::genesis(&pubs(&kps), 1_700_000_000, vec![]).unwrap();
        block.header.height = 1;
        assert!(matches!(
            store.execute_block(&block),
            Err(LedgerError::Init(_))
        ));
        // Height 0 still executes, which is what initialization relies on.
        block.header.height = 0;
        store.execute_block(&block).unwrap();
    }

    #[test]
    fn resubmitting_a_committed_block_restores_its_anchor() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);

        // The block committed but its anchor never landed, the window a
        // crash between the anchor write and the block commit leaves.
        let b1 = next_block(&store, &kps, vec![]);
        store.execute_and_submit(&b1).unwrap();
        assert!(store.layer2_state_at(1).unwrap().is_none());

        // An invalid anchor still gets rejected on the resubmit path.
        let weak = signed_anchor(&kps[..1], 1);
        let result = store.execute_block(&b1).unwrap();
        assert!(matches!(
            store.submit_block(&b1, Some(&weak), result),
            Err(LedgerError::Multisig(_))
        ));

        let anchor = signed_anchor(&kps, 1);
        let result = store.execute_block(&b1).unwrap();
        store.submit_block(&b1, Some(&anchor), result).unwrap();
        assert_eq!(store.layer2_state_at(1).unwrap(), Some(anchor));
        assert_eq!(store.current_block().unwrap().0, 1);
    }

    #[test]
    fn commit_notifications_reach_subscribers() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);

        let mut rx = store.subscribe();
        let block = next_block(&store, &kps, vec![ops_tx(&[set_op(1, 1, 1)], 0)]);
        store.execute_and_submit(&block).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.height, 1);
        assert_eq!(event.block_hash, block.hash());
        assert_eq!(event.notify.len(), 1);
        assert_eq!(event.state_root, store.state_root_at(1).unwrap().unwrap());
    }

    #[test]
    fn close_refuses_further_mutations() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);
        let block = next_block(&store, &kps, vec![]);
        store.close().unwrap();
        assert!(matches!(
            store.execute_and_submit(&block),
            Err(LedgerError::Closing)
        ));
    }

    #[test]
    fn gas_repricing_takes_effect_next_block() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let kps = keyset();
        init_genesis(&store, &kps);

        let reprice = ops_tx(
            &[StorageOp::SetGasParam {
                name: "tx.base".into(),
                value: 900,
            }],
            0,
        );
        let b1 = next_block(&store, &kps, vec![reprice]);
        store.execute_and_submit(&b1).unwrap();

        let probe = ops_tx(&[], 1);
        let probe_hash = probe.hash();
        let b2 = next_block(&store, &kps, vec![probe]);
        store.execute_and_submit(&b2).unwrap();
        assert_eq!(
            store.notify_by_tx(&probe_hash).unwrap().unwrap().gas_consumed,
            900
        );
    }
}
