//! Mock chain client for testing
//!
//! Scripted in-memory ledger: every submission lands in its own block,
//! lock submissions can emit `Locked` events, and failures are queued per
//! operation.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::error::ChainError;
use super::{
    ChainClient, ChainEvent, ContractCall, EventFilter, EventKind, FeeEstimate, Receipt, TxRef,
};

pub struct MockChainClient {
    chain_id: String,
    next_tx: AtomicU64,
    height: AtomicU64,
    /// Block of every accepted transaction
    tx_blocks: Mutex<HashMap<String, u64>>,
    events: Mutex<Vec<ChainEvent>>,
    submitted: Mutex<Vec<ContractCall>>,
    /// Configured behavior
    default_fee: Mutex<FeeEstimate>,
    fee_script: Mutex<VecDeque<Result<FeeEstimate, ChainError>>>,
    submit_failures: Mutex<VecDeque<ChainError>>,
    confirm_failures: Mutex<VecDeque<ChainError>>,
    confirmation_delay: Mutex<Duration>,
    estimate_delay: Mutex<Duration>,
    lock_proof: Mutex<Option<(String, String)>>,
    lock_event_copies: AtomicUsize,
    /// Call counters
    estimate_count: AtomicUsize,
    submit_count: AtomicUsize,
    confirm_count: AtomicUsize,
    query_count: AtomicUsize,
}

impl MockChainClient {
    pub fn new(chain_id: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            next_tx: AtomicU64::new(1),
            height: AtomicU64::new(100),
            tx_blocks: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            default_fee: Mutex::new(FeeEstimate::new(100_000, 30_000_000_000)),
            fee_script: Mutex::new(VecDeque::new()),
            submit_failures: Mutex::new(VecDeque::new()),
            confirm_failures: Mutex::new(VecDeque::new()),
            confirmation_delay: Mutex::new(Duration::ZERO),
            estimate_delay: Mutex::new(Duration::ZERO),
            lock_proof: Mutex::new(None),
            lock_event_copies: AtomicUsize::new(1),
            estimate_count: AtomicUsize::new(0),
            submit_count: AtomicUsize::new(0),
            confirm_count: AtomicUsize::new(0),
            query_count: AtomicUsize::new(0),
        }
    }

    /// Every lock submission emits `Locked(owner, asset, token_uri)`
    pub fn set_lock_proof(&self, owner: &str, token_uri: &str) {
        *self.lock_proof.lock().unwrap() = Some((owner.to_string(), token_uri.to_string()));
    }

    /// Number of `Locked` events each lock submission emits (default 1)
    pub fn set_lock_event_copies(&self, copies: usize) {
        self.lock_event_copies.store(copies, Ordering::SeqCst);
    }

    pub fn set_default_fee(&self, fee: FeeEstimate) {
        *self.default_fee.lock().unwrap() = fee;
    }

    /// Queue a result for the next `estimate_fee` call
    pub fn push_fee(&self, result: Result<FeeEstimate, ChainError>) {
        self.fee_script.lock().unwrap().push_back(result);
    }

    pub fn fail_next_submit(&self, error: ChainError) {
        self.submit_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_confirmation(&self, error: ChainError) {
        self.confirm_failures.lock().unwrap().push_back(error);
    }

    pub fn set_confirmation_delay(&self, delay: Duration) {
        *self.confirmation_delay.lock().unwrap() = delay;
    }

    /// Latency of every `estimate_fee` call
    pub fn set_estimate_delay(&self, delay: Duration) {
        *self.estimate_delay.lock().unwrap() = delay;
    }

    /// Insert an arbitrary event, e.g. one emitted by another transaction
    pub fn push_event(&self, event: ChainEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn submitted_calls(&self) -> Vec<ContractCall> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn estimate_count(&self) -> usize {
        self.estimate_count.load(Ordering::SeqCst)
    }

    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn confirm_count(&self) -> usize {
        self.confirm_count.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    /// Total chain calls of any kind
    pub fn call_count(&self) -> usize {
        self.estimate_count() + self.submit_count() + self.confirm_count() + self.query_count()
    }

    fn timeout_error(tx: &TxRef, waited: Duration) -> ChainError {
        ChainError::ConfirmationTimeout {
            tx_hash: tx.hash.clone(),
            waited,
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn submit(&self, call: &ContractCall, _fee: &FeeEstimate) -> Result<TxRef, ChainError> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let hash = format!("0x{}{:04}", self.chain_id, n);
        let block = self.height.fetch_add(1, Ordering::SeqCst) + 1;

        self.tx_blocks.lock().unwrap().insert(hash.clone(), block);
        self.submitted.lock().unwrap().push(call.clone());

        if let ContractCall::Lock { asset_id } = call
            && let Some((owner, token_uri)) = self.lock_proof.lock().unwrap().clone()
        {
            let copies = self.lock_event_copies.load(Ordering::SeqCst);
            let mut events = self.events.lock().unwrap();
            for log_index in 0..copies {
                events.push(ChainEvent {
                    kind: EventKind::Locked,
                    tx_hash: hash.clone(),
                    block_number: block,
                    log_index: log_index as u64,
                    asset_id: *asset_id,
                    owner: owner.clone(),
                    token_uri: token_uri.clone(),
                });
            }
        }

        Ok(TxRef::new(self.chain_id.clone(), hash))
    }

    async fn estimate_fee(&self, _call: &ContractCall) -> Result<FeeEstimate, ChainError> {
        self.estimate_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.estimate_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.fee_script.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(*self.default_fee.lock().unwrap()),
        }
    }

    async fn await_confirmation(
        &self,
        tx: &TxRef,
        timeout: Duration,
    ) -> Result<Receipt, ChainError> {
        self.confirm_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.confirmation_delay.lock().unwrap();
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(Self::timeout_error(tx, timeout));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.confirm_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let block = self.tx_blocks.lock().unwrap().get(&tx.hash).copied();
        match block {
            Some(block) => Ok(Receipt {
                tx: tx.clone().confirmed_at(block),
                block_number: block,
                confirmations: 1,
            }),
            // Never reached the network; waiting cannot help
            None => Err(Self::timeout_error(tx, timeout)),
        }
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<ChainEvent>, ChainError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);

        let mut matching: Vec<ChainEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == filter.kind)
            .filter(|e| filter.asset_id.is_none_or(|id| e.asset_id == id))
            .filter(|e| e.block_number >= filter.from_block && e.block_number <= filter.to_block)
            .cloned()
            .collect();
        matching.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::AssetId;

    #[tokio::test]
    async fn test_lock_emits_event_in_its_block() {
        let chain = MockChainClient::new("source");
        chain.set_lock_proof("0xabc", "ipfs://xyz");

        let fee = chain.estimate_fee(&ContractCall::Lock { asset_id: AssetId::new(1) }).await.unwrap();
        let tx = chain
            .submit(&ContractCall::Lock { asset_id: AssetId::new(1) }, &fee)
            .await
            .unwrap();
        let receipt = chain
            .await_confirmation(&tx, Duration::from_secs(1))
            .await
            .unwrap();

        let events = chain
            .query_events(&EventFilter::locked_in_block(AssetId::new(1), receipt.block_number))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tx_hash, tx.hash);
        assert_eq!(events[0].owner, "0xabc");
        assert_eq!(chain.call_count(), 4);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let chain = MockChainClient::new("dest");
        chain.fail_next_submit(ChainError::Submission {
            chain: "dest".into(),
            reason: "connection reset".into(),
            retryable: true,
        });

        let call = ContractCall::Lock { asset_id: AssetId::new(2) };
        let fee = FeeEstimate::new(1, 1);
        assert!(chain.submit(&call, &fee).await.is_err());
        assert!(chain.submit(&call, &fee).await.is_ok());
        assert_eq!(chain.submit_count(), 2);
        assert_eq!(chain.submitted_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_confirmation_times_out() {
        let chain = MockChainClient::new("dest");
        chain.set_confirmation_delay(Duration::from_secs(60));

        let call = ContractCall::Lock { asset_id: AssetId::new(3) };
        let tx = chain.submit(&call, &FeeEstimate::new(1, 1)).await.unwrap();
        let err = chain
            .await_confirmation(&tx, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::ConfirmationTimeout { .. }));
    }
}
