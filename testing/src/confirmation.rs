//! Scripted backend for confirmation tests.
//!
//! Answers are queued per kind and consumed in call order; once a queue is
//! empty every call succeeds. A hold confirmation can also be parked until
//! the test lets it through, to exercise changes made while it is in flight.

use async_trait::async_trait;
use seathold_core::notification::HoldItem;
use seathold_core::types::HoldToken;
use seathold_runtime::confirmation::{ConfirmationError, ConfirmationService};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, oneshot};

/// One call received by the scripted backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationCall {
    /// `confirm_hold`
    Hold {
        /// Token
        token: HoldToken,
        /// Items
        items: Vec<HoldItem>,
    },
    /// `confirm_release`
    Release {
        /// Token
        token: HoldToken,
        /// Items
        items: Vec<HoldItem>,
    },
}

#[derive(Debug, Default)]
struct Script {
    holds: VecDeque<Result<(), ConfirmationError>>,
    releases: VecDeque<Result<(), ConfirmationError>>,
    parked_hold: Option<oneshot::Receiver<()>>,
    calls: Vec<ConfirmationCall>,
}

/// Confirmation service whose answers are scripted by the test
///
/// # Example
///
/// ```
/// use seathold_runtime::confirmation::{ConfirmationError, ConfirmationService};
/// use seathold_core::types::HoldToken;
/// use seathold_testing::ScriptedConfirmationService;
///
/// # tokio_test::block_on(async {
/// let backend = ScriptedConfirmationService::new();
/// backend.reject_next_hold("sold out");
///
/// let token = HoldToken::generate();
/// assert!(backend.confirm_hold(&token, &[]).await.is_err());
/// assert!(backend.confirm_hold(&token, &[]).await.is_ok());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct ScriptedConfirmationService {
    script: Mutex<Script>,
    parked: Notify,
}

impl ScriptedConfirmationService {
    /// Create a backend accepting everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a rejection for the next unanswered hold
    pub fn reject_next_hold(&self, reason: &str) {
        self.script()
            .holds
            .push_back(Err(ConfirmationError::Rejected(reason.to_string())));
    }

    /// Queues a success for the next unanswered hold
    pub fn accept_next_hold(&self) {
        self.script().holds.push_back(Ok(()));
    }

    /// Queues a rejection for the next unanswered release
    pub fn reject_next_release(&self, reason: &str) {
        self.script()
            .releases
            .push_back(Err(ConfirmationError::Rejected(reason.to_string())));
    }

    /// Parks the next hold confirmation until the returned sender fires
    /// (or is dropped)
    #[must_use]
    pub fn park_next_hold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script().parked_hold = Some(rx);
        tx
    }

    /// Waits until a hold confirmation is parked
    pub async fn wait_until_parked(&self) {
        self.parked.notified().await;
    }

    /// Every call received so far
    #[must_use]
    pub fn calls(&self) -> Vec<ConfirmationCall> {
        self.script().calls.clone()
    }

    /// Items of every release received so far, flattened
    #[must_use]
    pub fn released_items(&self) -> Vec<HoldItem> {
        self.script()
            .calls
            .iter()
            .filter_map(|call| match call {
                ConfirmationCall::Release { items, .. } => Some(items.clone()),
                ConfirmationCall::Hold { .. } => None,
            })
            .flatten()
            .collect()
    }
}

#[async_trait]
impl ConfirmationService for ScriptedConfirmationService {
    async fn confirm_hold(&self, token: &HoldToken, items: &[HoldItem]) -> Result<(), ConfirmationError> {
        let (answer, parked) = {
            let mut script = self.script();
            script.calls.push(ConfirmationCall::Hold {
                token: token.clone(),
                items: items.to_vec(),
            });
            (script.holds.pop_front().unwrap_or(Ok(())), script.parked_hold.take())
        };
        if let Some(parked) = parked {
            // notify_one keeps a permit if nobody waits yet
            self.parked.notify_one();
            let _ = parked.await;
        }
        answer
    }

    async fn confirm_release(&self, token: &HoldToken, items: &[HoldItem]) -> Result<(), ConfirmationError> {
        let mut script = self.script();
        script.calls.push(ConfirmationCall::Release {
            token: token.clone(),
            items: items.to_vec(),
        });
        script.releases.pop_front().unwrap_or(Ok(()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_answers_are_consumed_in_order() {
        let backend = ScriptedConfirmationService::new();
        backend.accept_next_hold();
        backend.reject_next_hold("no");
        let token = HoldToken::generate();

        assert!(backend.confirm_hold(&token, &[]).await.is_ok());
        assert_eq!(
            backend.confirm_hold(&token, &[]).await,
            Err(ConfirmationError::Rejected("no".to_string()))
        );
        assert!(backend.confirm_hold(&token, &[]).await.is_ok());
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_parked_hold_waits_for_release() {
        let backend = Arc::new(ScriptedConfirmationService::new());
        let gate = backend.park_next_hold();
        let token = HoldToken::generate();

        let pending = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.confirm_hold(&token, &[HoldItem::unit("A-1")]).await })
        };
        backend.wait_until_parked().await;
        assert!(!pending.is_finished());

        gate.send(()).unwrap();
        assert!(pending.await.unwrap().is_ok());
    }
}
