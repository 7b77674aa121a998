use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{
    abi::InterfaceCatalog,
    log::InteractionLog,
    provider::{ChainTransport, SubscriptionHandle},
    ContractArtifact, EventDelivery,
};
use crate::error::InteractionResult;

struct ActiveSubscription {
    event: String,
    handle: Box<dyn SubscriptionHandle>,
    forwarder: JoinHandle<()>,
}

enum Slot {
    /// The transport is still installing the stream for this ticket.
    Pending(u64),
    Live(ActiveSubscription),
}

/// Live event subscriptions of one contract, at most one per event.
///
/// Entries are keyed by the event's canonical signature, so a bare name and
/// its full signature address the same subscription.
pub struct SubscriptionManager {
    contract: Arc<ContractArtifact>,
    catalog: Arc<InterfaceCatalog>,
    transport: Arc<dyn ChainTransport>,
    log: Arc<InteractionLog>,
    active: Mutex<HashMap<String, Slot>>,
    tickets: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(
        contract: Arc<ContractArtifact>,
        catalog: Arc<InterfaceCatalog>,
        transport: Arc<dyn ChainTransport>,
        log: Arc<InteractionLog>,
    ) -> Self {
        Self {
            contract,
            catalog,
            transport,
            log,
            active: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(0),
        }
    }

    /// Opens a stream for `key` and forwards every delivery to the log.
    ///
    /// Returns `false` without opening a second stream when the event is
    /// already subscribed or being subscribed, or when it was unsubscribed
    /// before the stream came up.
    pub async fn subscribe(&self, key: &str) -> InteractionResult<bool> {
        let event = self.catalog.find_event(key)?;
        let signature = event.signature();
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);

        {
            let mut active = self.active.lock().await;
            if active.contains_key(&signature) {
                debug!("Already subscribed to {}", signature);
                return Ok(false);
            }
            active.insert(signature.clone(), Slot::Pending(ticket));
        }

        let stream = match self.transport.subscribe_event(&self.contract, event).await {
            Ok(stream) => stream,
            Err(e) => {
                let mut active = self.active.lock().await;
                if matches!(active.get(&signature), Some(Slot::Pending(t)) if *t == ticket) {
                    active.remove(&signature);
                }
                return Err(e);
            }
        };

        let mut active = self.active.lock().await;
        if !matches!(active.get(&signature), Some(Slot::Pending(t)) if *t == ticket) {
            drop(active);
            debug!("{} was abandoned while its stream was opening", signature);
            let mut handle = stream.handle;
            if let Err(e) = handle.cancel().await {
                warn!("Cancelling abandoned stream for {} failed: {}", signature, e);
            }
            return Ok(false);
        }

        self.log.text(format!("subscribed to {}", event.name));
        let forwarder = tokio::spawn(forward_deliveries(
            event.name.clone(),
            stream.deliveries,
            self.log.clone(),
        ));
        active.insert(
            signature,
            Slot::Live(ActiveSubscription {
                event: event.name.clone(),
                handle: stream.handle,
                forwarder,
            }),
        );

        info!("Subscribed to {} on {}", event.name, self.contract.name);
        Ok(true)
    }

    /// Cancels the stream for `key`. Returns `false` if nothing was subscribed.
    ///
    /// The handle is forgotten even when cancellation fails; the failure is
    /// logged instead of the confirmation.
    pub async fn unsubscribe(&self, key: &str) -> bool {
        let Ok(event) = self.catalog.find_event(key) else {
            return false;
        };

        let slot = self.active.lock().await.remove(&event.signature());
        match slot {
            Some(Slot::Live(subscription)) => {
                self.close(subscription).await;
                true
            }
            // the pending subscribe sees its slot gone and cancels its own stream
            Some(Slot::Pending(_)) => false,
            None => false,
        }
    }

    async fn close(&self, mut subscription: ActiveSubscription) {
        let event = subscription.event.clone();
        subscription.forwarder.abort();
        match subscription.handle.cancel().await {
            Ok(()) => {
                self.log.text(format!("Unsubscribed from {}", event));
                info!("Unsubscribed from {} on {}", event, self.contract.name);
            }
            Err(e) => {
                warn!("Cancelling subscription to {} failed: {}", event, e);
                self.log.error(format!("unsubscribe {}", event), &e);
            }
        }
    }

    pub async fn is_subscribed(&self, key: &str) -> bool {
        let Ok(event) = self.catalog.find_event(key) else {
            return false;
        };
        matches!(
            self.active.lock().await.get(&event.signature()),
            Some(Slot::Live(_))
        )
    }

    /// Signatures of the live subscriptions, sorted.
    pub async fn active(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .active
            .lock()
            .await
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub async fn shutdown(&self) {
        let mut drained: Vec<(String, Slot)> = self.active.lock().await.drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, slot) in drained {
            if let Slot::Live(subscription) = slot {
                self.close(subscription).await;
            }
        }
    }
}

async fn forward_deliveries(
    key: String,
    mut deliveries: mpsc::Receiver<EventDelivery>,
    log: Arc<InteractionLog>,
) {
    while let Some(delivery) = deliveries.recv().await {
        match delivery {
            EventDelivery::Data(value) => {
                log.result(value);
            }
            // stream errors are not fatal; the subscription stays open
            EventDelivery::Error(error) => {
                warn!("Delivery error on {}: {}", key, error);
                log.error(format!("event {}", key), error);
            }
        }
    }
    debug!("Delivery stream for {} closed", key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::{
        abi::{parse_descriptor, tests::erc20_descriptor},
        log::LogEntry,
        testing::{artifact, StubTransport, TransportCall},
    };
    use crate::error::InteractionError;
    use serde_json::json;
    use std::time::Duration;

    fn manager(transport: Arc<StubTransport>) -> (SubscriptionManager, Arc<InteractionLog>) {
        let log = Arc::new(InteractionLog::new(100));
        let catalog = Arc::new(parse_descriptor(&erc20_descriptor()).unwrap());
        let contract = Arc::new(artifact("Token", erc20_descriptor()));
        (
            SubscriptionManager::new(contract, catalog, transport, log.clone()),
            log,
        )
    }

    fn texts(log: &InteractionLog) -> Vec<String> {
        log.entries()
            .into_iter()
            .filter_map(|record| match record.entry {
                LogEntry::Text { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    async fn wait_for_len(log: &InteractionLog, len: usize) {
        for _ in 0..100 {
            if log.len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("log never reached {} entries", len);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let transport = StubTransport::new();
        let (manager, log) = manager(transport.clone());

        assert!(manager.subscribe("Transfer").await.unwrap());
        assert!(!manager.subscribe("Transfer").await.unwrap());

        assert_eq!(
            manager.active().await,
            vec!["Transfer(address,address,uint256)".to_string()]
        );
        assert_eq!(texts(&log), vec!["subscribed to Transfer".to_string()]);
        assert_eq!(
            transport.calls(),
            vec![TransportCall::Subscribe {
                event: "Transfer".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_name_and_signature_share_one_subscription() {
        let transport = StubTransport::new();
        let (manager, log) = manager(transport.clone());

        assert!(manager.subscribe("Transfer").await.unwrap());
        assert!(!manager
            .subscribe("Transfer(address,address,uint256)")
            .await
            .unwrap());
        assert!(manager.is_subscribed("Transfer(address,address,uint256)").await);
        assert_eq!(transport.calls().len(), 1);

        assert!(manager.unsubscribe("Transfer(address,address,uint256)").await);
        assert!(!manager.is_subscribed("Transfer").await);
        assert_eq!(
            texts(&log),
            vec![
                "subscribed to Transfer".to_string(),
                "Unsubscribed from Transfer".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_pending_subscribe_does_not_block_or_duplicate() {
        let transport = StubTransport::new();
        let gate = transport.hold_subscribes();
        let (manager, log) = manager(transport.clone());
        let manager = Arc::new(manager);

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.subscribe("Transfer").await }
        });
        for _ in 0..100 {
            if !transport.calls().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(transport.calls().len(), 1);

        // the map stays readable while the stream is being installed
        assert!(manager.active().await.is_empty());
        assert!(!manager.is_subscribed("Transfer").await);
        assert!(!manager.subscribe("Transfer").await.unwrap());
        assert_eq!(transport.calls().len(), 1);

        // unsubscribing abandons the pending stream
        assert!(!manager.unsubscribe("Transfer").await);
        gate.notify_one();

        assert!(!first.await.unwrap().unwrap());
        assert!(manager.active().await.is_empty());
        assert_eq!(transport.cancellations(), vec!["Transfer".to_string()]);
        assert_eq!(log.len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_event() {
        let transport = StubTransport::new();
        let (manager, log) = manager(transport.clone());

        assert!(matches!(
            manager.subscribe("Mint").await,
            Err(InteractionError::UnknownEvent(_))
        ));
        assert!(transport.calls().is_empty());
        assert_eq!(log.len(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_when_not_subscribed_is_noop() {
        let transport = StubTransport::new();
        let (manager, log) = manager(transport.clone());

        assert!(!manager.unsubscribe("Transfer").await);
        assert!(!manager.unsubscribe("Mint").await);
        assert_eq!(log.len(), 0);
        assert!(transport.cancellations().is_empty());
    }

    #[tokio::test]
    async fn test_deliveries_are_logged_in_order_and_errors_keep_stream_open() {
        let transport = StubTransport::new();
        let (manager, log) = manager(transport.clone());
        manager.subscribe("Transfer").await.unwrap();

        transport
            .emit("Transfer", EventDelivery::Data(json!({"n": 1})))
            .await;
        transport
            .emit("Transfer", EventDelivery::Error("RPC error: flaky".to_string()))
            .await;
        transport
            .emit("Transfer", EventDelivery::Data(json!({"n": 2})))
            .await;
        wait_for_len(&log, 4).await;

        let entries: Vec<LogEntry> = log.entries().into_iter().map(|r| r.entry).collect();
        assert_eq!(
            entries,
            vec![
                LogEntry::Text {
                    text: "subscribed to Transfer".to_string()
                },
                LogEntry::Result {
                    result: json!({"n": 1})
                },
                LogEntry::Error {
                    context: "event Transfer".to_string(),
                    error: "RPC error: flaky".to_string()
                },
                LogEntry::Result {
                    result: json!({"n": 2})
                },
            ]
        );
        assert!(manager.is_subscribed("Transfer").await);
    }

    #[tokio::test]
    async fn test_unsubscribe_then_resubscribe() {
        let transport = StubTransport::new();
        let (manager, log) = manager(transport.clone());

        manager.subscribe("Transfer").await.unwrap();
        assert!(manager.unsubscribe("Transfer").await);
        assert!(!manager.is_subscribed("Transfer").await);
        assert!(manager.subscribe("Transfer").await.unwrap());

        assert_eq!(
            texts(&log),
            vec![
                "subscribed to Transfer".to_string(),
                "Unsubscribed from Transfer".to_string(),
                "subscribed to Transfer".to_string(),
            ]
        );
        assert_eq!(transport.cancellations(), vec!["Transfer".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_cancel_still_drops_handle() {
        let transport = StubTransport::new();
        *transport.fail_cancel.lock().unwrap() = true;
        let (manager, log) = manager(transport.clone());

        manager.subscribe("Approval").await.unwrap();
        assert!(manager.unsubscribe("Approval").await);

        assert!(manager.active().await.is_empty());
        let last = log.entries().pop().unwrap();
        assert!(matches!(
            last.entry,
            LogEntry::Error { ref context, .. } if context == "unsubscribe Approval"
        ));
        assert_eq!(texts(&log), vec!["subscribed to Approval".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything() {
        let transport = StubTransport::new();
        let (manager, _log) = manager(transport.clone());

        manager.subscribe("Transfer").await.unwrap();
        manager.subscribe("Approval").await.unwrap();
        manager.shutdown().await;

        assert!(manager.active().await.is_empty());
        assert_eq!(
            transport.cancellations(),
            vec!["Approval".to_string(), "Transfer".to_string()]
        );
    }
}
