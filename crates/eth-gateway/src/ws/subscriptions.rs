//! # SubscriptionBroker
//!
//! Push-side counterpart of the filter registry. Every subscription owns one
//! bounded queue; the dispatch loop is its only writer and never waits on
//! it. A queue that fills up tears its subscription down: one slot is kept
//! in reserve for the final overflow marker, so the consumer always learns
//! why the stream ended.

use crate::domain::config::SubscriptionConfig;
use crate::domain::error::{codes, ApiError, EthError};
use crate::domain::methods::SubscriptionType;
use crate::domain::types::{EthBlock, EthLog, FilterId, FilterRequest, Hash, IdAllocator};
use crate::eth::projection::ProjectedTipset;
use crate::filters::criteria::{FilterSpec, LogCriteria};
use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

/// Message sent to a consumer whose queue overflowed.
pub const OVERFLOW_REASON: &str = "subscription dropped: delivery queue overflow";

/// One pushed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionItem {
    Head(Box<EthBlock>),
    Log(EthLog),
    PendingTransaction(Hash),
}

/// What a subscription stream yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Item(SubscriptionItem),
    /// Last delivery of a torn-down subscription.
    Overflow,
}

/// geth-shaped `eth_subscription` notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: SubscriptionParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: FilterId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SubscriptionItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubscriptionNotification {
    pub fn new(subscription: FilterId, delivery: Delivery) -> Self {
        let (result, error) = match delivery {
            Delivery::Item(item) => (Some(item), None),
            Delivery::Overflow => (None, Some(OVERFLOW_REASON.to_string())),
        };
        Self {
            jsonrpc: "2.0".to_string(),
            method: "eth_subscription".to_string(),
            params: SubscriptionParams {
                subscription,
                result,
                error,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("subscription limit of {0} reached")]
    TooManySubscriptions(usize),
    #[error("unsupported subscription type: {0}")]
    InvalidType(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

impl From<SubscribeError> for ApiError {
    fn from(err: SubscribeError) -> Self {
        let code = match err {
            SubscribeError::TooManySubscriptions(_) => codes::LIMIT_EXCEEDED,
            SubscribeError::InvalidType(_) | SubscribeError::InvalidFilter(_) => {
                codes::INVALID_PARAMS
            }
        };
        ApiError::new(code, err.to_string())
    }
}

/// Filter spec for an `eth_subscribe` call. Only `logs` takes a filter
/// object; its block range, if any, is ignored.
pub fn spec_for(
    kind: SubscriptionType,
    filter: Option<FilterRequest>,
) -> Result<FilterSpec, SubscribeError> {
    match kind {
        SubscriptionType::NewHeads => Ok(FilterSpec::NewBlocks),
        SubscriptionType::NewPendingTransactions => Ok(FilterSpec::PendingTransactions),
        SubscriptionType::Logs => {
            let criteria = match filter {
                Some(req) => LogCriteria::live(&req).map_err(|e| match e {
                    EthError::InvalidParams(msg) => SubscribeError::InvalidFilter(msg),
                    other => SubscribeError::InvalidFilter(other.to_string()),
                })?,
                None => LogCriteria::any(),
            };
            Ok(FilterSpec::Logs(criteria))
        }
    }
}

struct Subscriber {
    spec: FilterSpec,
    tx: mpsc::Sender<Delivery>,
    active: Arc<AtomicBool>,
}

/// Read end of one subscription. Ends after an unsubscribe, after the
/// overflow marker, or when the broker goes away.
pub struct SubscriptionStream {
    id: FilterId,
    rx: mpsc::Receiver<Delivery>,
    active: Arc<AtomicBool>,
}

impl SubscriptionStream {
    pub fn id(&self) -> FilterId {
        self.id
    }

    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        let delivery = self.rx.recv().await?;
        self.gate(delivery)
    }

    /// Non-blocking variant of [`next_delivery`](Self::next_delivery).
    pub fn try_next(&mut self) -> Option<Delivery> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        let delivery = self.rx.try_recv().ok()?;
        self.gate(delivery)
    }

    /// Items still queued when an unsubscribe lands are not observable;
    /// the overflow marker is, since it is what ends the stream.
    fn gate(&self, delivery: Delivery) -> Option<Delivery> {
        match delivery {
            Delivery::Overflow => Some(Delivery::Overflow),
            item if self.active.load(Ordering::Acquire) => Some(item),
            _ => None,
        }
    }
}

impl Stream for SubscriptionStream {
    type Item = Delivery;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        let this = self.get_mut();
        if !this.active.load(Ordering::Acquire) {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(delivery)) => Poll::Ready(this.gate(delivery)),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct SubscriptionBroker {
    subscribers: DashMap<FilterId, Subscriber>,
    /// Slots taken against `max_subscriptions`, reserved before insertion.
    active: AtomicUsize,
    ids: IdAllocator,
    config: SubscriptionConfig,
    dropped: AtomicU64,
}

impl SubscriptionBroker {
    pub fn new(config: SubscriptionConfig) -> Self {
        Self {
            subscribers: DashMap::new(),
            active: AtomicUsize::new(0),
            ids: IdAllocator::new(),
            config,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, spec: FilterSpec) -> Result<SubscriptionStream, SubscribeError> {
        let max = self.config.max_subscriptions;
        if self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_err()
        {
            return Err(SubscribeError::TooManySubscriptions(max));
        }
        let id = self.ids.allocate();
        // one extra slot for the overflow marker
        let (tx, rx) = mpsc::channel(self.config.queue_capacity + 1);
        let active = Arc::new(AtomicBool::new(true));
        debug!(%id, spec = ?spec, "subscription created");
        self.subscribers.insert(
            id,
            Subscriber {
                spec,
                tx,
                active: Arc::clone(&active),
            },
        );
        Ok(SubscriptionStream { id, rx, active })
    }

    fn remove(&self, id: &FilterId) -> Option<Subscriber> {
        let (_, sub) = self.subscribers.remove(id)?;
        self.active.fetch_sub(1, Ordering::AcqRel);
        Some(sub)
    }

    /// Stop delivery to `id`. Returns whether it was active; calling it again
    /// is harmless.
    pub fn unsubscribe(&self, id: &FilterId) -> bool {
        match self.remove(id) {
            Some(sub) => {
                sub.active.store(false, Ordering::Release);
                debug!(%id, "subscription removed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Subscriptions torn down for overflow since start.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FAN-OUT
    // ═══════════════════════════════════════════════════════════════════════

    /// Offer each subscriber the items `select` picks for it. Never waits.
    fn fan_out(&self, select: impl Fn(&FilterSpec) -> Vec<SubscriptionItem>) {
        let mut closed = Vec::new();
        let mut overflowed = Vec::new();
        for entry in self.subscribers.iter() {
            let sub = entry.value();
            for item in select(&sub.spec) {
                if sub.tx.capacity() <= 1 {
                    let _ = sub.tx.try_send(Delivery::Overflow);
                    overflowed.push(*entry.key());
                    break;
                }
                match sub.tx.try_send(Delivery::Item(item)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        overflowed.push(*entry.key());
                        break;
                    }
                    Err(TrySendError::Closed(_)) => {
                        closed.push(*entry.key());
                        break;
                    }
                }
            }
        }

        for id in overflowed {
            // the consumer still drains what was queued, then the marker
            if self.remove(&id).is_some() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    %id,
                    capacity = self.config.queue_capacity,
                    "subscription dropped: delivery queue overflow"
                );
            }
        }
        for id in closed {
            if self.remove(&id).is_some() {
                debug!(%id, "subscription consumer went away");
            }
        }
    }

    pub fn publish_apply(&self, projected: &ProjectedTipset) {
        trace!(height = projected.block.number.0, "fan-out apply");
        self.fan_out(|spec| match spec {
            FilterSpec::NewBlocks => vec![SubscriptionItem::Head(Box::new(projected.block.clone()))],
            FilterSpec::Logs(criteria) => matching(criteria, &projected.logs, false),
            FilterSpec::PendingTransactions => Vec::new(),
        });
    }

    /// Log subscribers get `removed: true` copies of the reverted logs.
    pub fn publish_revert(&self, projected: &ProjectedTipset) {
        trace!(height = projected.block.number.0, "fan-out revert");
        self.fan_out(|spec| match spec {
            FilterSpec::Logs(criteria) => matching(criteria, &projected.logs, true),
            _ => Vec::new(),
        });
    }

    pub fn publish_pending(&self, tx_hash: Hash) {
        self.fan_out(|spec| match spec {
            FilterSpec::PendingTransactions => vec![SubscriptionItem::PendingTransaction(tx_hash)],
            _ => Vec::new(),
        });
    }
}

fn matching(criteria: &LogCriteria, logs: &[EthLog], removed: bool) -> Vec<SubscriptionItem> {
    logs.iter()
        .filter(|l| criteria.matches(l))
        .map(|l| {
            SubscriptionItem::Log(EthLog {
                removed,
                ..l.clone()
            })
        })
        .collect()
}
