//! Head-change and mempool fan-out.
//!
//! One task reads both upstream feeds and hands every event, in arrival
//! order, to the filter registry and the subscription broker. Each applied
//! or reverted tipset is projected once and shared by both.

use crate::eth::projection::{ChainViewProjector, ProjectedTipset};
use crate::filters::FilterRegistry;
use crate::ws::subscriptions::SubscriptionBroker;
use shared_types::{HeadChange, MpoolUpdate, TipSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PROJECTION_ATTEMPTS: u32 = 3;
const PROJECTION_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct Dispatcher {
    projector: Arc<ChainViewProjector>,
    filters: Arc<FilterRegistry>,
    broker: Arc<SubscriptionBroker>,
}

impl Dispatcher {
    pub fn new(
        projector: Arc<ChainViewProjector>,
        filters: Arc<FilterRegistry>,
        broker: Arc<SubscriptionBroker>,
    ) -> Self {
        Self {
            projector,
            filters,
            broker,
        }
    }

    pub async fn handle_head_change(&self, change: HeadChange) {
        let (ts, applied) = match &change {
            HeadChange::Apply(ts) => (ts, true),
            HeadChange::Revert(ts) => (ts, false),
        };
        let projected = self.project(ts, applied).await;
        debug!(
            height = ts.height(),
            applied,
            logs = projected.logs.len(),
            "dispatching head change"
        );
        if applied {
            self.filters.on_apply(&projected);
            self.broker.publish_apply(&projected);
        } else {
            self.filters.on_revert(&projected);
            self.broker.publish_revert(&projected);
        }
    }

    /// Full projection of `ts`, retried on failure. Once the retries run out
    /// the header alone is fanned out so block consumers never miss a height.
    async fn project(&self, ts: &TipSet, applied: bool) -> ProjectedTipset {
        let mut attempt = 1;
        loop {
            match self.projector.project_tipset(ts).await {
                Ok(projected) => return projected,
                Err(e) if attempt < PROJECTION_ATTEMPTS => {
                    debug!(height = ts.height(), attempt, error = %e, "retrying projection");
                    tokio::time::sleep(PROJECTION_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        height = ts.height(),
                        applied,
                        error = %e,
                        "projection failed, dispatching header only"
                    );
                    return self.projector.header_only(ts);
                }
            }
        }
    }

    pub async fn handle_mpool_update(&self, update: MpoolUpdate) {
        let MpoolUpdate::Add(msg) = update else {
            return;
        };
        match self.projector.signed_hash(&msg) {
            Ok(hash) => {
                self.filters.on_pending(hash);
                self.broker.publish_pending(hash);
            }
            Err(e) => warn!(error = %e, "skipped pending message"),
        }
    }

    /// Drive both feeds until `shutdown` flips to true or both feeds close.
    pub fn spawn(
        self: Arc<Self>,
        heads: mpsc::Receiver<HeadChange>,
        mpool: mpsc::Receiver<MpoolUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut heads = Some(heads);
            let mut mpool = Some(mpool);
            info!("dispatcher started");
            loop {
                if heads.is_none() && mpool.is_none() {
                    warn!("upstream feeds closed");
                    break;
                }
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    change = recv(&mut heads) => match change {
                        Some(change) => self.handle_head_change(change).await,
                        None => heads = None,
                    },
                    update = recv(&mut mpool) => match update {
                        Some(update) => self.handle_mpool_update(update).await,
                        None => mpool = None,
                    },
                }
            }
            info!("dispatcher stopped");
        })
    }
}

/// Next item of an optional feed; a closed feed never resolves.
async fn recv<T>(feed: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match feed {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Behaviour, MemoryChain};
    use crate::domain::config::{FilterConfig, SubscriptionConfig};
    use crate::domain::types::FilterChanges;
    use crate::eth::address::AddressBridge;
    use crate::eth::index::HashIndex;
    use crate::filters::FilterSpec;
    use crate::ports::outbound::{ActorKind, ChainStore, Mempool};
    use crate::ws::subscriptions::{Delivery, SubscriptionItem};
    use shared_types::{Signature, SignatureType, SignedMessage};

    fn dispatcher(chain: &Arc<MemoryChain>) -> Arc<Dispatcher> {
        let upstream = chain.upstream();
        let bridge = Arc::new(AddressBridge::new(upstream.state.clone()));
        let projector = Arc::new(ChainViewProjector::new(
            upstream,
            bridge,
            Arc::new(HashIndex::new()),
            314,
        ));
        Arc::new(Dispatcher::new(
            projector,
            Arc::new(FilterRegistry::new(FilterConfig::default())),
            Arc::new(SubscriptionBroker::new(SubscriptionConfig::default())),
        ))
    }

    #[tokio::test]
    async fn test_feeds_reach_filters_and_subscribers() {
        let chain = MemoryChain::new();
        let sender = chain.create_actor(ActorKind::Account, 1_000, None);
        let d = dispatcher(&chain);
        let blocks = d.filters.install(FilterSpec::NewBlocks, 0).unwrap();
        let mut heads = d.broker.subscribe(FilterSpec::NewBlocks).unwrap();
        let mut pending = d.broker.subscribe(FilterSpec::PendingTransactions).unwrap();

        let (tx, rx) = watch::channel(false);
        let task = Arc::clone(&d).spawn(
            chain.subscribe_head_changes(),
            chain.subscribe_updates(),
            rx,
        );

        let ts = chain.produce_tipset(vec![]).await;
        let msg = SignedMessage {
            message: crate::adapters::fixtures::transfer(sender, sender, 0),
            signature: Signature {
                sig_type: SignatureType::Secp256k1,
                bytes: vec![0; 65],
            },
        };
        chain.push(msg).await.unwrap();

        match heads.next_delivery().await {
            Some(Delivery::Item(SubscriptionItem::Head(block))) => {
                assert_eq!(block.number.0, ts.height())
            }
            other => panic!("expected head, got {:?}", other),
        }
        assert!(matches!(
            pending.next_delivery().await,
            Some(Delivery::Item(SubscriptionItem::PendingTransaction(_)))
        ));
        match d.filters.poll(&blocks).unwrap() {
            FilterChanges::Hashes(h) => assert_eq!(h.len(), 1),
            other => panic!("expected hashes, got {:?}", other),
        }

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_events_do_not_hide_the_block() {
        let chain = MemoryChain::new();
        let sender = chain.create_actor(ActorKind::Account, 1_000, None);
        let d = dispatcher(&chain);
        let blocks = d.filters.install(FilterSpec::NewBlocks, 0).unwrap();
        let mut heads = d.broker.subscribe(FilterSpec::NewBlocks).unwrap();

        let broken = chain.put_block(vec![0xff; 3]);
        let ts = chain
            .produce_tipset(vec![(
                shared_types::ChainMessage::Unsigned(crate::adapters::fixtures::transfer(
                    sender, sender, 0,
                )),
                crate::adapters::fixtures::receipt(shared_types::ExitCode::OK, 10, Some(broken)),
            )])
            .await;
        d.handle_head_change(HeadChange::Apply(ts.clone())).await;

        let hash = crate::eth::projection::block_hash(&ts);
        match d.filters.poll(&blocks).unwrap() {
            FilterChanges::Hashes(h) => assert_eq!(h, vec![hash]),
            other => panic!("expected hashes, got {:?}", other),
        }
        match heads.next_delivery().await {
            Some(Delivery::Item(SubscriptionItem::Head(block))) => assert_eq!(block.hash, hash),
            other => panic!("expected head, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_upstream_still_delivers_header() {
        let chain = MemoryChain::new();
        let d = dispatcher(&chain);
        let blocks = d.filters.install(FilterSpec::NewBlocks, 0).unwrap();
        let mut heads = d.broker.subscribe(FilterSpec::NewBlocks).unwrap();

        let ts = chain.produce_tipset(vec![]).await;
        chain.set_behaviour(Behaviour {
            unavailable: true,
            ..Default::default()
        });
        d.handle_head_change(HeadChange::Apply(ts.clone())).await;

        let hash = crate::eth::projection::block_hash(&ts);
        match heads.next_delivery().await {
            Some(Delivery::Item(SubscriptionItem::Head(block))) => {
                assert_eq!(block.hash, hash);
                assert_eq!(block.number.0, ts.height());
            }
            other => panic!("expected head, got {:?}", other),
        }
        match d.filters.poll(&blocks).unwrap() {
            FilterChanges::Hashes(h) => assert_eq!(h, vec![hash]),
            other => panic!("expected hashes, got {:?}", other),
        }
    }
}
