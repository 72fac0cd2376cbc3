//! # FilterRegistry
//!
//! Server-lifetime table of installed filters. Each filter sits behind its
//! own mutex, so installs, polls and uninstalls on different filters never
//! contend; the table itself is a sharded map.
//!
//! Results are pushed in by the dispatch loop ([`FilterRegistry::on_apply`],
//! [`FilterRegistry::on_revert`], [`FilterRegistry::on_pending`]) and drained
//! by [`FilterRegistry::poll`]. A filter unpolled for longer than
//! `filter_ttl`, or whose buffer grows past `max_filter_results`, is evicted.

use crate::domain::config::FilterConfig;
use crate::domain::error::{EthError, EthResult};
use crate::domain::types::{EthLog, FilterChanges, FilterId, Hash, IdAllocator};
use crate::eth::projection::ProjectedTipset;
use crate::filters::criteria::{FilterSpec, LogCriteria};
use dashmap::DashMap;
use parking_lot::Mutex;
use shared_types::ChainEpoch;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
enum Buffer {
    Logs(Vec<EthLog>),
    Hashes(Vec<Hash>),
}

impl Buffer {
    fn for_spec(spec: &FilterSpec) -> Self {
        match spec {
            FilterSpec::Logs(_) => Buffer::Logs(Vec::new()),
            FilterSpec::NewBlocks | FilterSpec::PendingTransactions => Buffer::Hashes(Vec::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Buffer::Logs(l) => l.len(),
            Buffer::Hashes(h) => h.len(),
        }
    }

    fn drain(&mut self) -> FilterChanges {
        match self {
            Buffer::Logs(l) => FilterChanges::Logs(std::mem::take(l)),
            Buffer::Hashes(h) => FilterChanges::Hashes(std::mem::take(h)),
        }
    }
}

#[derive(Debug)]
struct InstalledFilter {
    spec: FilterSpec,
    buffer: Buffer,
    /// Newest height handed out by a poll
    cursor: ChainEpoch,
    /// Newest height folded into the buffer
    seen: ChainEpoch,
    created_at: Instant,
    last_polled: Instant,
}

impl InstalledFilter {
    fn push_logs(&mut self, logs: &[EthLog], removed: bool) {
        let (FilterSpec::Logs(criteria), Buffer::Logs(buffer)) = (&self.spec, &mut self.buffer)
        else {
            return;
        };
        buffer.extend(logs.iter().filter(|l| criteria.matches(l)).map(|l| EthLog {
            removed,
            ..l.clone()
        }));
    }
}

/// Snapshot of one filter, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterInfo {
    pub spec: FilterSpec,
    pub buffered: usize,
    pub cursor: ChainEpoch,
}

pub struct FilterRegistry {
    filters: DashMap<FilterId, Arc<Mutex<InstalledFilter>>>,
    /// Slots taken against `max_filters`, reserved before insertion.
    installed: AtomicUsize,
    ids: IdAllocator,
    config: FilterConfig,
}

impl FilterRegistry {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            filters: DashMap::new(),
            installed: AtomicUsize::new(0),
            ids: IdAllocator::new(),
            config,
        }
    }

    /// Register a filter whose bounds are already resolved. `head` is the
    /// height the filter starts watching from.
    pub fn install(&self, spec: FilterSpec, head: ChainEpoch) -> EthResult<FilterId> {
        let max = self.config.max_filters;
        let reserved = self
            .installed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(EthError::LimitExceeded(format!("{} filters installed", max)));
        }
        let id = self.ids.allocate();
        let now = Instant::now();
        let filter = InstalledFilter {
            buffer: Buffer::for_spec(&spec),
            spec,
            cursor: head,
            seen: head,
            created_at: now,
            last_polled: now,
        };
        debug!(%id, spec = ?filter.spec, "filter installed");
        self.filters.insert(id, Arc::new(Mutex::new(filter)));
        Ok(id)
    }

    fn entry(&self, id: &FilterId) -> EthResult<Arc<Mutex<InstalledFilter>>> {
        self.filters
            .get(id)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| EthError::FilterNotFound(id.to_string()))
    }

    /// Everything buffered since the previous poll. Draining the buffer and
    /// advancing the cursor happen under one lock.
    pub fn poll(&self, id: &FilterId) -> EthResult<FilterChanges> {
        let entry = self.entry(id)?;
        let mut filter = entry.lock();
        filter.last_polled = Instant::now();
        filter.cursor = filter.seen;
        Ok(filter.buffer.drain())
    }

    pub fn uninstall(&self, id: &FilterId) -> EthResult<()> {
        match self.filters.remove(id) {
            Some(_) => {
                self.installed.fetch_sub(1, Ordering::AcqRel);
                debug!(%id, "filter uninstalled");
                Ok(())
            }
            None => Err(EthError::FilterNotFound(id.to_string())),
        }
    }

    /// Criteria of a log filter, for a historical query.
    pub fn log_criteria(&self, id: &FilterId) -> EthResult<LogCriteria> {
        let entry = self.entry(id)?;
        let filter = entry.lock();
        match &filter.spec {
            FilterSpec::Logs(criteria) => Ok(criteria.clone()),
            _ => Err(EthError::InvalidParams(format!("{} is not a log filter", id))),
        }
    }

    pub fn info(&self, id: &FilterId) -> EthResult<FilterInfo> {
        let entry = self.entry(id)?;
        let filter = entry.lock();
        Ok(FilterInfo {
            spec: filter.spec.clone(),
            buffered: filter.buffer.len(),
            cursor: filter.cursor,
        })
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FEEDS
    // ═══════════════════════════════════════════════════════════════════════

    /// Fold `update` into every filter; filters that overflow are evicted.
    fn fold(&self, update: impl Fn(&mut InstalledFilter)) {
        let mut overflowed = Vec::new();
        for item in self.filters.iter() {
            let mut filter = item.value().lock();
            update(&mut *filter);
            if filter.buffer.len() > self.config.max_filter_results {
                overflowed.push(*item.key());
            }
        }
        for id in overflowed {
            if self.filters.remove(&id).is_some() {
                self.installed.fetch_sub(1, Ordering::AcqRel);
                warn!(
                    %id,
                    limit = self.config.max_filter_results,
                    "filter evicted: result buffer overflow"
                );
            }
        }
    }

    pub fn on_apply(&self, projected: &ProjectedTipset) {
        let height = projected.block.number.0;
        let block_hash = projected.block.hash;
        self.fold(|filter| {
            match filter.spec {
                FilterSpec::NewBlocks => {
                    if let Buffer::Hashes(hashes) = &mut filter.buffer {
                        hashes.push(block_hash);
                    }
                }
                FilterSpec::Logs(_) => filter.push_logs(&projected.logs, false),
                FilterSpec::PendingTransactions => {}
            }
            filter.seen = filter.seen.max(height);
        });
    }

    /// Matched logs of a reverted tipset come back with `removed: true`.
    pub fn on_revert(&self, projected: &ProjectedTipset) {
        let height = projected.block.number.0;
        self.fold(|filter| {
            filter.push_logs(&projected.logs, true);
            filter.seen = filter.seen.min(height.saturating_sub(1));
        });
    }

    pub fn on_pending(&self, tx_hash: Hash) {
        self.fold(|filter| {
            if let (FilterSpec::PendingTransactions, Buffer::Hashes(hashes)) =
                (&filter.spec, &mut filter.buffer)
            {
                hashes.push(tx_hash);
            }
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EVICTION
    // ═══════════════════════════════════════════════════════════════════════

    /// Drop filters idle longer than `filter_ttl` as of `now`.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let ttl = self.config.filter_ttl;
        let mut evicted = 0;
        self.filters.retain(|id, entry| {
            let filter = entry.lock();
            let idle = now.saturating_duration_since(filter.last_polled);
            let keep = idle <= ttl;
            if !keep {
                evicted += 1;
                warn!(
                    %id,
                    idle_secs = idle.as_secs(),
                    age_secs = now.saturating_duration_since(filter.created_at).as_secs(),
                    "filter evicted: idle"
                );
            }
            keep
        });
        self.installed.fetch_sub(evicted, Ordering::AcqRel);
        evicted
    }

    /// Run [`evict_idle`](Self::evict_idle) every `sweep_interval` until
    /// `shutdown` flips to true.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.evict_idle(Instant::now());
                        if evicted > 0 {
                            debug!(evicted, remaining = registry.len(), "filter sweep");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("filter sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixtures::{produce_with_events, topic_event};
    use crate::adapters::MemoryChain;
    use crate::domain::types::{BlockParam, FilterRequest, FilterTopic};
    use crate::eth::address::AddressBridge;
    use crate::eth::index::HashIndex;
    use crate::eth::projection::ChainViewProjector;
    use crate::filters::history::collect_logs;
    use crate::ports::outbound::ActorKind;
    use std::time::Duration;

    fn config() -> FilterConfig {
        FilterConfig {
            filter_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            max_filters: 8,
            max_filter_results: 16,
        }
    }

    fn projector(chain: &Arc<MemoryChain>) -> ChainViewProjector {
        let upstream = chain.upstream();
        let bridge = Arc::new(AddressBridge::new(upstream.state.clone()));
        ChainViewProjector::new(upstream, bridge, Arc::new(HashIndex::new()), 314)
    }

    fn all_logs_from_genesis() -> FilterSpec {
        let req = FilterRequest {
            from_block: Some(BlockParam::Number(0)),
            to_block: Some(BlockParam::Tag(crate::domain::types::BlockTag::Latest)),
            ..Default::default()
        };
        FilterSpec::Logs(LogCriteria::from_request(&req, 0).unwrap())
    }

    #[tokio::test]
    async fn test_poll_returns_only_new_logs() {
        let chain = MemoryChain::new();
        let sender = chain.create_actor(ActorKind::Account, 1_000, None);
        let contract = chain.create_actor(ActorKind::Evm, 0, None);
        let proj = projector(&chain);
        let registry = FilterRegistry::new(config());
        let id = registry.install(all_logs_from_genesis(), 0).unwrap();

        let blocks = vec![
            vec![],
            vec![vec![topic_event(contract, &[1], b"one")]],
            vec![vec![topic_event(contract, &[2], b"two"), topic_event(contract, &[3], b"three")]],
        ];
        let mut polls = Vec::new();
        for events in blocks {
            let ts = produce_with_events(&chain, sender, contract, events).await.unwrap();
            registry.on_apply(&proj.project_tipset(&ts).await.unwrap());
            polls.push(registry.poll(&id).unwrap());
        }

        assert!(polls[0].is_empty());
        assert_eq!(polls[1].len(), 1);
        assert_eq!(polls[2].len(), 2);
        assert_eq!(registry.info(&id).unwrap().cursor, 3);
    }

    #[tokio::test]
    async fn test_block_and_pending_filters() {
        let chain = MemoryChain::new();
        let sender = chain.create_actor(ActorKind::Account, 1_000, None);
        let proj = projector(&chain);
        let registry = FilterRegistry::new(config());
        let blocks = registry.install(FilterSpec::NewBlocks, 0).unwrap();
        let pending = registry.install(FilterSpec::PendingTransactions, 0).unwrap();

        let ts = produce_with_events(&chain, sender, sender, vec![]).await.unwrap();
        let projected = proj.project_tipset(&ts).await.unwrap();
        registry.on_apply(&projected);
        registry.on_pending(Hash::repeat_byte(0xab));

        assert_eq!(
            registry.poll(&blocks).unwrap(),
            FilterChanges::Hashes(vec![projected.block.hash])
        );
        assert_eq!(
            registry.poll(&pending).unwrap(),
            FilterChanges::Hashes(vec![Hash::repeat_byte(0xab)])
        );
    }

    #[tokio::test]
    async fn test_topic_filter_with_wildcard_tail() {
        let chain = MemoryChain::new();
        let sender = chain.create_actor(ActorKind::Account, 1_000, None);
        let contract = chain.create_actor(ActorKind::Evm, 0, None);
        let proj = projector(&chain);
        let registry = FilterRegistry::new(config());
        let req = FilterRequest {
            topics: Some(vec![Some(FilterTopic::Single(Hash::repeat_byte(1))), None]),
            ..Default::default()
        };
        let id = registry
            .install(FilterSpec::Logs(LogCriteria::from_request(&req, 0).unwrap()), 0)
            .unwrap();

        let ts = produce_with_events(
            &chain,
            sender,
            contract,
            vec![vec![
                topic_event(contract, &[1, 7], b""),
                topic_event(contract, &[2, 7], b""),
                topic_event(contract, &[1, 9], b""),
            ]],
        )
        .await
        .unwrap();
        registry.on_apply(&proj.project_tipset(&ts).await.unwrap());

        match registry.poll(&id).unwrap() {
            FilterChanges::Logs(logs) => {
                assert_eq!(logs.len(), 2);
                assert!(logs.iter().all(|l| l.topics[0] == Hash::repeat_byte(1)));
            }
            other => panic!("expected logs, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_revert_marks_logs_removed() {
        let chain = MemoryChain::new();
        let sender = chain.create_actor(ActorKind::Account, 1_000, None);
        let contract = chain.create_actor(ActorKind::Evm, 0, None);
        let proj = projector(&chain);
        let registry = FilterRegistry::new(config());
        let id = registry.install(all_logs_from_genesis(), 0).unwrap();

        let ts = produce_with_events(&chain, sender, contract, vec![vec![topic_event(contract, &[4], b"")]])
            .await
            .unwrap();
        let projected = proj.project_tipset(&ts).await.unwrap();
        registry.on_apply(&projected);
        registry.on_revert(&projected);

        let FilterChanges::Logs(logs) = registry.poll(&id).unwrap() else {
            panic!("expected logs");
        };
        assert_eq!(logs.len(), 2);
        assert!(!logs[0].removed);
        assert!(logs[1].removed);
    }

    #[test]
    fn test_unknown_and_uninstalled_filters() {
        let registry = FilterRegistry::new(config());
        let id = registry.install(FilterSpec::NewBlocks, 0).unwrap();
        registry.uninstall(&id).unwrap();
        assert!(matches!(registry.poll(&id), Err(EthError::FilterNotFound(_))));
        assert!(matches!(registry.uninstall(&id), Err(EthError::FilterNotFound(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let registry = FilterRegistry::new(config());
        let a = registry.install(FilterSpec::NewBlocks, 0).unwrap();
        registry.uninstall(&a).unwrap();
        let b = registry.install(FilterSpec::NewBlocks, 0).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_max_filters() {
        let registry = FilterRegistry::new(config());
        for _ in 0..8 {
            registry.install(FilterSpec::NewBlocks, 0).unwrap();
        }
        assert!(matches!(
            registry.install(FilterSpec::NewBlocks, 0),
            Err(EthError::LimitExceeded(_))
        ));
    }

    #[test]
    fn test_concurrent_installs_respect_max_filters() {
        let registry = Arc::new(FilterRegistry::new(config()));
        let barrier = Arc::new(std::sync::Barrier::new(32));
        let workers: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.install(FilterSpec::NewBlocks, 0).is_ok()
                })
            })
            .collect();
        let installed = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(installed, 8);
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn test_freed_slots_are_reusable() {
        let registry = FilterRegistry::new(config());
        let ids: Vec<_> = (0..8)
            .map(|_| registry.install(FilterSpec::PendingTransactions, 0).unwrap())
            .collect();
        registry.uninstall(&ids[0]).unwrap();
        for i in 0..17u8 {
            registry.on_pending(Hash::repeat_byte(i));
        }
        // every remaining filter overflowed
        assert!(registry.is_empty());
        for _ in 0..8 {
            registry.install(FilterSpec::NewBlocks, 0).unwrap();
        }
        assert!(registry.install(FilterSpec::NewBlocks, 0).is_err());
    }

    #[test]
    fn test_overflow_evicts() {
        let registry = FilterRegistry::new(config());
        let id = registry.install(FilterSpec::PendingTransactions, 0).unwrap();
        for i in 0..16u8 {
            registry.on_pending(Hash::repeat_byte(i));
        }
        assert_eq!(registry.info(&id).unwrap().buffered, 16);
        registry.on_pending(Hash::repeat_byte(0xff));
        assert!(matches!(registry.poll(&id), Err(EthError::FilterNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_filter_is_swept() {
        let registry = Arc::new(FilterRegistry::new(config()));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _sweeper = registry.spawn_sweeper(shutdown_rx);

        let idle = registry.install(FilterSpec::NewBlocks, 0).unwrap();
        let busy = registry.install(FilterSpec::NewBlocks, 0).unwrap();

        for _ in 0..11 {
            tokio::time::advance(Duration::from_secs(30)).await;
            registry.poll(&busy).unwrap();
        }
        // let the sweeper observe the last tick
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(registry.poll(&idle), Err(EthError::FilterNotFound(_))));
        assert!(matches!(registry.uninstall(&idle), Err(EthError::FilterNotFound(_))));
        assert!(registry.poll(&busy).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_survives_within_ttl() {
        let registry = FilterRegistry::new(config());
        let id = registry.install(FilterSpec::NewBlocks, 0).unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(registry.evict_idle(Instant::now()), 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(registry.evict_idle(Instant::now()), 1);
        assert!(registry.poll(&id).is_err());
    }

    #[tokio::test]
    async fn test_filter_logs_replays_history() {
        let chain = MemoryChain::new();
        let sender = chain.create_actor(ActorKind::Account, 1_000, None);
        let contract = chain.create_actor(ActorKind::Evm, 0, None);
        let proj = projector(&chain);
        for t in 1..=3u8 {
            produce_with_events(&chain, sender, contract, vec![vec![topic_event(contract, &[t], b"")]])
                .await
                .unwrap();
        }

        let registry = FilterRegistry::new(config());
        let id = registry.install(all_logs_from_genesis(), 3).unwrap();
        let criteria = registry.log_criteria(&id).unwrap();
        let logs = collect_logs(&proj, &criteria, 100).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[2].block_number.0, 3);

        assert!(matches!(
            collect_logs(&proj, &criteria, 2).await,
            Err(EthError::LimitExceeded(_))
        ));
    }
}
