//! # ReceiptLogExtractor
//!
//! Turns a receipt's events root into foreign log entries. Entries keyed
//! `t1`..`t4` become topics (ordered by key), `d` becomes the data, anything
//! else is ignored. An event that breaks those rules makes the whole root
//! undecodable; nothing is skipped silently.

use crate::domain::error::{EthError, EthResult};
use crate::domain::types::{Address, Hash};
use crate::eth::address::AddressBridge;
use crate::ports::outbound::BlockStore;
use shared_types::{decode_events, ActorEvent, Cid, NativeAddress, IPLD_RAW};
use std::sync::Arc;
use tracing::warn;

const MAX_TOPICS: usize = 4;

/// One decoded log, positioned within its receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
    pub tx_index: u64,
    /// Position in the receipt's event sequence
    pub log_index: u64,
}

/// Split an event into (topics, data).
pub fn event_to_parts(event: &ActorEvent) -> Result<(Vec<Hash>, Vec<u8>), String> {
    let mut topics: [Option<Hash>; MAX_TOPICS] = [None; MAX_TOPICS];
    let mut data: Option<Vec<u8>> = None;

    for entry in &event.entries {
        let slot = match entry.key.as_str() {
            "t1" => 0,
            "t2" => 1,
            "t3" => 2,
            "t4" => 3,
            "d" => {
                if entry.codec != IPLD_RAW {
                    return Err(format!("data entry has codec {:#x}", entry.codec));
                }
                if data.replace(entry.value.clone()).is_some() {
                    return Err("duplicate data entry".into());
                }
                continue;
            }
            _ => continue,
        };
        if entry.codec != IPLD_RAW {
            return Err(format!("topic {} has codec {:#x}", entry.key, entry.codec));
        }
        if entry.value.len() != 32 {
            return Err(format!(
                "topic {} is {} bytes, expected 32",
                entry.key,
                entry.value.len()
            ));
        }
        if topics[slot].replace(Hash::from_slice(&entry.value)).is_some() {
            return Err(format!("duplicate topic {}", entry.key));
        }
    }

    let count = topics.iter().filter(|t| t.is_some()).count();
    let ordered: Vec<Hash> = topics.iter().map_while(|t| *t).collect();
    if ordered.len() != count {
        return Err("topics are not contiguous".into());
    }
    Ok((ordered, data.unwrap_or_default()))
}

pub struct ReceiptLogExtractor {
    blocks: Arc<dyn BlockStore>,
    bridge: Arc<AddressBridge>,
}

impl ReceiptLogExtractor {
    pub fn new(blocks: Arc<dyn BlockStore>, bridge: Arc<AddressBridge>) -> Self {
        Self { blocks, bridge }
    }

    /// Logs of one receipt, in emission order. `tx_index` is copied into
    /// every entry; `log_index` is the event's position in the root.
    pub async fn extract(&self, events_root: &Cid, tx_index: u64) -> EthResult<Vec<LogEntry>> {
        let bytes = self
            .blocks
            .get(events_root)
            .await?
            .ok_or_else(|| {
                warn!(%events_root, "events root missing from block store");
                EthError::EventsUndecodable(format!("events root {} not found", events_root))
            })?;

        let events = decode_events(&bytes).map_err(|e| {
            EthError::EventsUndecodable(format!("events root {}: {}", events_root, e))
        })?;

        let mut logs = Vec::with_capacity(events.len());
        for (position, stamped) in events.iter().enumerate() {
            let (topics, data) = event_to_parts(&stamped.event).map_err(|reason| {
                EthError::EventsUndecodable(format!(
                    "events root {} event {}: {}",
                    events_root, position, reason
                ))
            })?;
            let address = self
                .bridge
                .to_foreign(&NativeAddress::Id(stamped.emitter))
                .await?;
            logs.push(LogEntry {
                address,
                topics,
                data,
                tx_index,
                log_index: position as u64,
            });
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Behaviour, MemoryChain};
    use crate::eth::address::masked_id;
    use shared_types::{EventEntry, StampedEvent};

    fn event(emitter: u64, topics: &[u8], data: &[u8]) -> StampedEvent {
        let mut entries: Vec<EventEntry> = topics
            .iter()
            .enumerate()
            .map(|(i, t)| EventEntry::raw(format!("t{}", i + 1), vec![*t; 32]))
            .collect();
        entries.push(EventEntry::raw("d", data.to_vec()));
        StampedEvent {
            emitter,
            event: ActorEvent { entries },
        }
    }

    fn extractor(chain: &Arc<MemoryChain>) -> ReceiptLogExtractor {
        let upstream = chain.upstream();
        let bridge = Arc::new(AddressBridge::new(upstream.state));
        ReceiptLogExtractor::new(upstream.blocks, bridge)
    }

    #[tokio::test]
    async fn test_preserves_order_and_positions() {
        let chain = MemoryChain::new();
        let events: Vec<_> = (0..5u8).map(|i| event(1000 + u64::from(i), &[i], &[i])).collect();
        let root = chain.put_events(&events).unwrap();

        let logs = extractor(&chain).extract(&root, 7).await.unwrap();
        assert_eq!(logs.len(), 5);
        for (i, log) in logs.iter().enumerate() {
            assert_eq!(log.log_index, i as u64);
            assert_eq!(log.tx_index, 7);
            assert_eq!(log.topics, vec![Hash::repeat_byte(i as u8)]);
            assert_eq!(log.address, masked_id(1000 + i as u64));
        }
    }

    #[test]
    fn test_topics_ordered_by_key() {
        let ev = ActorEvent {
            entries: vec![
                EventEntry::raw("t2", vec![2; 32]),
                EventEntry::raw("extra", vec![9]),
                EventEntry::raw("t1", vec![1; 32]),
            ],
        };
        let (topics, data) = event_to_parts(&ev).unwrap();
        assert_eq!(topics, vec![Hash::repeat_byte(1), Hash::repeat_byte(2)]);
        assert!(data.is_empty());
    }

    #[test]
    fn test_malformed_events() {
        let short = ActorEvent {
            entries: vec![EventEntry::raw("t1", vec![1; 31])],
        };
        assert!(event_to_parts(&short).is_err());

        let gap = ActorEvent {
            entries: vec![
                EventEntry::raw("t1", vec![1; 32]),
                EventEntry::raw("t3", vec![3; 32]),
            ],
        };
        assert!(event_to_parts(&gap).is_err());

        let dup = ActorEvent {
            entries: vec![EventEntry::raw("d", vec![]), EventEntry::raw("d", vec![])],
        };
        assert!(event_to_parts(&dup).is_err());
    }

    #[tokio::test]
    async fn test_missing_root_is_undecodable() {
        let chain = MemoryChain::new();
        let root = shared_types::cid_of(b"nowhere");
        let result = extractor(&chain).extract(&root, 0).await;
        assert!(matches!(result, Err(EthError::EventsUndecodable(_))));
    }

    #[tokio::test]
    async fn test_garbage_root_is_undecodable() {
        let chain = MemoryChain::new();
        let root = chain.put_block(vec![0xff; 3]);
        let result = extractor(&chain).extract(&root, 0).await;
        assert!(matches!(result, Err(EthError::EventsUndecodable(_))));
    }

    #[tokio::test]
    async fn test_block_store_outage_is_upstream_error() {
        let chain = MemoryChain::new();
        let root = chain.put_events(&[event(1000, &[1], &[])]).unwrap();
        chain.set_behaviour(Behaviour {
            unavailable: true,
            ..Default::default()
        });
        let result = extractor(&chain).extract(&root, 0).await;
        assert!(matches!(result, Err(EthError::UpstreamUnavailable(_))));
    }
}
