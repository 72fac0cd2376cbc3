//! Builders for messages, receipts and events on the in-memory chain.

use crate::adapters::memory::MemoryChain;
use shared_types::{
    ActorEvent, ActorId, ChainMessage, Cid, EncodingError, EventEntry, ExitCode, Message,
    MessageReceipt, NativeAddress, StampedEvent, TipSet, METHOD_INVOKE_EVM, METHOD_SEND,
};

/// Plain value transfer between two ID addresses.
pub fn transfer(from: ActorId, to: ActorId, nonce: u64) -> Message {
    Message {
        version: 0,
        to: NativeAddress::Id(to),
        from: NativeAddress::Id(from),
        sequence: nonce,
        value: 1,
        method_num: METHOD_SEND,
        params: vec![],
        gas_limit: 1_000_000,
        gas_fee_cap: 1_000,
        gas_premium: 50,
    }
}

/// Contract invocation carrying `input`.
pub fn invoke(from: ActorId, to: ActorId, nonce: u64, input: Vec<u8>) -> Message {
    Message {
        method_num: METHOD_INVOKE_EVM,
        params: input,
        value: 0,
        ..transfer(from, to, nonce)
    }
}

pub fn receipt(exit_code: ExitCode, gas_used: u64, events_root: Option<Cid>) -> MessageReceipt {
    MessageReceipt {
        exit_code,
        return_data: vec![],
        gas_used,
        events_root,
    }
}

/// Event with one `tN` entry per topic byte (each repeated to 32 bytes)
/// and `data` under `d`.
pub fn topic_event(emitter: ActorId, topics: &[u8], data: &[u8]) -> StampedEvent {
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

/// Produce a tipset with one invocation per entry of `receipts_events`; the
/// receipt of invocation `i` emits `receipts_events[i]`. An empty slice
/// produces an empty tipset.
pub async fn produce_with_events(
    chain: &MemoryChain,
    sender: ActorId,
    contract: ActorId,
    receipts_events: Vec<Vec<StampedEvent>>,
) -> Result<TipSet, EncodingError> {
    let base_nonce = chain.head_height() * 1_000;
    let mut executed = Vec::with_capacity(receipts_events.len());
    for (i, events) in receipts_events.into_iter().enumerate() {
        let root = if events.is_empty() {
            None
        } else {
            Some(chain.put_events(&events)?)
        };
        let msg = invoke(sender, contract, base_nonce + i as u64, vec![0xca, 0xfe]);
        executed.push((
            ChainMessage::Unsigned(msg),
            receipt(ExitCode::OK, 2_000_000, root),
        ));
    }
    Ok(chain.produce_tipset(executed).await)
}
