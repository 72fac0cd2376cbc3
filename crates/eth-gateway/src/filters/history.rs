//! One-shot log queries over past tipsets (`eth_getLogs`,
//! `eth_getFilterLogs`).

use crate::domain::error::{EthError, EthResult};
use crate::domain::types::{BlockParam, EthLog};
use crate::eth::projection::ChainViewProjector;
use crate::filters::criteria::LogCriteria;
use tracing::debug;

/// Logs matching `criteria` in chain order. Open ranges end at the current
/// head; ranges longer than `max_range` epochs are refused.
pub async fn collect_logs(
    projector: &ChainViewProjector,
    criteria: &LogCriteria,
    max_range: u64,
) -> EthResult<Vec<EthLog>> {
    if let Some(hash) = criteria.block_hash {
        let ts = projector
            .resolve_block_param(&BlockParam::Hash(hash))
            .await?
            .ok_or_else(|| EthError::InvalidParams(format!("unknown block {:#x}", hash)))?;
        let logs = projector.tipset_logs(&ts).await?;
        return Ok(logs.into_iter().filter(|l| criteria.matches(l)).collect());
    }

    let head = projector.head().await?.height();
    let to = criteria.to_height.unwrap_or(head).min(head);
    let from = criteria.from_height;
    if from > to {
        return Ok(Vec::new());
    }
    if to - from >= max_range {
        return Err(EthError::LimitExceeded(format!(
            "block range {}..={} exceeds {} epochs",
            from, to, max_range
        )));
    }

    let mut out = Vec::new();
    for height in from..=to {
        let Some(ts) = projector.tipset_at(height).await? else {
            continue;
        };
        out.extend(
            projector
                .tipset_logs(&ts)
                .await?
                .into_iter()
                .filter(|l| criteria.matches(l)),
        );
    }
    debug!(from, to, matched = out.len(), "collected logs");
    Ok(out)
}
