//! # Polling Filters
//!
//! Filters installed over JSON-RPC, fed by produced and reverted tipsets,
//! drained with `eth_getFilterChanges`.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{topic, Gateway};
    use eth_gateway::adapters::fixtures::topic_event;
    use eth_gateway::domain::error::codes;
    use eth_gateway::GatewayConfig;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn entries(changes: &Value) -> &Vec<Value> {
        changes.as_array().expect("filter changes are an array")
    }

    // =========================================================================
    // LOG FILTERS
    // =========================================================================

    /// Logs are delivered once: a poll resets the cursor, so the next poll
    /// only sees logs of later tipsets.
    #[tokio::test]
    async fn test_log_filter_poll_resets_cursor() {
        let mut gw = Gateway::start();
        let c = gw.contract;
        let id = gw
            .result("eth_newFilter", json!([{"fromBlock": "0x0", "toBlock": "latest"}]))
            .await;

        gw.produce(vec![]).await;
        gw.produce(vec![vec![topic_event(c, &[1], b"a")]]).await;
        let changes = gw.result("eth_getFilterChanges", json!([id])).await;
        assert_eq!(entries(&changes).len(), 1);
        assert_eq!(changes[0]["address"], json!(gw.contract_address()));
        assert_eq!(changes[0]["removed"], json!(false));

        gw.produce(vec![vec![
            topic_event(c, &[2], b"b"),
            topic_event(c, &[3], b"c"),
        ]])
        .await;
        let changes = gw.result("eth_getFilterChanges", json!([id])).await;
        assert_eq!(entries(&changes).len(), 2);
        assert_eq!(changes[0]["blockNumber"], json!("0x3"));
        assert_eq!(changes[0]["logIndex"], json!("0x0"));
        assert_eq!(changes[1]["logIndex"], json!("0x1"));
        assert_eq!(changes[1]["topics"][0], json!(topic(3)));

        let changes = gw.result("eth_getFilterChanges", json!([id])).await;
        assert!(entries(&changes).is_empty());
    }

    #[tokio::test]
    async fn test_topic_wildcard_matches_any_second_topic() {
        let mut gw = Gateway::start();
        let c = gw.contract;
        let id = gw
            .result("eth_newFilter", json!([{"topics": [topic(1), null]}]))
            .await;

        gw.produce(vec![vec![
            topic_event(c, &[1, 2], b""),
            topic_event(c, &[1, 9], b""),
            topic_event(c, &[3, 2], b""),
            topic_event(c, &[1], b""),
        ]])
        .await;

        let changes = gw.result("eth_getFilterChanges", json!([id])).await;
        let seconds: Vec<&Value> = entries(&changes).iter().map(|l| &l["topics"][1]).collect();
        assert_eq!(seconds, vec![&json!(topic(2)), &json!(topic(9)), &Value::Null]);
    }

    #[tokio::test]
    async fn test_address_filter_excludes_other_emitters() {
        let mut gw = Gateway::start();
        let other = "0x00000000000000000000000000000000deadbeef";
        let mine = gw
            .result("eth_newFilter", json!([{"address": gw.contract_address()}]))
            .await;
        let theirs = gw.result("eth_newFilter", json!([{"address": [other]}])).await;

        gw.produce(vec![vec![topic_event(gw.contract, &[1], b"")]]).await;

        let changes = gw.result("eth_getFilterChanges", json!([mine])).await;
        assert_eq!(entries(&changes).len(), 1);
        let changes = gw.result("eth_getFilterChanges", json!([theirs])).await;
        assert!(entries(&changes).is_empty());
    }

    #[tokio::test]
    async fn test_revert_redelivers_logs_as_removed() {
        let mut gw = Gateway::start();
        let id = gw.result("eth_newFilter", json!([{}])).await;

        let ts = gw
            .produce(vec![vec![topic_event(gw.contract, &[7], b"x")]])
            .await;
        let applied = gw.result("eth_getFilterChanges", json!([id])).await;
        assert_eq!(entries(&applied).len(), 1);

        gw.revert().await;
        let reverted = gw.result("eth_getFilterChanges", json!([id])).await;
        assert_eq!(entries(&reverted).len(), 1);
        assert_eq!(reverted[0]["removed"], json!(true));
        assert_eq!(reverted[0]["transactionHash"], applied[0]["transactionHash"]);
        assert_eq!(reverted[0]["blockNumber"], json!(format!("{:#x}", ts.height())));

        assert_eq!(gw.result("eth_blockNumber", json!([])).await, json!("0x0"));
    }

    #[tokio::test]
    async fn test_filter_logs_replays_range() {
        let mut gw = Gateway::start();
        for t in 1..=3u8 {
            gw.produce(vec![vec![topic_event(gw.contract, &[t], b"")]]).await;
        }
        let id = gw
            .result("eth_newFilter", json!([{"fromBlock": "0x2", "toBlock": "0x3"}]))
            .await;

        let logs = gw.result("eth_getFilterLogs", json!([id])).await;
        let heights: Vec<&Value> = entries(&logs).iter().map(|l| &l["blockNumber"]).collect();
        assert_eq!(heights, vec![&json!("0x2"), &json!("0x3")]);

        let all = gw.result("eth_getLogs", json!([{"fromBlock": "earliest"}])).await;
        assert_eq!(entries(&all).len(), 3);
    }

    #[tokio::test]
    async fn test_get_logs_range_limit() {
        let mut config = GatewayConfig::default();
        config.limits.max_log_block_range = 1;
        let mut gw = Gateway::with_config(config);
        gw.produce(vec![]).await;
        gw.produce(vec![]).await;

        let (code, _) = gw
            .error("eth_getLogs", json!([{"fromBlock": "0x0", "toBlock": "0x2"}]))
            .await;
        assert_eq!(code, i64::from(codes::LIMIT_EXCEEDED));
    }

    // =========================================================================
    // BLOCK FILTERS
    // =========================================================================

    #[tokio::test]
    async fn test_block_filter_returns_hashes_in_order() {
        let mut gw = Gateway::start();
        let id = gw.result("eth_newBlockFilter", json!([])).await;

        gw.produce(vec![]).await;
        gw.produce(vec![]).await;

        let hashes = gw.result("eth_getFilterChanges", json!([id])).await;
        assert_eq!(entries(&hashes).len(), 2);
        for (i, hash) in entries(&hashes).iter().enumerate() {
            let block = gw
                .result("eth_getBlockByNumber", json!([format!("{:#x}", i + 1), false]))
                .await;
            assert_eq!(&block["hash"], hash);
        }
        let (code, _) = gw.error("eth_getFilterLogs", json!([id])).await;
        assert_eq!(code, i64::from(codes::INVALID_PARAMS));
    }

    // =========================================================================
    // LIFECYCLE AND EVICTION
    // =========================================================================

    #[tokio::test]
    async fn test_uninstall_then_poll_is_not_found() {
        let gw = Gateway::start();
        let id = gw.result("eth_newBlockFilter", json!([])).await;

        assert_eq!(gw.result("eth_uninstallFilter", json!([id])).await, json!(true));
        assert_eq!(gw.result("eth_uninstallFilter", json!([id])).await, json!(false));
        let (code, _) = gw.error("eth_getFilterChanges", json!([id])).await;
        assert_eq!(code, i64::from(codes::FILTER_NOT_FOUND));

        // ids are never reused
        let next = gw.result("eth_newBlockFilter", json!([])).await;
        assert_ne!(next, id);
    }

    #[tokio::test]
    async fn test_buffer_overflow_evicts_filter() {
        let mut config = GatewayConfig::default();
        config.filters.max_filter_results = 2;
        let mut gw = Gateway::with_config(config);
        let c = gw.contract;
        let small = gw.result("eth_newFilter", json!([{}])).await;
        let narrow = gw
            .result("eth_newFilter", json!([{"topics": [topic(1)]}]))
            .await;

        gw.produce(vec![vec![
            topic_event(c, &[1], b""),
            topic_event(c, &[2], b""),
            topic_event(c, &[3], b""),
        ]])
        .await;

        let (code, _) = gw.error("eth_getFilterChanges", json!([small])).await;
        assert_eq!(code, i64::from(codes::FILTER_NOT_FOUND));
        let changes = gw.result("eth_getFilterChanges", json!([narrow])).await;
        assert_eq!(entries(&changes).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_filter_evicted_after_ttl() {
        let mut config = GatewayConfig::default();
        config.filters.filter_ttl = Duration::from_secs(60);
        config.filters.sweep_interval = Duration::from_secs(10);
        let gw = Gateway::with_config(config);
        let idle = gw.result("eth_newBlockFilter", json!([])).await;
        let busy = gw.result("eth_newBlockFilter", json!([])).await;

        for _ in 0..8 {
            tokio::time::advance(Duration::from_secs(10)).await;
            gw.result("eth_getFilterChanges", json!([busy])).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (code, _) = gw.error("eth_getFilterChanges", json!([idle])).await;
        assert_eq!(code, i64::from(codes::FILTER_NOT_FOUND));
        gw.result("eth_getFilterChanges", json!([busy])).await;
    }

    #[tokio::test]
    async fn test_cancelled_install_leaves_no_filter() {
        let mut config = GatewayConfig::default();
        config.timeouts.default = Duration::from_millis(50);
        let gw = Gateway::with_config(config);
        gw.chain.set_behaviour(eth_gateway::adapters::Behaviour {
            stall: true,
            ..Default::default()
        });

        let (code, _) = gw.error("eth_newFilter", json!([{}])).await;
        assert_eq!(code, i64::from(codes::TIMEOUT));
        assert!(gw.service.filters().is_empty());
    }
}
