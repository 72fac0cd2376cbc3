//! # Accounts and Addresses
//!
//! Foreign addresses resolved through the bridge for state queries, log
//! emitters and chain metadata.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{hex_address, Gateway};
    use eth_gateway::adapters::fixtures::{produce_with_events, topic_event};
    use eth_gateway::eth::masked_id;
    use eth_gateway::ports::outbound::ActorKind;
    use eth_gateway::Address;
    use serde_json::json;
    use shared_types::NativeAddress;

    #[tokio::test]
    async fn test_delegated_and_masked_forms_resolve_to_same_actor() {
        let gw = Gateway::start();
        let eth = Address::repeat_byte(0xab);
        let id = gw.chain.create_actor(
            ActorKind::EthAccount,
            1_000,
            Some(NativeAddress::eth_delegated(eth.0)),
        );
        gw.chain.set_nonce(id, 7);

        for addr in [hex_address(eth), hex_address(masked_id(id))] {
            assert_eq!(
                gw.result("eth_getBalance", json!([addr, "latest"])).await,
                json!("0x3e8")
            );
            assert_eq!(
                gw.result("eth_getTransactionCount", json!([addr, "latest"])).await,
                json!("0x7")
            );
        }
    }

    #[tokio::test]
    async fn test_never_funded_address_has_zero_balance() {
        let gw = Gateway::start();
        let fresh = hex_address(Address::repeat_byte(0x5a));
        assert_eq!(
            gw.result("eth_getBalance", json!([fresh, "latest"])).await,
            json!("0x0")
        );
        assert_eq!(gw.result("eth_getCode", json!([fresh, "latest"])).await, json!("0x"));
    }

    /// Emitters with a delegated address are reported by it, never by
    /// their masked ID.
    #[tokio::test]
    async fn test_log_emitter_uses_delegated_address() {
        let gw = Gateway::start();
        let eth = Address::repeat_byte(0xc0);
        let contract = gw.chain.create_actor(
            ActorKind::Evm,
            0,
            Some(NativeAddress::eth_delegated(eth.0)),
        );
        gw.chain.set_bytecode(contract, vec![0x60, 0x80]);
        produce_with_events(
            &gw.chain,
            gw.sender,
            contract,
            vec![vec![topic_event(contract, &[1], b"")]],
        )
        .await
        .unwrap();

        let logs = gw.result("eth_getLogs", json!([{"fromBlock": "earliest"}])).await;
        assert_eq!(logs[0]["address"], json!(hex_address(eth)));
        assert_ne!(logs[0]["address"], json!(hex_address(masked_id(contract))));

        let code = gw.result("eth_getCode", json!([hex_address(eth), "latest"])).await;
        assert_eq!(code, json!("0x6080"));
    }

    #[tokio::test]
    async fn test_metadata_batch() {
        let gw = Gateway::start();
        let batch = json!([
            {"jsonrpc": "2.0", "id": 1, "method": "eth_chainId"},
            {"jsonrpc": "2.0", "id": 2, "method": "net_version"},
            {"jsonrpc": "2.0", "id": 3, "method": "eth_syncing"},
            {"jsonrpc": "2.0", "id": 4, "method": "eth_accounts"},
            {"jsonrpc": "2.0", "id": 5, "method": "eth_noSuchMethod"},
        ]);
        let responses = gw.service.handle_rpc(&batch.to_string()).await;
        let responses = responses.as_array().unwrap();
        assert_eq!(responses.len(), 5);
        assert_eq!(responses[0]["result"], json!("0x13a"));
        assert_eq!(responses[1]["result"], json!("314"));
        assert_eq!(responses[2]["result"], json!(false));
        assert_eq!(responses[3]["result"], json!([]));
        assert_eq!(responses[4]["error"]["code"], json!(-32601));
        assert_eq!(responses[4]["id"], json!(5));
    }
}
