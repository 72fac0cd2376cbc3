//! # Execution Paths
//!
//! Simulated calls, gas estimation and raw transaction submission, from
//! request to mempool to receipt.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{hex_address, poll_until_some, Gateway};
    use eth_gateway::adapters::fixtures::receipt;
    use eth_gateway::adapters::Behaviour;
    use eth_gateway::domain::error::{codes, GAS_ESTIMATION_PREFIX};
    use eth_gateway::eth::Eip1559Tx;
    use eth_gateway::ports::outbound::Mempool;
    use eth_gateway::Address;
    use primitive_types::U256;
    use secp256k1::{Message as SecpMessage, PublicKey, Secp256k1, SecretKey};
    use serde_json::json;
    use sha3::{Digest, Keccak256};
    use shared_types::{ChainMessage, ExitCode};

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    fn key() -> SecretKey {
        SecretKey::from_slice(&[0x42; 32]).unwrap()
    }

    fn key_address(key: &SecretKey) -> Address {
        let public = PublicKey::from_secret_key(&Secp256k1::new(), key);
        let digest = Keccak256::digest(&public.serialize_uncompressed()[1..]);
        Address::from_slice(&digest[12..])
    }

    fn transfer_to(to: Address, chain_id: u64, nonce: u64) -> Eip1559Tx {
        Eip1559Tx {
            chain_id,
            nonce,
            max_priority_fee_per_gas: U256::from(100_000u64),
            max_fee_per_gas: U256::from(1_000_000u64),
            gas_limit: 1_000_000,
            to: Some(to),
            value: U256::from(5u64),
            input: vec![],
            v: 0,
            r: [0; 32],
            s: [0; 32],
        }
    }

    /// `0x`-prefixed raw encoding of `tx` signed with `key`.
    fn sign(mut tx: Eip1559Tx, key: &SecretKey) -> String {
        let msg = SecpMessage::from_digest_slice(&tx.signing_hash()).unwrap();
        let (rec_id, compact) = Secp256k1::new()
            .sign_ecdsa_recoverable(&msg, key)
            .serialize_compact();
        tx.v = rec_id.to_i32() as u8;
        tx.r.copy_from_slice(&compact[..32]);
        tx.s.copy_from_slice(&compact[32..]);
        format!("0x{}", hex::encode(tx.encode()))
    }

    fn keccak_hex(raw: &str) -> String {
        let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
        format!("0x{}", hex::encode(Keccak256::digest(&bytes)))
    }

    // =========================================================================
    // RAW TRANSACTIONS
    // =========================================================================

    #[tokio::test]
    async fn test_raw_transaction_from_mempool_to_receipt() {
        let mut gw = Gateway::start();
        let sender = hex_address(key_address(&key()));
        let to = eth_gateway::eth::masked_id(gw.sender);
        let pending_filter = gw.result("eth_newPendingTransactionFilter", json!([])).await;

        let raw = sign(transfer_to(to, 314, 0), &key());
        let hash = gw.result("eth_sendRawTransaction", json!([raw])).await;
        assert_eq!(hash, json!(keccak_hex(&raw)));

        let pending = poll_until_some(&gw, "eth_getFilterChanges", json!([pending_filter])).await;
        assert_eq!(pending, vec![hash.clone()]);

        let tx = gw.result("eth_getTransactionByHash", json!([hash])).await;
        assert_eq!(tx["from"], json!(sender));
        assert_eq!(tx["to"], json!(hex_address(to)));
        assert!(tx["blockHash"].is_null());
        assert!(gw
            .result("eth_getTransactionReceipt", json!([hash]))
            .await
            .is_null());

        let signed = gw.chain.pending().await.unwrap().remove(0);
        gw.include(vec![(
            ChainMessage::Signed(signed),
            receipt(ExitCode::OK, 21_000, None),
        )])
        .await;

        let receipt = gw.result("eth_getTransactionReceipt", json!([hash])).await;
        assert_eq!(receipt["transactionHash"], hash);
        assert_eq!(receipt["status"], json!("0x1"));
        assert_eq!(receipt["from"], json!(sender));
        assert_eq!(receipt["blockNumber"], json!("0x1"));
        assert_eq!(receipt["gasUsed"], json!("0x5208"));

        let tx = gw.result("eth_getTransactionByHash", json!([hash])).await;
        assert_eq!(tx["blockHash"], receipt["blockHash"]);
        let block = gw.result("eth_getBlockByNumber", json!(["0x1", false])).await;
        assert_eq!(block["transactions"], json!([hash]));
    }

    #[tokio::test]
    async fn test_raw_transaction_for_other_chain_rejected() {
        let gw = Gateway::start();
        let raw = sign(transfer_to(Address::repeat_byte(1), 1, 0), &key());
        let (code, message) = gw.error("eth_sendRawTransaction", json!([raw])).await;
        assert_eq!(code, i64::from(codes::INVALID_PARAMS));
        assert!(message.contains("chain id"), "{}", message);
        assert!(gw.chain.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_subscription_sees_submitted_hash() {
        let gw = Gateway::start();
        let mut stream = gw
            .service
            .broker()
            .subscribe(eth_gateway::filters::FilterSpec::PendingTransactions)
            .unwrap();
        let raw = sign(transfer_to(Address::repeat_byte(1), 314, 0), &key());
        let hash = gw.result("eth_sendRawTransaction", json!([raw])).await;

        let delivered = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next_delivery())
            .await
            .unwrap();
        match delivered {
            Some(eth_gateway::ws::Delivery::Item(eth_gateway::ws::SubscriptionItem::PendingTransaction(h))) => {
                assert_eq!(json!(format!("{:#x}", h)), hash)
            }
            other => panic!("expected pending hash, got {:?}", other),
        }
    }

    // =========================================================================
    // SIMULATED EXECUTION
    // =========================================================================

    #[tokio::test]
    async fn test_call_returns_actor_output() {
        let gw = Gateway::start();
        gw.chain.set_behaviour(Behaviour {
            call_return: vec![0xbe, 0xef],
            ..Default::default()
        });
        let call = json!({"to": gw.contract_address(), "data": "0xcafe"});

        assert_eq!(gw.result("eth_call", json!([call, "latest"])).await, json!("0xbeef"));
        // base cost plus 16 per input byte
        assert_eq!(gw.result("eth_estimateGas", json!([call])).await, json!("0xf4260"));
    }

    #[tokio::test]
    async fn test_reverted_call_carries_code_and_data() {
        let gw = Gateway::start();
        gw.chain.set_behaviour(Behaviour {
            execution_failure: Some((33, "assertion failed".into(), vec![0xde, 0xad])),
            ..Default::default()
        });
        let call = json!({"to": gw.contract_address(), "input": "0x01"});

        let response = gw.rpc("eth_call", json!([call])).await;
        assert_eq!(response["error"]["code"], json!(codes::EXECUTION_REVERTED));
        assert_eq!(response["error"]["data"], json!("0xdead"));
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("execution reverted"));
    }

    /// The failure reason is kept, behind a fixed prefix, however deep in
    /// execution the revert happened.
    #[tokio::test]
    async fn test_failed_estimate_has_stable_prefix() {
        let gw = Gateway::start();
        for depth in [1u32, 64, 1024] {
            let reason = format!("reverted at call depth {}", depth);
            gw.chain.set_behaviour(Behaviour {
                execution_failure: Some((33, reason.clone(), vec![])),
                ..Default::default()
            });
            let call = json!({"to": gw.contract_address(), "data": "0x00"});
            let (code, message) = gw.error("eth_estimateGas", json!([call])).await;
            assert_eq!(code, i64::from(codes::GAS_ESTIMATION_FAILED));
            assert!(message.starts_with(GAS_ESTIMATION_PREFIX), "{}", message);
            assert!(message.contains(&reason), "{}", message);
        }
    }

    #[tokio::test]
    async fn test_outage_is_reported_as_unavailable() {
        let gw = Gateway::start();
        gw.chain.set_behaviour(Behaviour {
            unavailable: true,
            ..Default::default()
        });
        let (code, _) = gw.error("eth_blockNumber", json!([])).await;
        assert_eq!(code, i64::from(codes::UPSTREAM_UNAVAILABLE));
    }
}
