// Copyright (c) 2024 Botho Foundation

//! Request executor retry, backoff and failover behaviour.

use cult_connection::{
    ConnectionConfig, ConnectionManager, Error, LedgerClient, LedgerRequest, RequestExecutor,
};
use cult_connection_test_utils::MockTransport;
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn executor(transport: &MockTransport, urls: &[&str]) -> RequestExecutor {
    let config = ConnectionConfig {
        endpoints: urls.iter().map(|u| u.to_string()).collect(),
        ..ConnectionConfig::default()
    };
    RequestExecutor::new(ConnectionManager::new(config, Arc::new(transport.clone())))
}

fn account_info() -> LedgerRequest {
    LedgerRequest::AccountInfo {
        account: "rAlice".to_string(),
        ledger_index: "validated".to_string(),
    }
}

// ============================================================================
// Retry and failover
// ============================================================================

mod retry {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let transport = MockTransport::new();
        transport.set_response("account_info", json!({"account_data": {"Sequence": 7}}));
        let executor = executor(&transport, &["wss://a", "wss://b"]);

        let result = executor.execute(&account_info()).await.unwrap();
        assert_eq!(result["account_data"]["Sequence"], 7);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_endpoint_fails_second_succeeds() {
        let transport = MockTransport::new();
        transport.fail_requests("wss://a", Error::Transport("connection reset".to_string()));
        transport.set_response("account_info", json!({"account_data": {"Sequence": 7}}));
        let executor = executor(&transport, &["wss://a", "wss://b"]);

        let result = executor.execute(&account_info()).await.unwrap();
        assert_eq!(result["account_data"]["Sequence"], 7);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, "wss://a");
        assert_eq!(requests[1].url, "wss://b");
        assert_eq!(requests[1].at - requests[0].at, Duration::from_secs(1));

        let manager = executor.manager();
        assert!(manager.pool().endpoints()[0].last_failure.is_some());
        assert_eq!(manager.current_endpoint().as_deref(), Some("wss://b"));
        assert_eq!(transport.links()[0].close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_three_attempts() {
        let transport = MockTransport::new();
        for url in ["wss://a", "wss://b", "wss://c"] {
            transport.fail_requests(url, Error::Timeout(Duration::from_secs(30)));
        }
        let executor = executor(&transport, &["wss://a", "wss://b", "wss://c"]);

        let err = executor.execute(&account_info()).await.unwrap_err();
        assert_eq!(
            err,
            Error::RequestExhausted {
                attempts: 3,
                last: Box::new(Error::Timeout(Duration::from_secs(30))),
            }
        );

        let requests = transport.requests();
        let urls: Vec<&str> = requests.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["wss://a", "wss://b", "wss://c"]);
        assert_eq!(requests[1].at - requests[0].at, Duration::from_secs(1));
        assert_eq!(requests[2].at - requests[1].at, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deterministic_ledger_error_is_not_retried() {
        let transport = MockTransport::new();
        let not_found = Error::Rpc {
            code: "actNotFound".to_string(),
            message: "Account not found.".to_string(),
        };
        transport.fail_requests("wss://a", not_found.clone());
        let executor = executor(&transport, &["wss://a", "wss://b"]);

        let err = executor.execute(&account_info()).await.unwrap_err();
        assert_eq!(
            err,
            Error::RequestExhausted {
                attempts: 1,
                last: Box::new(not_found),
            }
        );
        assert_eq!(err.rpc_code(), Some("actNotFound"));
        assert_eq!(transport.requests().len(), 1);
        assert!(executor.manager().pool().endpoints()[0].last_failure.is_none());
        assert_eq!(executor.manager().current_endpoint().as_deref(), Some("wss://a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_ledger_error_fails_over() {
        let transport = MockTransport::new();
        transport.fail_requests(
            "wss://a",
            Error::Rpc {
                code: "tooBusy".to_string(),
                message: "The server is too busy to help you now.".to_string(),
            },
        );
        transport.set_response("account_info", json!({"account_data": {"Sequence": 7}}));
        let executor = executor(&transport, &["wss://a", "wss://b"]);

        let result = executor.execute(&account_info()).await.unwrap();
        assert_eq!(result["account_data"]["Sequence"], 7);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].url, "wss://b");
        assert!(executor.manager().pool().endpoints()[0].last_failure.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_error_exhausts_budget() {
        let transport = MockTransport::new();
        let busy = Error::Rpc {
            code: "tooBusy".to_string(),
            message: "The server is too busy to help you now.".to_string(),
        };
        transport.fail_requests("wss://a", busy.clone());
        let executor = executor(&transport, &["wss://a"]);

        let err = executor.execute(&account_info()).await.unwrap_err();
        assert_eq!(
            err,
            Error::RequestExhausted {
                attempts: 3,
                last: Box::new(busy),
            }
        );
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_count_as_attempts() {
        let transport = MockTransport::new();
        transport.refuse("wss://a");
        transport.refuse("wss://b");
        let executor = executor(&transport, &["wss://a", "wss://b"]);

        let err = executor.execute(&LedgerRequest::ServerInfo).await.unwrap_err();
        match err {
            Error::RequestExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::EndpointUnavailable { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Two endpoints per ensure_connected, three attempts.
        assert_eq!(transport.connect_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_when_endpoint_heals() {
        let transport = MockTransport::new();
        transport.fail_requests("wss://a", Error::Closed);
        let executor = executor(&transport, &["wss://a"]);

        let background = executor.clone();
        let handle =
            tokio::spawn(async move { background.execute(&LedgerRequest::ServerInfo).await });

        tokio::time::sleep(Duration::from_millis(500)).await;
        transport.heal_requests("wss://a");

        assert!(handle.await.unwrap().is_ok());
        assert_eq!(transport.requests().len(), 2);
    }
}

// ============================================================================
// Typed queries
// ============================================================================

mod queries {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_account_nfts() {
        let transport = MockTransport::new();
        transport.set_response(
            "account_nfts",
            json!({
                "account": "rAlice",
                "account_nfts": [
                    {"Flags": 8, "Issuer": "rIssuer", "NFTokenID": "0001", "NFTokenTaxon": 1, "URI": "6970"},
                    {"Flags": 0, "Issuer": "rIssuer", "NFTokenID": "0002", "NFTokenTaxon": 2}
                ]
            }),
        );
        let client = LedgerClient::new(executor(&transport, &["wss://a"]));

        let tokens = client.account_nfts("rAlice").await.unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].token_id, "0001");
        assert_eq!(tokens[1].uri, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_account_lines_and_info() {
        let transport = MockTransport::new();
        transport.set_response(
            "account_lines",
            json!({"lines": [{"account": "rIssuer", "balance": "125.5", "currency": "CLT"}]}),
        );
        transport.set_response(
            "account_info",
            json!({"account_data": {"Account": "rAlice", "Sequence": 42, "Balance": "1000000"}}),
        );
        let client = LedgerClient::new(executor(&transport, &["wss://a"]));

        let lines = client.account_lines("rAlice", Some("rIssuer")).await.unwrap();
        assert_eq!(lines[0].currency, "CLT");
        assert_eq!(lines[0].balance, "125.5");

        let root = client.account_info("rAlice", "validated").await.unwrap();
        assert_eq!(root.sequence, 42);
        assert_eq!(root.balance.as_deref(), Some("1000000"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_field_is_decode_error() {
        let transport = MockTransport::new();
        let client = LedgerClient::new(executor(&transport, &["wss://a"]));

        let err = client.account_nfts("rAlice").await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
