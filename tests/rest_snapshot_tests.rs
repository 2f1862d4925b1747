//! REST snapshot client tests against a mock HTTP server.

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bookstream::binance::BinanceRestClient;
use bookstream::binance::types::RestApiError;
use bookstream::book::BookSnapshot;

#[tokio::test]
async fn fetches_and_parses_a_depth_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/depth"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"lastUpdateId":1027024,"bids":[["50000.00","1.50"],["49999.00","2.00"]],"asks":[["50001.00","0.75"]]}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let client = BinanceRestClient::new(server.uri());
    let msg = client.get_depth_snapshot("BTCUSDT", 100).await.unwrap();

    assert_eq!(msg.last_update_id, 1027024);
    assert_eq!(msg.bids.len(), 2);
    assert_eq!(msg.asks.len(), 1);

    // The wire record converts cleanly into the core's typed snapshot.
    let snapshot = BookSnapshot::try_from(msg).unwrap();
    assert_eq!(snapshot.bids[0].price, 50000.0);
    assert_eq!(snapshot.asks[0].quantity, 0.75);
}

#[tokio::test]
async fn lowercase_symbols_are_normalized_in_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/depth"))
        .and(query_param("symbol", "ETHUSDT"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"lastUpdateId":7,"bids":[["10.0","1.0"]],"asks":[["11.0","1.0"]]}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = BinanceRestClient::new(server.uri());
    client.get_depth_snapshot("ethusdt", 1000).await.unwrap();
}

#[tokio::test]
async fn http_error_status_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/depth"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_raw(r#"{"code":-1003,"msg":"Too many requests."}"#, "application/json"),
        )
        .mount(&server)
        .await;

    let client = BinanceRestClient::new(server.uri());
    let err = client.get_depth_snapshot("BTCUSDT", 100).await.unwrap_err();

    match err {
        RestApiError::HttpStatusError(status, body) => {
            assert_eq!(status, 429);
            assert!(body.contains("Too many requests"));
        }
        other => panic!("Expected HttpStatusError, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_body_is_a_json_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/depth"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("not json", "application/json"))
        .mount(&server)
        .await;

    let client = BinanceRestClient::new(server.uri());
    let err = client.get_depth_snapshot("BTCUSDT", 100).await.unwrap_err();
    assert!(matches!(err, RestApiError::JsonError(_)));
}

#[tokio::test]
async fn invalid_symbol_is_rejected_before_any_request() {
    let client = BinanceRestClient::new("http://localhost:1");
    let err = client.get_depth_snapshot("a!", 100).await.unwrap_err();
    assert!(matches!(err, RestApiError::InvalidSymbol(_)));
}
