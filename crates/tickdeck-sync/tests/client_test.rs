/*
[INPUT]:  MarketDataClient over scripted sockets and a wiremock REST server
[OUTPUT]: Live subscription decoding, coalescing and history fetch verification
[POS]:    Integration test layer - market data client
[UPDATE]: When changing client subscriptions or fetch behavior
*/

mod common;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tickdeck_adapter::{KlineInterval, TakerSide};
use tickdeck_sync::{
    BinanceSource, CandleCache, ClientOptions, ConnectionManager, MarketDataClient,
    ReconnectPolicy, SyncError,
};

use common::{
    ScriptedConnector, depth_message, kline_message, next_socket, recv, trade_message,
};

fn d(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn client_with(connector: Arc<ScriptedConnector>, rest_base: &str, options: ClientOptions) -> MarketDataClient {
    let source = BinanceSource::with_endpoints(rest_base, "ws://scripted/ws").unwrap();
    MarketDataClient::new(
        Arc::new(source),
        ConnectionManager::with_connector(connector, ReconnectPolicy::default()),
        Arc::new(CandleCache::default()),
        options,
    )
}

fn scripted_client(connector: Arc<ScriptedConnector>, options: ClientOptions) -> MarketDataClient {
    client_with(connector, "http://127.0.0.1:9/api/v3", options)
}

#[tokio::test(start_paused = true)]
async fn test_kline_subscription_coalesces_to_latest_candle() {
    let (connector, mut sockets) = ScriptedConnector::accepting();
    let client = scripted_client(
        connector,
        ClientOptions {
            coalesce_interval: Duration::from_millis(500),
            ..ClientOptions::default()
        },
    );

    let (tx, mut candles) = mpsc::unbounded_channel();
    let subscription = client.subscribe("BTCUSDT", KlineInterval::OneMinute, move |candle| {
        let _ = tx.send(candle);
    });
    assert_eq!(subscription.key(), "btcusdt_1m");

    let socket = next_socket(&mut sockets).await;
    assert_eq!(socket.url, "ws://scripted/ws/btcusdt@kline_1m");

    socket.send(kline_message(1_700_000_040_000, "100.1")).await;
    socket.send(kline_message(1_700_000_040_000, "100.2")).await;
    socket.send(kline_message(1_700_000_040_000, "100.3")).await;

    let delivered = recv(&mut candles).await;
    assert_eq!(delivered.open_time, 1_700_000_040);
    assert_eq!(delivered.close, d("100.3"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(candles.try_recv().is_err(), "intermediate candles are dropped");

    socket.send(kline_message(1_700_000_100_000, "101.0")).await;
    let next = recv(&mut candles).await;
    assert_eq!(next.open_time, 1_700_000_100);

    subscription.unsubscribe();
    assert_eq!(client.connections().subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_kline_is_dropped() {
    let (connector, mut sockets) = ScriptedConnector::accepting();
    let client = scripted_client(connector, ClientOptions::default());

    let (tx, mut candles) = mpsc::unbounded_channel();
    let _subscription = client.subscribe("BTCUSDT", KlineInterval::OneMinute, move |candle| {
        let _ = tx.send(candle);
    });
    let socket = next_socket(&mut sockets).await;

    let mut broken = kline_message(1_700_000_040_000, "100.1");
    broken["k"]["c"] = serde_json::json!("not-a-number");
    socket.send(broken).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(candles.try_recv().is_err());

    socket.send(kline_message(1_700_000_040_000, "100.4")).await;
    assert_eq!(recv(&mut candles).await.close, d("100.4"));
}

#[tokio::test(start_paused = true)]
async fn test_month_and_minute_streams_are_distinct() {
    let (connector, mut sockets) = ScriptedConnector::accepting();
    let client = scripted_client(connector.clone(), ClientOptions::default());

    let minute = client.subscribe("BTCUSDT", KlineInterval::OneMinute, |_| {});
    let month = client.subscribe("BTCUSDT", KlineInterval::OneMonth, |_| {});
    let _first = next_socket(&mut sockets).await;
    let _second = next_socket(&mut sockets).await;

    assert_ne!(minute.key(), month.key());
    assert_eq!(client.connections().subscription_count(), 2);
}

#[tokio::test]
async fn test_depth_updates_arrive_in_order_without_coalescing() {
    let (connector, mut sockets) = ScriptedConnector::accepting();
    let client = scripted_client(connector, ClientOptions::default());

    let (tx, mut updates) = mpsc::unbounded_channel();
    let _handle = client.subscribe_depth("BTCUSDT", move |update| {
        let _ = tx.send(update);
    });
    let socket = next_socket(&mut sockets).await;
    assert_eq!(socket.url, "ws://scripted/ws/btcusdt@depth@100ms");

    socket.send(depth_message(&[("100.0", "1")], &[])).await;
    socket.send(depth_message(&[("100.0", "0")], &[("100.5", "2")])).await;

    let first = recv(&mut updates).await;
    assert_eq!(first.bids[0].quantity, d("1"));
    let second = recv(&mut updates).await;
    assert!(second.bids[0].is_removal());
    assert_eq!(second.asks[0].price, d("100.5"));
}

#[tokio::test]
async fn test_depth_batch_with_bad_pair_is_rejected_whole() {
    let (connector, mut sockets) = ScriptedConnector::accepting();
    let client = scripted_client(connector, ClientOptions::default());

    let (tx, mut updates) = mpsc::unbounded_channel();
    let _handle = client.subscribe_depth("BTCUSDT", move |update| {
        let _ = tx.send(update);
    });
    let socket = next_socket(&mut sockets).await;

    socket.send(depth_message(&[("100.0", "1"), ("oops", "1")], &[])).await;
    socket.send(depth_message(&[("99.0", "3")], &[])).await;

    let update = recv(&mut updates).await;
    assert_eq!(update.bids.len(), 1);
    assert_eq!(update.bids[0].price, d("99.0"));
}

#[tokio::test]
async fn test_trades_decode_taker_side() {
    let (connector, mut sockets) = ScriptedConnector::accepting();
    let client = scripted_client(connector, ClientOptions::default());

    let (tx, mut trades) = mpsc::unbounded_channel();
    let _handle = client.subscribe_trades("BTCUSDT", move |trade| {
        let _ = tx.send(trade);
    });
    let socket = next_socket(&mut sockets).await;
    assert_eq!(socket.url, "ws://scripted/ws/btcusdt@trade");

    socket.send(trade_message(11, "100.25", true)).await;
    socket.send(trade_message(12, "100.30", false)).await;

    let first = recv(&mut trades).await;
    assert_eq!(first.id, 11);
    assert_eq!(first.price, d("100.25"));
    assert_eq!(first.taker_side, TakerSide::Sell);
    let second = recv(&mut trades).await;
    assert_eq!(second.taker_side, TakerSide::Buy);
}

#[tokio::test]
async fn test_fetch_historical_against_rest_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("interval", "1m"))
        .and(query_param("limit", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::sample_klines_body()))
        .expect(1)
        .mount(&server)
        .await;

    let (connector, _sockets) = ScriptedConnector::accepting();
    let client = client_with(connector, &format!("{}/api/v3", server.uri()), ClientOptions::default());

    let candles = client
        .fetch_historical("btcusdt", KlineInterval::OneMinute, 3)
        .await
        .unwrap();
    let times: Vec<i64> = candles.iter().map(|candle| candle.open_time).collect();
    assert_eq!(times, vec![1_700_000_000, 1_700_000_060, 1_700_000_120]);
    assert_eq!(candles[0].open, d("100.0"));

    // served from cache; the mock expects exactly one request
    let again = client
        .fetch_historical("BTCUSDT", KlineInterval::OneMinute, 3)
        .await
        .unwrap();
    assert_eq!(again, candles);
}

#[tokio::test]
async fn test_fetch_historical_retries_then_reports_last_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(3)
        .mount(&server)
        .await;

    let (connector, _sockets) = ScriptedConnector::accepting();
    let client = client_with(
        connector,
        &format!("{}/api/v3", server.uri()),
        ClientOptions {
            retry_base_delay: Duration::from_millis(10),
            ..ClientOptions::default()
        },
    );

    let err = client
        .fetch_historical("BTCUSDT", KlineInterval::OneMinute, 3)
        .await
        .unwrap_err();
    match err {
        SyncError::FetchFailure { attempts, source } => {
            assert_eq!(attempts, 3);
            assert_eq!(source.status_code(), Some(503));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_fetch_historical_rejects_row_with_bad_number() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            [1_700_000_000_000_i64, "100.0", "100.6", "99.8", "100.2"],
            [1_700_000_060_000_i64, "100.2", "abc", "100.1", "100.5"]
        ])))
        .mount(&server)
        .await;

    let (connector, _sockets) = ScriptedConnector::accepting();
    let client = client_with(
        connector,
        &format!("{}/api/v3", server.uri()),
        ClientOptions {
            retry_base_delay: Duration::from_millis(1),
            ..ClientOptions::default()
        },
    );

    let err = client
        .fetch_historical("BTCUSDT", KlineInterval::OneMinute, 2)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::FetchFailure {
            source: tickdeck_adapter::AdapterError::Parse { .. },
            ..
        }
    ));
}
