//! End-to-end snapshot requests through a session

use std::sync::{Arc, Mutex};
use std::time::Duration;

use market_feed::transport::{
    ChannelHandle, ConnectionHandle, ConnectionNotice, ConnectionSink, EventSink,
};
use market_feed::{
    Candle, Config, EventFlags, EventKind, FeedError, InMemoryTransport, MarketEvent, Session,
    TimeAndSale, Transport,
};

const MINUTE_MS: u64 = 60_000;
const BASE: u64 = 1_659_571_200_000;

fn minute(n: u64) -> u64 {
    BASE + n * MINUTE_MS
}

fn candle(n: u64) -> MarketEvent {
    Candle::new("AAPL{=1m}", minute(n), 0).into()
}

/// Streams a fixed prefix of history once a symbol is added, then goes quiet
/// with the channel still open
#[derive(Default)]
struct StallingTransport {
    prefix: Vec<MarketEvent>,
    notices: Mutex<Option<ConnectionSink>>,
    sinks: Mutex<Vec<EventSink>>,
}

impl StallingTransport {
    fn disconnect_now(&self) {
        if let Some(notices) = self.notices.lock().unwrap().as_ref() {
            notices.notify(ConnectionNotice::Disconnected).unwrap();
        }
    }
}

impl Transport for StallingTransport {
    fn connect(&self, _address: &str, notices: ConnectionSink) -> market_feed::Result<ConnectionHandle> {
        *self.notices.lock().unwrap() = Some(notices);
        Ok(ConnectionHandle(1))
    }

    fn disconnect(&self, _connection: ConnectionHandle) {}

    fn open_channel(
        &self,
        _connection: ConnectionHandle,
        _kinds: &[EventKind],
        _from_time: Option<u64>,
        sink: EventSink,
    ) -> market_feed::Result<ChannelHandle> {
        self.sinks.lock().unwrap().push(sink);
        Ok(ChannelHandle(1))
    }

    fn add_symbols(&self, _channel: ChannelHandle, _symbols: &[String]) -> market_feed::Result<()> {
        if let Some(sink) = self.sinks.lock().unwrap().last() {
            for event in &self.prefix {
                sink.try_send(event.clone())?;
            }
        }
        Ok(())
    }

    fn remove_symbols(&self, _channel: ChannelHandle, _symbols: &[String]) -> market_feed::Result<()> {
        Ok(())
    }

    fn set_symbols(&self, _channel: ChannelHandle, _symbols: &[String]) -> market_feed::Result<()> {
        Ok(())
    }

    fn clear_symbols(&self, _channel: ChannelHandle) -> market_feed::Result<()> {
        Ok(())
    }

    fn close_channel(&self, _channel: ChannelHandle) {
        self.sinks.lock().unwrap().clear();
    }
}

fn stalling(prefix: Vec<MarketEvent>) -> Arc<StallingTransport> {
    Arc::new(StallingTransport {
        prefix,
        ..Default::default()
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_snapshot_within_window() {
    let transport = Arc::new(InMemoryTransport::new());
    transport.extend_history((0..60).map(candle));
    let session = Session::connect(transport.clone(), "demo:7300", &Config::default()).unwrap();

    let candles = session
        .time_series::<Candle>("AAPL{=1m}", minute(10), minute(20), Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();

    let times: Vec<u64> = candles.iter().map(|c| c.time).collect();
    let expected: Vec<u64> = (10..=20).rev().map(minute).collect();
    assert_eq!(times, expected);
    assert!(candles.iter().all(|c| c.flags.is_empty()));

    session.close().await;
    assert_eq!(transport.disconnects(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_snapshot_with_history_exhausted_above_from() {
    let transport = Arc::new(InMemoryTransport::new());
    transport.extend_history((30..40).map(candle));
    let session = Session::connect(transport.clone(), "demo:7300", &Config::default()).unwrap();

    let candles = session
        .time_series::<Candle>("AAPL{=1m}", minute(0), minute(35), Duration::ZERO)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(candles.len(), 6);
    assert_eq!(candles.first().map(|c| c.time), Some(minute(35)));
    assert_eq!(candles.last().map(|c| c.time), Some(minute(30)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_snapshot_for_unknown_symbol_is_empty() {
    let transport = Arc::new(InMemoryTransport::new());
    let session = Session::connect(transport.clone(), "demo:7300", &Config::default()).unwrap();

    let prints = session
        .time_series::<TimeAndSale>("IBM", minute(0), minute(10), Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    assert!(prints.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removed_history_entry_is_skipped() {
    let transport = Arc::new(InMemoryTransport::new());
    transport.extend_history((0..10).map(candle));
    let mut removed = Candle::new("AAPL{=1m}", minute(5), 0);
    removed.flags = EventFlags::REMOVE_EVENT;
    transport.add_history(removed.into());

    let session = Session::connect(transport.clone(), "demo:7300", &Config::default()).unwrap();
    let candles = session
        .time_series::<Candle>("AAPL{=1m}", minute(2), minute(8), Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();

    let times: Vec<u64> = candles.iter().map(|c| c.time).collect();
    assert_eq!(
        times,
        vec![minute(8), minute(7), minute(6), minute(4), minute(3), minute(2)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_returns_partial_result() {
    let transport = stalling(vec![candle(9), candle(8)]);
    let session = Session::connect(transport.clone(), "demo:7300", &Config::default()).unwrap();

    let candles = session
        .time_series::<Candle>("AAPL{=1m}", minute(0), minute(10), Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();

    let times: Vec<u64> = candles.iter().map(|c| c.time).collect();
    assert_eq!(times, vec![minute(9), minute(8)]);
    assert!(transport.sinks.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_interrupts_request() {
    let transport = stalling(vec![candle(9)]);
    let session = Session::connect(transport.clone(), "demo:7300", &Config::default()).unwrap();

    let request = session.time_series::<Candle>("AAPL{=1m}", minute(0), minute(10), Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(100)).await;
    transport.disconnect_now();

    let candles = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("request should finish after disconnect")
        .unwrap()
        .unwrap();
    assert_eq!(candles.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_after_disconnect_resolves() {
    let transport = stalling(vec![candle(9)]);
    let session = Session::connect(transport.clone(), "demo:7300", &Config::default()).unwrap();

    transport.disconnect_now();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !session.is_disconnected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("disconnect notice should be handled");

    let request = session.time_series::<Candle>("AAPL{=1m}", minute(0), minute(10), Duration::ZERO);
    let candles = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("request should finish on a lost connection")
        .unwrap()
        .unwrap();
    assert!(candles.len() <= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_close_interrupts_request() {
    let transport = stalling(Vec::new());
    let session = Session::connect(transport.clone(), "demo:7300", &Config::default()).unwrap();

    let request = session.time_series::<Candle>("AAPL{=1m}", minute(0), minute(10), Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.close().await;

    let candles = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("request should finish after close")
        .unwrap()
        .unwrap();
    assert!(candles.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unavailable_transport_fails_request() {
    let transport = Arc::new(InMemoryTransport::new());
    let session = Session::connect(transport.clone(), "demo:7300", &Config::default()).unwrap();
    transport.set_available(false);

    let result = session
        .time_series::<Candle>("AAPL{=1m}", minute(0), minute(10), Duration::ZERO)
        .await
        .unwrap();
    assert!(matches!(result, Err(FeedError::TransportUnavailable(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_after_close_fails() {
    let transport = Arc::new(InMemoryTransport::new());
    let session = Session::connect(transport.clone(), "demo:7300", &Config::default()).unwrap();
    session.close().await;

    let result = session
        .time_series::<Candle>("AAPL{=1m}", minute(0), minute(10), Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(result, Err(FeedError::SessionClosed));
}
