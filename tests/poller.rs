mod common;

use chain_watch::chain::StrikeRow;
use chain_watch::creds::Creds;
use chain_watch::error::ChainError;
use chain_watch::poller::{ChainFrame, ChainView, PollSettings, PollState, Poller, SLEEP_TICK};
use chain_watch::store::{Snapshot, SnapshotStore, read_latest};
use chain_watch::upstox::UpstoxClient;
use chrono::{Days, Local, NaiveDate};
use common::{MockApi, Route, dead_url};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio::time::sleep;

const CHAIN: &str = "/v2/option/chain";
const CONTRACTS: &str = "/v2/option/contract";

#[derive(Default)]
struct Recorder {
    frames: Vec<(NaiveDate, String, Vec<StrikeRow>)>,
    logs: Vec<String>,
}

impl ChainView for Recorder {
    fn render(&mut self, frame: ChainFrame<'_>) {
        self.frames.push((
            frame.expiry,
            frame.snapshot.timestamp_utc.clone(),
            frame.rows.to_vec(),
        ));
    }

    fn log(&mut self, entry: &str) {
        self.logs.push(entry.to_string());
    }
}

fn today_plus(days: u64) -> NaiveDate {
    Local::now().date_naive().checked_add_days(Days::new(days)).unwrap()
}

fn contracts_body() -> String {
    json!({"status": "success", "data": [
        {"expiry": today_plus(9).to_string(), "strike_price": 25000},
        {"expiry": today_plus(2).to_string(), "strike_price": 25000},
        {"expiry": "2020-01-02", "strike_price": 25000},
    ]})
    .to_string()
}

fn chain_body() -> String {
    json!({"status": "success", "data": [
        {"strike_price": 50100,
         "call_options": {"market_data": {"ltp": 70}},
         "put_options": {"market_data": {"ltp": 110}}},
        {"strike_price": 50000,
         "call_options": {"market_data": {"ltp": 100}},
         "put_options": {"market_data": {"ltp": 80}}},
    ]})
    .to_string()
}

fn poller(dir: &Path, base_url: &str, interval: Duration) -> Poller {
    let client = UpstoxClient::new(base_url, Creds::with_token("test-token")).unwrap();
    let store = SnapshotStore::new(dir.join("history.jsonl"), dir.join("latest.json"));
    let settings = PollSettings {
        instrument_key: "NSE_INDEX|Nifty 50".to_string(),
        interval,
    };
    Poller::new(client, store, settings)
}

fn history(dir: &Path) -> Vec<Snapshot> {
    fs::read_to_string(dir.join("history.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_fetch_once_resolves_persists_and_renders() {
    let api = MockApi::serve(vec![
        Route::new(CONTRACTS, 200, contracts_body()),
        Route::new(CHAIN, 200, chain_body()),
    ])
    .await;
    let dir = tempdir().unwrap();
    let mut poller = poller(dir.path(), &api.base_url, Duration::from_secs(10));
    let mut view = Recorder::default();

    let snapshot = poller.fetch_once(&mut view).await.unwrap();

    assert_eq!(poller.expiry(), Some(today_plus(2)));
    let expiry_param = format!("expiry_date={}", today_plus(2));
    assert!(api.requests().iter().any(|r| r.contains(&expiry_param)));

    let logged = history(dir.path());
    assert_eq!(logged, vec![snapshot.clone()]);
    assert_eq!(read_latest(&dir.path().join("latest.json")).unwrap(), Some(snapshot.clone()));

    assert_eq!(view.frames.len(), 1);
    let (expiry, timestamp, rows) = &view.frames[0];
    assert_eq!(*expiry, today_plus(2));
    assert_eq!(*timestamp, snapshot.timestamp_utc);
    let strikes: Vec<_> = rows.iter().map(|r| r.strike).collect();
    assert_eq!(strikes, vec![Some(50000.0), Some(50100.0)]);
    let straddles: Vec<_> = rows.iter().map(|r| r.straddle_price).collect();
    assert_eq!(straddles, vec![Some(180.0), Some(180.0)]);

    // expiry is cached for later cycles
    poller.fetch_once(&mut view).await.unwrap();
    assert_eq!(api.count(CONTRACTS), 1);
    assert_eq!(api.count(CHAIN), 2);
    assert_eq!(history(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_error_payload_is_persisted_and_renders_empty() {
    let api = MockApi::serve(vec![Route::new(CHAIN, 500, "Internal Server Error")]).await;
    let dir = tempdir().unwrap();
    let mut poller = poller(dir.path(), &api.base_url, Duration::from_secs(10))
        .with_expiry(Some(today_plus(1)));
    let mut view = Recorder::default();

    let snapshot = poller.fetch_once(&mut view).await.unwrap();

    assert_eq!(
        snapshot.snapshot,
        json!({"error": "Invalid JSON from chain endpoint (status 500)"})
    );
    assert_eq!(history(dir.path()), vec![snapshot]);
    assert!(view.frames[0].2.is_empty());
    assert_eq!(api.count(CONTRACTS), 0);
}

#[tokio::test]
async fn test_unresolvable_expiry_stops_loop() {
    let api = MockApi::serve(vec![Route::new(
        CONTRACTS,
        200,
        json!({"data": [{"expiry": "2020-01-02"}]}).to_string(),
    )])
    .await;
    let dir = tempdir().unwrap();
    let mut poller = poller(dir.path(), &api.base_url, Duration::from_secs(10));
    let mut view = Recorder::default();

    poller.start();
    let res = poller.run(&mut view).await;

    assert!(matches!(res, Err(ChainError::NoExpiry(_))));
    assert_eq!(poller.state(), PollState::Stopped);
    assert_eq!(api.count(CHAIN), 0);
    assert!(history(dir.path()).is_empty());
}

#[tokio::test]
async fn test_stop_mid_sleep_halts_promptly() {
    let api = MockApi::serve(vec![
        Route::new(CONTRACTS, 200, contracts_body()),
        Route::new(CHAIN, 200, chain_body()),
    ])
    .await;
    let dir = tempdir().unwrap();
    let mut poller = poller(dir.path(), &api.base_url, Duration::from_secs(30));
    let switch = poller.switch();
    let mut view = Recorder::default();

    poller.start();
    let stopped_at = async {
        sleep(Duration::from_millis(400)).await;
        switch.stop();
        Instant::now()
    };
    let (res, stopped_at) = tokio::join!(poller.run(&mut view), stopped_at);
    let lag = stopped_at.elapsed();

    res.unwrap();
    assert!(lag < SLEEP_TICK + Duration::from_millis(250), "stop took {lag:?}");
    assert_eq!(api.count(CHAIN), 1);
    assert_eq!(history(dir.path()).len(), 1);
    assert_eq!(poller.state(), PollState::Stopped);
    assert!(view.logs.last().unwrap().ends_with("Live mode OFF"));
}

#[tokio::test]
async fn test_transport_errors_are_transient() {
    let dir = tempdir().unwrap();
    let mut poller = poller(dir.path(), &dead_url().await, Duration::from_secs(2))
        .with_expiry(Some(today_plus(1)));
    let switch = poller.switch();
    let mut view = Recorder::default();

    poller.start();
    let stopper = async {
        sleep(Duration::from_millis(2500)).await;
        switch.stop();
    };
    let (res, ()) = tokio::join!(poller.run(&mut view), stopper);

    res.unwrap();
    let failures = view
        .logs
        .iter()
        .filter(|l| l.contains("Error during fetch/save"))
        .count();
    assert_eq!(failures, 2);
    assert!(view.frames.is_empty());
    assert!(history(dir.path()).is_empty());
}

#[tokio::test]
async fn test_persist_failures_keep_loop_running() {
    let api = MockApi::serve(vec![Route::new(CHAIN, 200, chain_body())]).await;
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("history.jsonl")).unwrap();
    let mut poller = poller(dir.path(), &api.base_url, Duration::from_secs(2))
        .with_expiry(Some(today_plus(1)));
    let switch = poller.switch();
    let mut view = Recorder::default();

    poller.start();
    let stopper = async {
        sleep(Duration::from_millis(2500)).await;
        switch.stop();
    };
    let (res, ()) = tokio::join!(poller.run(&mut view), stopper);

    res.unwrap();
    let failures: Vec<_> = view
        .logs
        .iter()
        .filter(|l| l.contains("Error during fetch/save"))
        .collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|l| l.contains("failed to persist snapshot")));
    assert_eq!(api.count(CHAIN), 2);
    assert!(view.frames.is_empty());
    assert!(!dir.path().join("latest.json").exists());
    assert!(view.logs.last().unwrap().ends_with("Live mode OFF"));
}
