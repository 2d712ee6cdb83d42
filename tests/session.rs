//! Session Tests (madeavr)
//!
//! Drives an `Avr` against a stub receiver on 127.0.0.1:
//! - Initial capability and status queries
//! - Status change notifications
//! - Outbound command encoding and parameter validation
//! - Connection lifecycle

use madeavr::{Avr, AvrError, StatusValue};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

/// Number of lines sent on connect: the capability query plus one query per tracked code
const INITIAL_QUERIES: usize = 19;

/// Receiver side of a session
struct Stub {
    lines: mpsc::UnboundedReceiver<String>,
    write: OwnedWriteHalf,
}

impl Stub {
    async fn next_line(&mut self) -> String {
        timeout(WAIT, self.lines.recv())
            .await
            .expect("timed out waiting for a command")
            .expect("stub connection closed")
    }

    async fn skip_initial_queries(&mut self) {
        for _ in 0..INITIAL_QUERIES {
            self.next_line().await;
        }
    }

    async fn reply(&mut self, lines: &[&str]) {
        for line in lines {
            self.write.write_all(line.as_bytes()).await.unwrap();
            self.write.write_all(b"\r").await.unwrap();
        }
        self.write.flush().await.unwrap();
    }
}

async fn connect_stub() -> (Avr, Stub) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (avr, accepted) = tokio::join!(Avr::connect("Test", "127.0.0.1", port), listener.accept());
    let avr = avr.expect("connect should succeed");
    let (stream, _) = accepted.unwrap();

    let (read, write) = stream.into_split();
    let (tx, lines) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut read = BufReader::new(read);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match read.read_until(b'\r', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                    if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    (avr, Stub { lines, write })
}

/// Wait until a status label reaches the expected value
async fn wait_for(avr: &Avr, label: &str, expected: StatusValue) {
    timeout(WAIT, async {
        while avr.get(label) != Some(expected.clone()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never became {:?}", label, expected));
}

type Calls = Arc<Mutex<Vec<(String, StatusValue)>>>;

async fn wait_for_calls(calls: &Calls, count: usize) {
    timeout(WAIT, async {
        while calls.lock().unwrap().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("callback was not called");
}

// ============================================================================
// Connect
// ============================================================================

#[tokio::test]
async fn test_connect_queries_capabilities_then_status() {
    let (avr, mut stub) = connect_stub().await;

    assert_eq!(stub.next_line().await, "SSSOD ?");

    let mut queries = Vec::new();
    for _ in 1..INITIAL_QUERIES {
        queries.push(stub.next_line().await);
    }
    assert_eq!(queries.first().map(String::as_str), Some("PW?"));
    for expected in ["ZM?", "Z2?", "MU?", "MV?", "SI?", "MS?", "CV?", "PV?", "ECO?", "SD?"] {
        assert!(queries.iter().any(|q| q == expected), "missing {}", expected);
    }
    assert!(!queries.iter().any(|q| q.starts_with("SSSOD")));

    assert!(avr.is_alive());
    assert_eq!(avr.name(), "Test");
    assert_eq!(avr.host(), "127.0.0.1");
    avr.close();
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let result = Avr::connect("Gone", "127.0.0.1", port).await;
    assert!(matches!(result, Err(AvrError::Connect { .. })));
}

#[tokio::test]
async fn test_status_starts_unknown() {
    let (avr, _stub) = connect_stub().await;

    assert_eq!(avr.power(), None);
    assert_eq!(avr.volume(), None);
    assert_eq!(avr.get("Power"), Some(StatusValue::Unknown));
    assert_eq!(avr.get("No Such Label"), None);

    let json = avr.status_json().unwrap();
    assert!(json["Power"].is_null());
    avr.close();
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_repeated_status_notifies_once() {
    let (avr, mut stub) = connect_stub().await;
    let mut updates = avr.subscribe();

    stub.reply(&["PWON", "PWON", "PWON"]).await;

    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.label, "Power");
    assert_eq!(update.value, StatusValue::Text("On".to_string()));

    // Repeats of an unchanged value are silent
    assert!(timeout(Duration::from_millis(300), updates.recv()).await.is_err());

    assert_eq!(avr.power().as_deref(), Some("On"));
    assert_eq!(avr.status_json().unwrap()["Power"], "On");
    avr.close();
}

#[tokio::test]
async fn test_every_subscriber_sees_changes() {
    let (avr, mut stub) = connect_stub().await;
    let mut first = avr.subscribe();
    let mut second = avr.subscribe();

    stub.reply(&["MV455"]).await;

    for updates in [&mut first, &mut second] {
        let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        assert_eq!(update.label, "Volume");
        assert_eq!(update.value, StatusValue::Level(45.5));
    }
    avr.close();
}

#[tokio::test]
async fn test_callback_is_replaced() {
    let (avr, mut stub) = connect_stub().await;
    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));

    let seen = first.clone();
    avr.notify_with(move |label, value| seen.lock().unwrap().push((label.to_string(), value.clone())));
    stub.reply(&["MUON"]).await;
    wait_for_calls(&first, 1).await;

    let seen = second.clone();
    avr.notify_with(move |label, value| seen.lock().unwrap().push((label.to_string(), value.clone())));
    stub.reply(&["MUOFF"]).await;
    wait_for_calls(&second, 1).await;

    assert_eq!(
        *first.lock().unwrap(),
        vec![("Muted".to_string(), StatusValue::Bool(true))]
    );
    assert_eq!(
        *second.lock().unwrap(),
        vec![("Muted".to_string(), StatusValue::Bool(false))]
    );
    avr.close();
}

#[tokio::test]
async fn test_channel_listing_is_one_update() {
    let (avr, mut stub) = connect_stub().await;
    let mut updates = avr.subscribe();

    stub.reply(&["CVFL 50", "CVFR 535", "CVC 45", "CVEND"]).await;

    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.label, "Channel Bias");
    let levels = update.value.as_channels().unwrap();
    assert_eq!(levels.len(), 3);
    assert_eq!(levels["Front Left"], 0.0);
    assert_eq!(levels["Front Right"], 3.5);
    assert_eq!(levels["Centre"], -5.0);

    assert_eq!(avr.channels_bias_list().len(), 3);
    avr.close();
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_power_and_mute_commands() {
    let (avr, mut stub) = connect_stub().await;
    stub.skip_initial_queries().await;

    avr.turn_on();
    assert_eq!(stub.next_line().await, "PWON");
    avr.turn_off();
    assert_eq!(stub.next_line().await, "PWSTANDBY");
    avr.mute_volume(true);
    assert_eq!(stub.next_line().await, "MUON");
    avr.set_zone_mute(madeavr::Zone::Zone2, false);
    assert_eq!(stub.next_line().await, "Z2MUOFF");
    avr.set_zone_power(madeavr::Zone::Zone3, true);
    assert_eq!(stub.next_line().await, "Z3ON");
    avr.close();
}

#[tokio::test]
async fn test_set_volume_encodes_half_steps() {
    let (avr, mut stub) = connect_stub().await;
    stub.skip_initial_queries().await;

    avr.set_volume(47.5);
    assert_eq!(stub.next_line().await, "MV475");
    avr.set_volume(40.0);
    assert_eq!(stub.next_line().await, "MV40");

    // Out of range is dropped without touching the wire
    avr.set_volume(120.0);
    avr.set_volume(-1.0);
    avr.volume_up();
    assert_eq!(stub.next_line().await, "MVUP");

    avr.set_zone_volume(madeavr::Zone::Zone2, 30.0);
    assert_eq!(stub.next_line().await, "Z230");
    avr.close();
}

#[tokio::test]
async fn test_reported_max_volume_limits_set_volume() {
    let (avr, mut stub) = connect_stub().await;
    stub.skip_initial_queries().await;

    stub.reply(&["MVMAX 80", "MV20"]).await;
    wait_for(&avr, "Volume", StatusValue::Level(20.0)).await;
    assert_eq!(avr.max_volume(), 80.0);

    avr.set_volume(85.0);
    avr.set_volume(80.0);
    assert_eq!(stub.next_line().await, "MV80");
    avr.close();
}

#[tokio::test]
async fn test_select_source_validates_against_available() {
    let (avr, mut stub) = connect_stub().await;
    stub.skip_initial_queries().await;

    avr.select_source("Nope");
    avr.select_source("Bluray");
    assert_eq!(stub.next_line().await, "SIBD");

    stub.reply(&["SSSODTV USE", "SSSODBD DEL", "SSSOD END", "SITV"]).await;
    wait_for(&avr, "Source", StatusValue::Text("TV".to_string())).await;
    assert_eq!(avr.source_list(), vec!["TV"]);

    // No longer in use on the unit
    avr.select_source("Bluray");
    avr.select_zone_source(madeavr::Zone::Zone2, "tv");
    assert_eq!(stub.next_line().await, "Z2TV");
    avr.close();
}

#[tokio::test]
async fn test_select_modes() {
    let (avr, mut stub) = connect_stub().await;
    stub.skip_initial_queries().await;

    avr.select_sound_mode("Not A Mode");
    avr.select_picture_mode("ISF Day");
    assert_eq!(stub.next_line().await, "PVDAY");

    avr.select_audio_input("Cassette");
    avr.select_audio_input("multi channel");
    assert_eq!(stub.next_line().await, "SD7.1IN");

    stub.reply(&["SDHDMI"]).await;
    wait_for(&avr, "Audio Input", StatusValue::Text("HDMI".to_string())).await;
    assert_eq!(avr.audio_input().as_deref(), Some("HDMI"));
    assert_eq!(avr.audio_input_list().len(), 6);
    avr.close();
}

#[tokio::test]
async fn test_channel_bias_commands() {
    let (avr, mut stub) = connect_stub().await;
    stub.skip_initial_queries().await;

    // Unknown until a listing arrives
    avr.set_channel_bias("Front Left", 2.0);

    stub.reply(&["CVFL 50", "CVC 62", "CVEND"]).await;
    timeout(WAIT, async {
        while avr.channels_bias().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Same level is a no-op, out of range is clamped
    avr.set_channel_bias("Front Left", 0.0);
    avr.set_channel_bias("front left", 20.0);
    assert_eq!(stub.next_line().await, "CVFL 62");

    // Centre is already at the top
    avr.channel_bias_up("Centre");
    avr.channel_bias_down("FL");
    assert_eq!(stub.next_line().await, "CVFL DOWN");

    avr.set_channel_bias("Surround Back", 1.0);
    avr.channels_bias_reset();
    assert_eq!(stub.next_line().await, "CVZRL");
    avr.close();
}

#[tokio::test]
async fn test_non_finite_levels_are_not_sent() {
    let (avr, mut stub) = connect_stub().await;
    stub.skip_initial_queries().await;

    stub.reply(&["CVFL 50", "CVEND"]).await;
    timeout(WAIT, async {
        while avr.channels_bias().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    avr.set_channel_bias("Front Left", f64::NAN);
    avr.set_channel_bias("Front Left", f64::INFINITY);
    avr.set_channel_bias("Front Left", f64::NEG_INFINITY);
    avr.set_volume(f64::NAN);
    assert!(
        timeout(Duration::from_millis(200), stub.lines.recv()).await.is_err(),
        "nothing should reach the receiver"
    );

    avr.set_volume(9.5);
    assert_eq!(stub.next_line().await, "MV095");
    avr.close();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_peer_close_marks_session_dead() {
    let (avr, stub) = connect_stub().await;
    assert!(avr.is_alive());
    let mut updates = avr.subscribe();

    drop(stub);

    let ended = timeout(WAIT, updates.recv())
        .await
        .expect("subscriber should hear the session end");
    assert!(matches!(ended, Err(AvrError::ConnectionClosed)));

    timeout(WAIT, async {
        while avr.is_alive() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session should notice the peer closing");

    // Commands on a dead session are dropped quietly
    avr.turn_on();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (avr, mut stub) = connect_stub().await;
    stub.skip_initial_queries().await;
    let mut updates = avr.subscribe();

    avr.close();
    assert!(matches!(updates.recv().await, Err(AvrError::ConnectionClosed)));
    assert!(matches!(avr.subscribe().recv().await, Err(AvrError::ConnectionClosed)));

    assert!(!avr.is_alive());
    avr.close();
    assert!(!avr.is_alive());

    avr.turn_on();
    assert!(timeout(Duration::from_millis(200), stub.lines.recv())
        .await
        .map_or(true, |line| line.is_none()));
}
