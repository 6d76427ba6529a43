//! End-to-end tests against a fake Pi-hole telnet API on a local socket

use async_trait::async_trait;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use pihole_notifier::build_supervisor;
use pihole_notifier::config::AppConfig;
use pihole_notifier::monitoring::{
    ApplianceAddress, ConnectionManager, KeywordSet, Notifier, PollSupervisor, PollTimings,
    QueryExtractor, RetryPolicy, SessionOutcome, TcpConnector,
};
use pihole_notifier::utils::error::DeliveryError;

/// Notifier that keeps every message it is asked to send
#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<(), DeliveryError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct FakeAppliance {
    addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
}

/// Serve `first` for the first request overall and `rest` afterwards.
/// With `replies_per_connection` set, the socket is dropped after that many replies.
async fn spawn_appliance(
    first: Vec<String>,
    rest: Vec<String>,
    replies_per_connection: Option<usize>,
) -> FakeAppliance {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepts = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(AtomicUsize::new(0));

    let accept_count = accepts.clone();
    let request_count = requests.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            accept_count.fetch_add(1, Ordering::SeqCst);
            let request_count = request_count.clone();
            let first = first.clone();
            let rest = rest.clone();

            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut lines = BufReader::new(reader).lines();
                let mut served = 0usize;

                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.starts_with(">getallqueries") {
                        continue;
                    }
                    let body = if request_count.fetch_add(1, Ordering::SeqCst) == 0 {
                        &first
                    } else {
                        &rest
                    };

                    let mut payload = String::new();
                    for record in body {
                        payload.push_str(record);
                        payload.push('\n');
                    }
                    payload.push_str("---EOM---\n");
                    if writer.write_all(payload.as_bytes()).await.is_err() {
                        return;
                    }

                    served += 1;
                    if Some(served) == replies_per_connection {
                        return;
                    }
                }
            });
        }
    });

    FakeAppliance {
        addr,
        accepts,
        requests,
    }
}

fn record_line(age_secs: i64, domain: &str) -> String {
    format!("{} A {} 192.168.1.20 2", Utc::now().timestamp() - age_secs, domain)
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}

fn supervisor_for(appliance: &FakeAppliance, notifier: Arc<RecordingNotifier>) -> PollSupervisor {
    let connections = ConnectionManager::new(
        Arc::new(TcpConnector),
        RetryPolicy {
            max_attempts: 2,
            retry_delay: Duration::from_millis(20),
            attempt_timeout: Duration::from_secs(2),
        },
    );
    PollSupervisor::new(
        ApplianceAddress::new("127.0.0.1", appliance.addr.port()),
        connections,
        QueryExtractor::new(5000, Duration::from_secs(2), chrono_tz::Asia::Singapore),
        KeywordSet::new(["instagram"]),
        notifier,
    )
    .with_timings(PollTimings {
        poll_interval: Duration::from_millis(50),
        cooldown: Duration::from_millis(50),
    })
}

#[tokio::test]
async fn should_notify_matching_recent_queries_and_keep_session_open() {
    // Arrange: two recent matches and one stale match, then a quiet log
    let appliance = spawn_appliance(
        vec![
            record_line(30, "i.instagram.com"),
            record_line(900, "stale.instagram.com"),
            record_line(60, "graph.instagram.com"),
        ],
        vec![record_line(5, "example.com")],
        None,
    )
    .await;
    let notifier = Arc::new(RecordingNotifier::default());
    let supervisor = supervisor_for(&appliance, notifier.clone());
    let shutdown = CancellationToken::new();

    // Act
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { supervisor.run(shutdown).await }
    });
    let requests = appliance.requests.clone();
    wait_until(|| requests.load(Ordering::SeqCst) >= 3).await;
    shutdown.cancel();
    tokio_test::assert_ok!(handle.await);

    // Assert
    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Recent Pi-hole Queries (last 5 minutes):\n\n"));
    assert_eq!(messages[0].matches("Domain: ").count(), 2);
    assert!(messages[0].contains("Domain: i.instagram.com, Client: 192.168.1.20, Status: 2"));
    assert!(messages[0].contains("Domain: graph.instagram.com"));
    assert!(!messages[0].contains("stale.instagram.com"));
    assert_eq!(appliance.accepts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn should_reconnect_after_appliance_drops_the_session() {
    // Arrange: every connection serves one reply and is then closed
    let appliance = spawn_appliance(
        vec![record_line(10, "instagram.com")],
        Vec::new(),
        Some(1),
    )
    .await;
    let notifier = Arc::new(RecordingNotifier::default());
    let supervisor = supervisor_for(&appliance, notifier.clone());
    let shutdown = CancellationToken::new();

    // Act
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { supervisor.run(shutdown).await }
    });
    let accepts = appliance.accepts.clone();
    wait_until(|| accepts.load(Ordering::SeqCst) >= 3).await;
    shutdown.cancel();
    tokio_test::assert_ok!(handle.await);

    // Assert: only the very first reply had a match
    assert_eq!(notifier.messages().len(), 1);
    assert!(appliance.requests.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn should_end_session_as_broken_when_connection_closes() {
    // Arrange
    let appliance = spawn_appliance(Vec::new(), Vec::new(), Some(1)).await;
    let port = appliance.addr.port().to_string();
    let config = AppConfig::from_lookup(|key| match key {
        "PIHOLE_HOST" => Some("127.0.0.1".to_string()),
        "PIHOLE_PORT" => Some(port.clone()),
        "TELEGRAM_BOT_TOKEN" => Some("123:abc".to_string()),
        "TELEGRAM_CHAT_ID" => Some("-100200".to_string()),
        "POLL_INTERVAL_SECS" => Some("1".to_string()),
        "READ_TIMEOUT_SECS" => Some("2".to_string()),
        _ => None,
    })
    .unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let supervisor = build_supervisor(&config, notifier.clone());

    // Act
    let outcome = supervisor.run_session(&CancellationToken::new()).await;

    // Assert
    assert!(matches!(outcome, SessionOutcome::Broken(_)));
    assert_eq!(appliance.accepts.load(Ordering::SeqCst), 1);
    assert_eq!(appliance.requests.load(Ordering::SeqCst), 1);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn should_report_exhausted_when_nothing_listens() {
    // Arrange: bind then drop to get a closed local port
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let connections = ConnectionManager::new(
        Arc::new(TcpConnector),
        RetryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(1),
        },
    );

    // Act
    let result = connections.connect("127.0.0.1", port).await;

    // Assert
    match result {
        Err(err) => {
            assert_eq!(err.attempts, 3);
            assert_eq!(err.port, port);
        }
        Ok(_) => panic!("connect should fail when nothing listens"),
    }
}
