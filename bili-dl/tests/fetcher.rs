use bili_dl::error::{FetchError, TransferError};
use bili_dl::fetcher::{Fetcher, ProgressCallback, TransferEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(attempts: usize) -> Fetcher {
    Fetcher::new(reqwest::Client::new())
        .with_retry_attempts(attempts)
        .with_retry_delay(Duration::from_millis(10))
}

fn entries(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

/// A bare HTTP server declaring the full length of `body` on every response,
/// whose first `truncated` connections close halfway through the body.
async fn truncating_server(body: &'static [u8], truncated: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let served = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&served);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let connection = counter.fetch_add(1, Ordering::SeqCst);

            let mut request = vec![0u8; 4096];
            let mut read = 0;
            while !request[..read].windows(4).any(|window| window == b"\r\n\r\n") {
                match socket.read(&mut request[read..]).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => read += n,
                }
            }

            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let sent = if connection < truncated {
                &body[..body.len() / 2]
            } else {
                body
            };

            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(sent).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{}/stream.m4s", address), served)
}

#[tokio::test]
async fn short_body_is_retried_without_leftovers() {
    let (url, served) = truncating_server(b"0123456789abcdef", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("BV1_1_video.m4s");

    fetcher(3).fetch(&url, &destination).await.unwrap();

    assert_eq!(served.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read(&destination).unwrap(), b"0123456789abcdef");
    assert_eq!(entries(dir.path()), vec!["BV1_1_video.m4s".to_string()]);
}

#[tokio::test]
async fn short_body_on_every_attempt_exhausts() {
    let (url, served) = truncating_server(b"0123456789abcdef", usize::MAX).await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("BV1_1_audio.m4s");

    let FetchError::Exhausted { attempts, last } =
        fetcher(2).fetch(&url, &destination).await.unwrap_err();

    assert_eq!(attempts, 2);
    assert_eq!(served.load(Ordering::SeqCst), 2);
    // The HTTP stack may notice the short body before the length check does.
    assert!(matches!(
        last,
        TransferError::Incomplete {
            expected: 16,
            received: 8
        } | TransferError::Reqwest(_)
    ));
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn succeeds_on_third_attempt_without_leftovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream.m4s"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stream.m4s"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"stream-bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("BV1_1_video.m4s");

    fetcher(3)
        .fetch(&format!("{}/stream.m4s", server.uri()), &destination)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&destination).unwrap(), b"stream-bytes");
    assert_eq!(entries(dir.path()), vec!["BV1_1_video.m4s".to_string()]);
}

#[tokio::test]
async fn exhaustion_leaves_nothing_at_destination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream.m4s"))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("BV1_1_audio.m4s");
    // A stale file from an interrupted run.
    std::fs::write(&destination, b"stale").unwrap();

    let error = fetcher(3)
        .fetch(&format!("{}/stream.m4s", server.uri()), &destination)
        .await
        .unwrap_err();

    let FetchError::Exhausted { attempts, last } = error;
    assert_eq!(attempts, 3);
    assert!(matches!(last, TransferError::Status(status) if status.as_u16() == 404));
    assert!(!destination.exists());
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn creates_missing_directories() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("temp").join("nested").join("a.m4s");

    fetcher(1)
        .fetch(&format!("{}/a.m4s", server.uri()), &destination)
        .await
        .unwrap();

    assert!(destination.is_file());
}

#[tokio::test]
async fn reports_progress_events() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&server)
        .await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let fetcher = fetcher(1).with_progress_callback(move |event: TransferEvent<'_>| {
        let summary = match event {
            TransferEvent::Started { total, .. } => format!("started {total}"),
            TransferEvent::Advanced { downloaded, .. } => format!("advanced {downloaded}"),
            TransferEvent::Finished { name } => format!("finished {name}"),
            TransferEvent::Abandoned { name } => format!("abandoned {name}"),
        };
        sink.lock().unwrap().push(summary);
    });

    let dir = tempfile::tempdir().unwrap();
    fetcher
        .fetch(&format!("{}/v.m4s", server.uri()), dir.path().join("v.m4s"))
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.first().map(String::as_str), Some("started 4096"));
    assert_eq!(events.last().map(String::as_str), Some("finished v.m4s"));
    assert!(events.iter().any(|event| event == "advanced 4096"));
}

#[tokio::test]
async fn abandoned_event_after_last_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let abandoned = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&abandoned);
    let fetcher = fetcher(2).with_progress_callback(move |event: TransferEvent<'_>| {
        if let TransferEvent::Abandoned { name } = event {
            sink.lock().unwrap().push(name.to_string());
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let result = fetcher
        .fetch(&format!("{}/a.m4s", server.uri()), dir.path().join("a.m4s"))
        .await;

    assert!(result.is_err());
    assert_eq!(*abandoned.lock().unwrap(), vec!["a.m4s".to_string()]);
}

#[tokio::test]
async fn shared_progress_callback_receives_events() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
        .mount(&server)
        .await;

    let finished = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&finished);
    let callback: ProgressCallback = Arc::new(move |event: TransferEvent<'_>| {
        if let TransferEvent::Finished { name } = event {
            sink.lock().unwrap().push(name.to_string());
        }
    });

    let fetcher = fetcher(1).with_progress(Arc::clone(&callback));
    let dir = tempfile::tempdir().unwrap();
    fetcher
        .fetch(&format!("{}/v.m4s", server.uri()), dir.path().join("v.m4s"))
        .await
        .unwrap();

    assert_eq!(*finished.lock().unwrap(), vec!["v.m4s".to_string()]);
    // The fetcher holds the same callback, not a wrapper around it.
    assert_eq!(Arc::strong_count(&callback), 2);
}
