use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};

use crate::http::*;

/// One-shot HTTP server answering every connection with the given response
async fn serve_response(response: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let response = response.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(&response).await;
            });
        }
    });
    format!("http://{addr}")
}

fn collecting_request(
    url: String,
    outcome_tx: mpsc::UnboundedSender<TransferOutcome>,
    body: Arc<Mutex<Vec<u8>>>,
) -> TransferRequest {
    TransferRequest {
        url,
        headers: vec![("InstanceId".to_string(), "test".to_string())],
        rate_cap: None,
        low_speed: None,
        resume: Arc::new(Notify::new()),
        sink: Box::new(move |bytes| {
            body.lock().unwrap().extend_from_slice(bytes);
            SinkFlow::Continue
        }),
        on_complete: Box::new(move |outcome| {
            let _ = outcome_tx.send(outcome);
        }),
    }
}

#[tokio::test]
async fn test_transfer_delivers_body_in_order() {
    let payload = b"abcdefghij0123456789".to_vec();
    let response = [
        format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", payload.len()).into_bytes(),
        payload.clone(),
    ]
    .concat();
    let url = serve_response(response).await;

    let driver = HttpDriver::start(4).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let body = Arc::new(Mutex::new(Vec::new()));
    driver.add(collecting_request(url, tx, body.clone()));

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.code, TransferCode::Ok);
    assert_eq!(outcome.content_length, Some(20));
    assert_eq!(*body.lock().unwrap(), b"abcdefghij0123456789");
    driver.stop();
}

#[tokio::test]
async fn test_non_2xx_reports_status() {
    let url = serve_response(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec()).await;

    let driver = HttpDriver::start(4).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let body = Arc::new(Mutex::new(Vec::new()));
    driver.add(collecting_request(url, tx, body.clone()));

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.code, TransferCode::HttpStatus(404));
    assert!(body.lock().unwrap().is_empty());
    driver.stop();
}

#[tokio::test]
async fn test_cancel_fires_exactly_once_with_cancelled() {
    // A server that never answers keeps the transfer pending.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _held = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let driver = HttpDriver::start(4).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let body = Arc::new(Mutex::new(Vec::new()));
    let handle = driver.add(collecting_request(format!("http://{addr}"), tx, body));

    tokio::time::sleep(Duration::from_millis(100)).await;
    driver.cancel(handle);

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.code, TransferCode::Cancelled);
    // Exactly once: nothing further arrives.
    assert!(rx.try_recv().is_err());
    driver.stop();
}

#[tokio::test]
async fn test_stop_aborts_pending_and_joins() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _held = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let driver = HttpDriver::start(4).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let body = Arc::new(Mutex::new(Vec::new()));
    driver.add(collecting_request(format!("http://{addr}"), tx, body));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let driver = tokio::task::spawn_blocking(move || {
        driver.stop();
        driver
    })
    .await
    .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.code, TransferCode::Aborted);
    // Second stop is a no-op.
    driver.stop();
}

#[tokio::test]
async fn test_pause_resumes_on_notify() {
    let payload = vec![7u8; 64 * 1024];
    let response = [
        format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", payload.len()).into_bytes(),
        payload,
    ]
    .concat();
    let url = serve_response(response).await;

    let driver = HttpDriver::start(4).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let resume = Arc::new(Notify::new());
    let received = Arc::new(Mutex::new(0usize));

    let sink_received = Arc::clone(&received);
    let mut paused_once = false;
    let request = TransferRequest {
        url,
        headers: Vec::new(),
        rate_cap: None,
        low_speed: None,
        resume: Arc::clone(&resume),
        sink: Box::new(move |bytes| {
            *sink_received.lock().unwrap() += bytes.len();
            if paused_once {
                SinkFlow::Continue
            } else {
                paused_once = true;
                SinkFlow::Pause
            }
        }),
        on_complete: Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }),
    };
    driver.add(request);

    // The first chunk pauses the transfer; nothing completes until resumed.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
    resume.notify_one();

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.code, TransferCode::Ok);
    assert_eq!(*received.lock().unwrap(), 64 * 1024);
    driver.stop();
}
