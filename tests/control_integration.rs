//! End-to-end control plane tests over real sockets

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use omnicast::config::Config;
use omnicast::control::{
    ControlServer, Dispatcher, PushedEvent, Request, RequestPayload, Response, ResponseCode,
    ResponsePayload, StartStreamPayload, StreamRequest, StreamRequestInfo,
};
use omnicast::types::StreamDestination;

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_control_plane() -> (String, String, CancellationToken) {
    let driver = Arc::new(omnicast::http::HttpDriver::start(4).unwrap());
    let dispatcher = Dispatcher::new(driver, Config::default());
    tokio::spawn(Arc::clone(&dispatcher).run_reaper());

    let request_addr = format!("127.0.0.1:{}", free_port().await);
    let publish_addr = format!("127.0.0.1:{}", free_port().await);
    let shutdown = CancellationToken::new();
    let server = ControlServer::new(dispatcher, shutdown.clone());
    {
        let request_addr = request_addr.clone();
        let publish_addr = publish_addr.clone();
        tokio::spawn(async move { server.run(&request_addr, &publish_addr).await });
    }
    // Give the listeners a beat to bind.
    tokio::time::sleep(Duration::from_millis(100)).await;
    (request_addr, publish_addr, shutdown)
}

async fn roundtrip(framed: &mut Framed<TcpStream, LengthDelimitedCodec>, request: &Request) -> Response {
    let encoded = serde_json::to_vec(request).unwrap();
    framed.send(encoded.into()).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("response expected")
        .unwrap()
        .unwrap();
    serde_json::from_slice(&frame).unwrap()
}

fn request(stream_id: &str, payload: RequestPayload) -> Request {
    Request {
        request_id: None,
        stream_request: StreamRequest {
            info: StreamRequestInfo {
                stream_id: stream_id.to_string(),
            },
            payload,
        },
    }
}

#[tokio::test]
async fn test_request_response_over_socket() {
    let (request_addr, _publish_addr, shutdown) = start_control_plane().await;

    let socket = TcpStream::connect(&request_addr).await.unwrap();
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());

    // Unknown stream comes back NOT_FOUND with a server-generated id.
    let response = roundtrip(&mut framed, &request("nope", RequestPayload::GetStream)).await;
    assert_eq!(response.code, ResponseCode::NotFound);
    assert_eq!(response.id.len(), 16);
    assert!(response.timestamp_ms > 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_start_stream_and_events_over_sockets() {
    let (request_addr, publish_addr, shutdown) = start_control_plane().await;

    // Subscribe before triggering state changes.
    let subscriber = TcpStream::connect(&publish_addr).await.unwrap();
    let mut events = Framed::new(subscriber, LengthDelimitedCodec::new());

    let socket = TcpStream::connect(&request_addr).await.unwrap();
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());

    let start = RequestPayload::StartStream(StartStreamPayload {
        stream_info: StreamDestination {
            ip: "127.0.0.1".to_string(),
            port: 46100,
            rtcp_port: 0,
            audio_ssrc: 0x1234,
            audio_pt: 111,
            bitrate: 96_000,
            rtcp_mux: true,
        },
        // An empty play list keeps the fetcher idle for the test.
        order_list: vec![],
    });
    let response = roundtrip(&mut framed, &request("s1", start)).await;
    assert_eq!(response.code, ResponseCode::Success, "{}", response.message);

    let response = roundtrip(&mut framed, &request("s1", RequestPayload::GetPlayList)).await;
    assert_eq!(response.code, ResponseCode::Success);
    assert!(matches!(
        response.payload,
        Some(ResponsePayload::PlayListResponse(ref playlist)) if playlist.order_list.is_empty()
    ));

    // A state-changing operation pushes an event with the routing identity.
    let set_volume = RequestPayload::UpdateStream(omnicast::control::UpdateAction::SetVolume {
        volume: 0.5,
    });
    let response = roundtrip(&mut framed, &request("s1", set_volume)).await;
    assert_eq!(response.code, ResponseCode::Success);

    let frame = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("a state event should be published")
        .unwrap()
        .unwrap();
    let pushed: PushedEvent = serde_json::from_slice(&frame).unwrap();
    assert_eq!(pushed.routing, "OMNI");
    assert_eq!(pushed.response.stream_id, "s1");

    // Stop the stream; eventually a removal event is published.
    let response = roundtrip(&mut framed, &request("s1", RequestPayload::RemoveStream)).await;
    assert_eq!(response.code, ResponseCode::Success);

    shutdown.cancel();
}

#[tokio::test]
async fn test_malformed_frame_gets_error_response() {
    let (request_addr, _publish_addr, shutdown) = start_control_plane().await;

    let socket = TcpStream::connect(&request_addr).await.unwrap();
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
    framed.send(bytes::Bytes::from_static(b"not json")).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("an error response is expected")
        .unwrap()
        .unwrap();
    let response: Response = serde_json::from_slice(&frame).unwrap();
    assert_eq!(response.code, ResponseCode::Error);
    assert!(response.message.contains("malformed"));

    shutdown.cancel();
}
