use bytes::Bytes;
use futures_util::StreamExt;
use httpmock::{Method::POST, MockServer};
use tutor_gateway::utils::sse::{SseLimits, sse_event_stream_from_response};
use tutor_gateway::utils::test_support::{should_skip_httpmock, upstream_sse_body};
use tutor_gateway::{ChatMessage, StreamPayload, TokenExtractor, TutorError, UpstreamClient};

fn payload() -> StreamPayload {
    StreamPayload::new(
        "test/model",
        vec![
            ChatMessage::system("You are a tutor."),
            ChatMessage::user("What is a cell?"),
        ],
    )
}

#[tokio::test]
async fn upstream_stream_decodes_and_normalizes() -> tutor_gateway::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }

    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer sk-test")
                .header("content-type", "application/json")
                .body_includes(r#""model":"test/model""#)
                .body_includes(r#""role":"system""#)
                .body_includes(r#""stream":true"#);
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(upstream_sse_body(&["\n", "A cell", " is", " tiny."]));
        })
        .await;

    let client = UpstreamClient::new(Some("sk-test".to_string()))?
        .with_api_base_url(format!("{}/v1/", server.base_url()));
    let response = client.stream_chat(&payload()).await?;

    let events = sse_event_stream_from_response(response, SseLimits::default());
    let frames: Vec<Bytes> = tutor_gateway::normalize_stream(events, TokenExtractor::new())
        .map(|frame| frame.expect("frame"))
        .collect()
        .await;

    assert_eq!(
        frames,
        vec![
            Bytes::from("data: {\"text\":\"A cell\"}\n\n"),
            Bytes::from("data: {\"text\":\" is\"}\n\n"),
            Bytes::from("data: {\"text\":\" tiny.\"}\n\n"),
        ]
    );
    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn upstream_stream_ignores_events_after_done() -> tutor_gateway::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).body(concat!(
                ": keep-alive\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n\n",
                "data: [DONE]\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"two\"}}]}\n\n",
            ));
        })
        .await;

    let client =
        UpstreamClient::new(Some("sk-test".to_string()))?.with_api_base_url(server.base_url());
    let response = client.stream_chat(&payload()).await?;
    let events = sse_event_stream_from_response(response, SseLimits::default());
    let frames: Vec<Bytes> = tutor_gateway::normalize_stream(events, TokenExtractor::new())
        .map(|frame| frame.expect("frame"))
        .collect()
        .await;

    assert_eq!(frames, vec![Bytes::from("data: {\"text\":\"one\"}\n\n")]);
    Ok(())
}

#[tokio::test]
async fn upstream_error_status_is_classified() -> tutor_gateway::Result<()> {
    if should_skip_httpmock() {
        return Ok(());
    }

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401).body(r#"{"error":"bad key"}"#);
        })
        .await;

    let client =
        UpstreamClient::new(Some("sk-wrong".to_string()))?.with_api_base_url(server.base_url());
    let err = client.stream_chat(&payload()).await.unwrap_err();
    match err {
        TutorError::Authentication { status, body } => {
            assert_eq!(status.as_u16(), 401);
            assert!(body.contains("bad key"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn oversized_error_body_does_not_stall_the_client() -> tutor_gateway::Result<()> {
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    if should_skip_httpmock() {
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    let upstream = tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = [0u8; 8192];
        let _ = socket.read(&mut request).await;
        let _ = socket
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100000000\r\n\r\n")
            .await;
        let _ = socket.write_all(&vec![b'e'; 128 * 1024]).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let client = UpstreamClient::new(Some("sk-test".to_string()))?
        .with_api_base_url(format!("http://{addr}/v1"));
    let err = tokio::time::timeout(Duration::from_secs(5), client.stream_chat(&payload()))
        .await
        .expect("error body read is capped")
        .unwrap_err();

    match err {
        TutorError::Api { status, body } => {
            assert_eq!(status.as_u16(), 500);
            assert!(body.len() <= 64 * 1024 + "\n...(truncated)".len());
            assert!(body.ends_with("...(truncated)"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    upstream.abort();
    Ok(())
}
