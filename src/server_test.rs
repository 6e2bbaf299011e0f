use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use cast_bus::{AudioSource, CastError, PassthroughEncoderFactory};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{CastServer, ServerOptions};

type Feed = mpsc::Sender<std::io::Result<Bytes>>;

fn test_server(public_host: Option<&str>) -> CastServer {
    let options = ServerOptions {
        name: "Test FM".to_string(),
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        public_host: public_host.map(str::to_string),
    };
    CastServer::new(options, Arc::new(PassthroughEncoderFactory))
}

async fn attach_feed(server: &CastServer) -> anyhow::Result<Feed> {
    let (tx, rx) = mpsc::channel(64);
    server
        .set_input_stream(AudioSource::from_stream("test", ReceiverStream::new(rx)))
        .await?;
    Ok(tx)
}

async fn read_body(resp: &mut reqwest::Response, n: usize) -> anyhow::Result<Vec<u8>> {
    let mut body = Vec::new();
    while body.len() < n {
        match tokio::time::timeout(Duration::from_secs(5), resp.chunk()).await?? {
            Some(chunk) => body.extend_from_slice(&chunk),
            None => break,
        }
    }
    Ok(body)
}

async fn wait_for_listeners(server: &CastServer, n: usize) -> bool {
    for _ in 0..300 {
        if server.listener_count() == n {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_playlist_points_at_listen() -> anyhow::Result<()> {
    let server = test_server(Some("127.0.0.1"));
    let port = server.start(None).await?;
    assert_ne!(port, 0);

    for path in ["/", "/listen.m3u"] {
        let resp = reqwest::get(format!("http://127.0.0.1:{}{}", port, path)).await?;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "audio/x-mpegurl");
        assert_eq!(resp.text().await?, format!("http://127.0.0.1:{}/listen", port));
    }

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_playlist_uses_detected_address() -> anyhow::Result<()> {
    let server = test_server(None);
    let port = server.start(None).await?;

    let body = reqwest::get(format!("http://127.0.0.1:{}/listen.m3u", port))
        .await?
        .text()
        .await?;
    let expected = format!(
        "http://{}:{}/listen",
        crate::net::url_host(crate::net::local_address()),
        port
    );
    assert_eq!(body, expected);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_plain_listener_gets_raw_stream() -> anyhow::Result<()> {
    let server = test_server(Some("127.0.0.1"));
    let feed = attach_feed(&server).await?;
    server.set_metadata("Ignored");
    let port = server.start(None).await?;

    let mut resp = reqwest::get(format!("http://127.0.0.1:{}/listen", port)).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "audio/mpeg");
    assert!(resp.headers().get("icy-metaint").is_none());
    assert_eq!(server.listener_count(), 1);

    let mut expected = Vec::new();
    for i in 0..40u8 {
        let chunk = vec![i; 512];
        expected.extend_from_slice(&chunk);
        feed.send(Ok(Bytes::from(chunk))).await?;
    }
    assert_eq!(read_body(&mut resp, expected.len()).await?, expected);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_metadata_listener_gets_interleaved_title() -> anyhow::Result<()> {
    let server = test_server(Some("127.0.0.1"));
    let feed = attach_feed(&server).await?;
    server.set_metadata("A");
    let port = server.start(None).await?;

    let mut resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/listen", port))
        .header("icy-metadata", "1")
        .send()
        .await?;
    assert_eq!(resp.headers()["content-type"], "audio/mpeg");
    assert_eq!(resp.headers()["icy-metaint"], "8192");

    for _ in 0..2 {
        feed.send(Ok(Bytes::from(vec![0x42u8; 4096]))).await?;
    }
    let body = read_body(&mut resp, 8192 + 17).await?;
    assert_eq!(body.len(), 8192 + 17);
    assert!(body[..8192].iter().all(|b| *b == 0x42));
    assert_eq!(&body[8192..], b"\x01StreamTitle='A';");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_disconnect_releases_the_session() -> anyhow::Result<()> {
    let server = test_server(Some("127.0.0.1"));
    let feed = attach_feed(&server).await?;
    let port = server.start(None).await?;
    let url = format!("http://127.0.0.1:{}/listen", port);

    let first = reqwest::get(&url).await?;
    let mut second = reqwest::get(&url).await?;
    assert!(wait_for_listeners(&server, 2).await);

    drop(first);
    feed.send(Ok(Bytes::from_static(b"still here"))).await?;
    assert_eq!(read_body(&mut second, 10).await?, b"still here");

    // A dead socket is noticed on the next failed write.
    let mut released = false;
    for _ in 0..300 {
        feed.send(Ok(Bytes::from(vec![0u8; 1024]))).await?;
        if server.listener_count() == 1 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_stop_is_idempotent_and_restartable() -> anyhow::Result<()> {
    let server = test_server(Some("127.0.0.1"));
    let feed = attach_feed(&server).await?;
    let port = server.start(None).await?;
    assert!(matches!(
        server.start(None).await,
        Err(CastError::AlreadyRunning(p)) if p == port
    ));

    let mut resp = reqwest::get(format!("http://127.0.0.1:{}/listen", port)).await?;
    server.stop().await;
    server.stop().await;
    assert_eq!(server.port().await, None);
    assert!(wait_for_listeners(&server, 0).await);
    let tail = tokio::time::timeout(Duration::from_secs(5), resp.chunk()).await?;
    assert!(!matches!(tail, Ok(Some(_))));

    let port = server.start(None).await?;
    let mut resp = reqwest::get(format!("http://127.0.0.1:{}/listen", port)).await?;
    feed.send(Ok(Bytes::from_static(b"back"))).await?;
    assert_eq!(read_body(&mut resp, 4).await?, b"back");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_start_fails_on_taken_port() -> anyhow::Result<()> {
    let taken = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = taken.local_addr()?.port();

    let server = test_server(None);
    let err = server.start(Some(port)).await.unwrap_err();
    assert!(matches!(err, CastError::ServerStart { .. }));
    assert_eq!(server.port().await, None);
    Ok(())
}
