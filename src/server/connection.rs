//! HTTP connection handling
//!
//! Accepts TCP connections and serves each one with hyper on its own task.
//!
//! Every socket carries a write timeout. A client that stops reading fills
//! its TCP window and leaves hyper stuck in a write; once a write has made
//! no progress for `write_timeout` the connection is torn down, which drops
//! the response body and with it the subscriber.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::{Extension, Router};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_io_timeout::TimeoutStream;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept and serve connections until `stop` turns true
///
/// On stop, the listener is closed and every open connection is asked to
/// shut down gracefully; this returns once all of them have finished.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    write_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stop.wait_for(|stop| *stop) => break,
        };

        match accepted {
            Ok((socket, peer)) => {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!(peer = %peer, error = %e, "Failed to configure socket");
                }
                connections.spawn(serve_connection(
                    socket,
                    peer,
                    app.clone(),
                    write_timeout,
                    stop.clone(),
                ));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }

        // Reap finished connection tasks
        while connections.try_join_next().is_some() {}
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    socket: TcpStream,
    peer: SocketAddr,
    app: Router,
    write_timeout: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut stream = TimeoutStream::new(socket);
    stream.set_write_timeout(Some(write_timeout));
    let io = TokioIo::new(Box::pin(stream));

    let service = TowerToHyperService::new(app.layer(Extension(ConnectInfo(peer))));
    let connection = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(connection);

    let mut stopping = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(peer = %peer, error = %e, "Connection closed with error");
                }
                break;
            }
            _ = stop.wait_for(|stop| *stop), if !stopping => {
                stopping = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn start(
        app: Router,
    ) -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(serve(listener, app, Duration::from_secs(1), stop_rx));
        (addr, stop_tx, task)
    }

    #[tokio::test]
    async fn test_serves_requests_with_peer_address() {
        let app = Router::new().route(
            "/peer",
            get(|ConnectInfo(peer): ConnectInfo<SocketAddr>| async move {
                peer.ip().to_string()
            }),
        );
        let (addr, stop_tx, task) = start(app).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /peer HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("127.0.0.1"));

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_idle_keep_alive_connections() {
        let app = Router::new().route("/", get(|| async { "hi" }));
        let (addr, stop_tx, task) = start(app).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 256];
        let read = client.read(&mut buf).await.unwrap();
        assert!(read > 0);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        let rest = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(rest, 0);
    }
}
