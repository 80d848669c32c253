#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test crate uses a different subset of the helpers"
)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
enum Command {
    Text(String),
    Close,
    /// Drop the TCP stream without a closing handshake
    Drop,
}

/// Notification endpoint double: records handshake URIs and inbound text frames, and
/// pushes text or close frames to every connected client.
pub struct MockWsServer {
    addr: SocketAddr,
    commands: broadcast::Sender<Command>,
    /// Text frames received from clients
    inbound: mpsc::UnboundedReceiver<String>,
    /// Request URI of every accepted connection, sent once it can receive commands
    connections: mpsc::UnboundedReceiver<String>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (commands, _) = broadcast::channel::<Command>(100);
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (connections_tx, connections) = mpsc::unbounded_channel();

        let commands_tx = commands.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let uri = Arc::new(Mutex::new(String::new()));
                let seen = Arc::clone(&uri);
                let callback = move |request: &Request, response: Response| {
                    *seen.lock().unwrap() = request.uri().to_string();
                    Ok::<_, ErrorResponse>(response)
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let inbound_tx = inbound_tx.clone();
                let mut command_rx = commands_tx.subscribe();
                let uri = uri.lock().unwrap().clone();
                drop(connections_tx.send(uri));

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(inbound_tx.send(text.to_string()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(Command::Text(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Command::Close) => {
                                        let frame = CloseFrame {
                                            code: CloseCode::Normal,
                                            reason: "server restart".into(),
                                        };
                                        drop(write.send(Message::Close(Some(frame))).await);
                                        // Let the client answer before dropping the socket
                                        drop(timeout(Duration::from_secs(1), read.next()).await);
                                        break;
                                    }
                                    Ok(Command::Drop) | Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            commands,
            inbound,
            connections,
        }
    }

    /// Endpoint base to hand to the client, e.g. `ws://127.0.0.1:4312`.
    pub fn endpoint(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Send a text frame to every connected client.
    pub fn send(&self, text: &str) {
        drop(self.commands.send(Command::Text(text.to_owned())));
    }

    /// Close every connection with a normal closure.
    pub fn close_all(&self) {
        drop(self.commands.send(Command::Close));
    }

    /// Cut every connection without sending a close frame.
    pub fn drop_all(&self) {
        drop(self.commands.send(Command::Drop));
    }

    /// Next text frame sent by a client.
    pub async fn recv(&mut self) -> Option<String> {
        timeout(TIMEOUT, self.inbound.recv()).await.ok().flatten()
    }

    /// Request URI of the next accepted connection.
    pub async fn next_connection(&mut self) -> Option<String> {
        timeout(TIMEOUT, self.connections.recv()).await.ok().flatten()
    }

    /// Like [`MockWsServer::next_connection`], expecting nothing within `wait`.
    pub async fn no_connection_within(&mut self, wait: Duration) -> bool {
        timeout(wait, self.connections.recv()).await.is_err()
    }
}

/// An endpoint nobody listens on.
pub async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}")
}
