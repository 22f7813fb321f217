//! Shared test helpers: scripted localhost servers, tree invariant checks
//! and log capture.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing_subscriber::EnvFilter;

use crate::handshake::accept_key;
use crate::structure::StructuralTree;

// ============================================================================
// Logging
// ============================================================================

/// Routes crate logs to the test harness. `RUST_LOG` overrides the level.
pub(crate) fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ws_intercept=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Tree Invariants
// ============================================================================

/// Checks the index-path invariant for every node reachable from the root.
pub(crate) fn assert_index_paths(tree: &StructuralTree) {
    let mut pending = vec![tree.root()];
    while let Some(id) = pending.pop() {
        let node = tree.node(id).expect("attached node exists");
        for (position, child) in node.children().iter().enumerate() {
            let child_node = tree.node(*child).expect("child exists");
            let mut expected = node.index_path().to_vec();
            expected.push(position);
            assert_eq!(child_node.index_path(), expected.as_slice());
            assert_eq!(child_node.parent(), Some(id));
            pending.push(*child);
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

/// What the server does with one connection.
pub(crate) enum Reply {
    /// Writes the text verbatim, then idles until the peer leaves.
    Raw(String),
    /// Completes the upgrade, sends `frames`, then echoes data frames.
    Upgrade {
        extra_headers: Vec<(&'static str, &'static str)>,
        frames: Vec<Message>,
    },
}

impl Reply {
    /// Plain upgrade sending `frames` first.
    pub(crate) fn upgrade(frames: Vec<Message>) -> Self {
        Self::Upgrade {
            extra_headers: Vec::new(),
            frames,
        }
    }
}

/// `101` response head for `request`, with a correct accept key.
pub(crate) fn upgrade_head(request: &str) -> String {
    upgrade_head_with(request, &[])
}

fn upgrade_head_with(request: &str, extra_headers: &[(&str, &str)]) -> String {
    let key = request
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("Sec-WebSocket-Key")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_default();

    let mut head = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n",
        accept_key(&key)
    );
    for (name, value) in extra_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    head
}

// ============================================================================
// ScriptedServer
// ============================================================================

type Responder = dyn Fn(usize, &str, SocketAddr) -> Reply + Send + Sync;

/// Accepts connections forever, answering each with the responder's reply.
///
/// The responder gets the connection index, the request head and the
/// server address.
pub(crate) struct ScriptedServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    pub(crate) async fn start<F>(respond: F) -> Self
    where
        F: Fn(usize, &str, SocketAddr) -> Reply + Send + Sync + 'static,
    {
        Self::start_on("127.0.0.1:0", respond).await.expect("bind")
    }

    /// Like [`start`](Self::start), on a chosen bind address.
    pub(crate) async fn start_on<F>(bind: &str, respond: F) -> std::io::Result<Self>
    where
        F: Fn(usize, &str, SocketAddr) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(respond);

        let log = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let respond = Arc::clone(&respond);
                let log = Arc::clone(&log);
                let current = index;
                index += 1;
                tokio::spawn(serve(stream, current, addr, respond, log));
            }
        });

        Ok(Self {
            addr,
            requests,
            task,
        })
    }

    /// Server address.
    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL for `path` on this server.
    pub(crate) fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Request heads received so far, in arrival order.
    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    index: usize,
    addr: SocketAddr,
    respond: Arc<Responder>,
    log: Arc<Mutex<Vec<String>>>,
) {
    let Some((head, rest)) = read_request(&mut stream).await else {
        return;
    };
    // Logged before replying so the client never sees a reply whose
    // request is missing from the log.
    log.lock().push(head.clone());

    match respond(index, &head, addr) {
        Reply::Raw(text) => {
            if stream.write_all(text.as_bytes()).await.is_err() {
                return;
            }
            let mut sink = [0u8; 1024];
            while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
        }
        Reply::Upgrade {
            extra_headers,
            frames,
        } => {
            let response = upgrade_head_with(&head, &extra_headers);
            if stream.write_all(response.as_bytes()).await.is_err() {
                return;
            }
            let mut ws =
                WebSocketStream::from_partially_read(stream, rest, Role::Server, None).await;
            for frame in frames {
                if ws.send(frame).await.is_err() {
                    return;
                }
            }
            while let Some(Ok(message)) = ws.next().await {
                if (message.is_text() || message.is_binary()) && ws.send(message).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<(String, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            return Some((head, buf[end + 4..].to_vec()));
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}
