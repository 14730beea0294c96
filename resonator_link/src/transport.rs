use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tungstenite::handshake::HandshakeError;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::Message;
use tungstenite::WebSocket;

pub const DEFAULT_HOST: &str = "192.168.7.2";
pub const DEFAULT_PORT: u16 = 5555;
pub const CONTROL_PATH: &str = "gui_control";
pub const DATA_PATH: &str = "gui_data";

pub const RECONNECT_DELAY: Duration = Duration::from_millis(1500);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_millis(30);
const WRITE_TIMEOUT: Duration = Duration::from_millis(200);
const IDLE_SLEEP: Duration = Duration::from_millis(25);

/// One logical channel to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn new(host: &str, port: u16, path: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        }
    }

    pub fn control(host: &str) -> Self {
        Self::new(host, DEFAULT_PORT, CONTROL_PATH)
    }

    pub fn data(host: &str) -> Self {
        Self::new(host, DEFAULT_PORT, DATA_PATH)
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}/{}", self.host, self.port, self.path)
    }
}

/// Lifecycle and payload events emitted by a socket thread.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Open,
    Closed { clean: bool },
    Frame(String),
}

/// At most one reconnect deadline is pending at a time; re-scheduling while
/// one is pending is a no-op.
struct ReconnectTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl ReconnectTimer {
    fn immediate(delay: Duration) -> Self {
        Self {
            delay,
            deadline: Some(Instant::now()),
        }
    }

    fn schedule(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.delay);
        }
    }

    fn pending(&self) -> bool {
        self.deadline.is_some()
    }

    fn due(&mut self) -> bool {
        match self.deadline {
            Some(d) if Instant::now() >= d => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Owns one websocket connection to the device on a dedicated thread.
/// Inbound frames and lifecycle changes arrive on the event channel;
/// outbound frames are taken from the frame channel and are dropped, not
/// queued, while the connection is down.
pub struct SocketThread {
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SocketThread {
    pub fn spawn(endpoint: Endpoint, event_tx: Sender<LinkEvent>, frame_rx: Receiver<String>) -> Self {
        Self::spawn_with_delay(endpoint, event_tx, frame_rx, RECONNECT_DELAY)
    }

    pub fn spawn_with_delay(
        endpoint: Endpoint,
        event_tx: Sender<LinkEvent>,
        frame_rx: Receiver<String>,
        reconnect_delay: Duration,
    ) -> Self {
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let connected_for_thread = Arc::clone(&connected);
        let shutdown_for_thread = Arc::clone(&shutdown);
        let join_handle = thread::spawn(move || {
            run_client(
                endpoint,
                event_tx,
                frame_rx,
                connected_for_thread,
                shutdown_for_thread,
                reconnect_delay,
            )
        });

        Self {
            connected,
            shutdown,
            join_handle: Mutex::new(Some(join_handle)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Shared flag for controllers that need a cheap connection check.
    pub fn connection_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Clean shutdown: closes the socket and suppresses any pending
    /// reconnect.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for SocketThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_client(
    endpoint: Endpoint,
    event_tx: Sender<LinkEvent>,
    frame_rx: Receiver<String>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    let mut ws: Option<WebSocket<TcpStream>> = None;
    let mut retry = ReconnectTimer::immediate(reconnect_delay);

    while !shutdown.load(Ordering::Relaxed) {
        if ws.is_none() && retry.due() {
            match dial(&endpoint) {
                Ok(socket) => {
                    tracing::info!(url = %endpoint.url(), "socket open");
                    connected.store(true, Ordering::Relaxed);
                    let _ = event_tx.try_send(LinkEvent::Open);
                    ws = Some(socket);
                }
                Err(e) => {
                    // A failed dial is treated like an abnormal close: one
                    // reconnect gets scheduled, refused or not.
                    if is_refused(&e) {
                        tracing::debug!(url = %endpoint.url(), "connection refused");
                    } else {
                        tracing::warn!(url = %endpoint.url(), error = %e, "dial failed");
                    }
                    retry.schedule();
                }
            }
        }

        // Outbound: drain queued frames. Frames taken while disconnected
        // are dropped (latest-value traffic, no backpressure).
        loop {
            match frame_rx.try_recv() {
                Ok(frame) => {
                    let Some(socket) = ws.as_mut() else { continue };
                    if socket.send(Message::Text(frame)).is_err() {
                        close_socket(&mut ws, &connected, &event_tx, false, &mut retry);
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        // Inbound: read at most one message per pass (the read timeout
        // keeps the loop moving).
        if let Some(socket) = ws.as_mut() {
            match socket.read() {
                Ok(Message::Text(text)) => {
                    let _ = event_tx.try_send(LinkEvent::Frame(text));
                }
                Ok(Message::Ping(payload)) => {
                    let _ = socket.send(Message::Pong(payload));
                }
                Ok(Message::Close(frame)) => {
                    let clean = frame
                        .as_ref()
                        .is_some_and(|f| f.code == CloseCode::Normal);
                    tracing::info!(url = %endpoint.url(), clean, "socket closed by peer");
                    close_socket(&mut ws, &connected, &event_tx, clean, &mut retry);
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(e))
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(tungstenite::Error::ConnectionClosed)
                | Err(tungstenite::Error::AlreadyClosed) => {
                    close_socket(&mut ws, &connected, &event_tx, true, &mut retry);
                }
                Err(e) => {
                    tracing::warn!(url = %endpoint.url(), error = %e, "socket error");
                    close_socket(&mut ws, &connected, &event_tx, false, &mut retry);
                }
            }
        } else if !retry.pending() {
            // Cleanly closed and nothing scheduled: idle until shutdown.
            thread::sleep(IDLE_SLEEP);
        } else {
            thread::sleep(Duration::from_millis(10));
        }
    }

    if let Some(mut socket) = ws {
        let _ = socket.close(None);
    }
    connected.store(false, Ordering::Relaxed);
}

fn close_socket(
    ws: &mut Option<WebSocket<TcpStream>>,
    connected: &Arc<AtomicBool>,
    event_tx: &Sender<LinkEvent>,
    clean: bool,
    retry: &mut ReconnectTimer,
) {
    if let Some(mut socket) = ws.take() {
        let _ = socket.close(None);
    }
    connected.store(false, Ordering::Relaxed);
    let _ = event_tx.try_send(LinkEvent::Closed { clean });
    if !clean {
        retry.schedule();
    }
}

fn dial(endpoint: &Endpoint) -> Result<WebSocket<TcpStream>, tungstenite::Error> {
    let addr = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            tungstenite::Error::Url(tungstenite::error::UrlError::UnableToConnect(
                endpoint.url(),
            ))
        })?;

    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    let _ = stream.set_nodelay(true);
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let mut attempt = tungstenite::client(endpoint.url(), stream);
    loop {
        match attempt {
            Ok((ws, _response)) => {
                let _ = ws.get_ref().set_read_timeout(Some(READ_TIMEOUT));
                return Ok(ws);
            }
            Err(HandshakeError::Interrupted(mid)) => {
                if Instant::now() >= deadline {
                    return Err(tungstenite::Error::Io(io::ErrorKind::TimedOut.into()));
                }
                attempt = mid.handshake();
            }
            Err(HandshakeError::Failure(e)) => return Err(e),
        }
    }
}

fn is_refused(e: &tungstenite::Error) -> bool {
    matches!(e, tungstenite::Error::Io(io) if io.kind() == io::ErrorKind::ConnectionRefused)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_urls() {
        assert_eq!(
            Endpoint::control("192.168.7.2").url(),
            "ws://192.168.7.2:5555/gui_control"
        );
        assert_eq!(
            Endpoint::data("192.168.7.2").url(),
            "ws://192.168.7.2:5555/gui_data"
        );
        assert_eq!(
            Endpoint::new("127.0.0.1", 9000, "gui_data").url(),
            "ws://127.0.0.1:9000/gui_data"
        );
    }

    #[test]
    fn reconnect_timer_is_single_slot() {
        let mut timer = ReconnectTimer {
            delay: Duration::from_secs(60),
            deadline: None,
        };
        assert!(!timer.pending());

        timer.schedule();
        assert!(timer.pending());
        let first = timer.deadline;

        // A second close before the timer fires must not re-arm it.
        timer.schedule();
        assert_eq!(timer.deadline, first);
        assert!(!timer.due());
    }

    #[test]
    fn reconnect_timer_fires_once() {
        let mut timer = ReconnectTimer::immediate(Duration::from_secs(60));
        assert!(timer.due());
        assert!(!timer.due());
        assert!(!timer.pending());
    }
}
