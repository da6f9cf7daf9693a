//! Unix socket listener for lifecycle notifications.
//!
//! The endpoint is path-addressed and world-connectable; it is not a
//! security boundary. Peers write one JSON document and close, so
//! end-of-stream is the only framing. The listener never writes a
//! response.

use fs_err as fs;
use perch_protocol::{decode_event, EventKind, LifecycleEvent};
use std::io::{ErrorKind, Read};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/perch.sock";

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK_SIZE: usize = 4096;

type EventHandler = Box<dyn Fn(LifecycleEvent) + Send>;

pub struct Listener {
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_thread: None,
        }
    }

    /// Binds the socket and begins accepting on a background thread.
    ///
    /// A stale socket file from a crashed instance is removed before
    /// binding. Startup failures are logged and leave the listener
    /// inert; no event will ever be delivered and nothing retries.
    /// Calling `start` while already running is a no-op.
    pub fn start(&mut self, handler: impl Fn(LifecycleEvent) + Send + 'static) {
        if self.accept_thread.is_some() {
            debug!("Listener already started");
            return;
        }

        let listener = match bind_socket(&self.socket_path) {
            Ok(listener) => listener,
            Err(err) => {
                error!(
                    error = %err,
                    path = %self.socket_path.display(),
                    "Failed to bind socket; listener inert"
                );
                return;
            }
        };

        info!(path = %self.socket_path.display(), "Listening for lifecycle events");

        self.shutdown.store(false, Ordering::SeqCst);
        let shutdown = Arc::clone(&self.shutdown);
        let handler: EventHandler = Box::new(handler);
        self.accept_thread = Some(thread::spawn(move || accept_loop(listener, shutdown, handler)));
    }

    /// Stops accepting new connections and removes the socket file.
    /// A connection already being read may still complete.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        if self.socket_path.exists() {
            if let Err(err) = fs::remove_file(&self.socket_path) {
                warn!(error = %err, path = %self.socket_path.display(), "Failed to remove socket file");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if self.accept_thread.is_some() {
            self.stop();
        }
    }
}

fn bind_socket(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        // Leftover from a previous crashed instance.
        fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    // Any local process may connect.
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn accept_loop(listener: UnixListener, shutdown: Arc<AtomicBool>, handler: EventHandler) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => handle_connection(stream, &handler),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn handle_connection(mut stream: UnixStream, handler: &EventHandler) {
    let payload = match read_message(&mut stream) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "Failed to read connection");
            return;
        }
    };
    if payload.is_empty() {
        return;
    }

    match decode_event(&payload) {
        Ok(event) => {
            log_event(&event);
            handler(event);
        }
        Err(err) => {
            warn!(raw = %err.raw, error = %err, "Dropping undecodable event");
        }
    }
}

fn read_message(stream: &mut UnixStream) -> std::io::Result<Vec<u8>> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut payload = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => payload.extend_from_slice(&chunk[..n]),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(std::io::Error::new(
                    ErrorKind::TimedOut,
                    "peer held the connection open",
                ));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(payload)
}

fn log_event(event: &LifecycleEvent) {
    let session = session_prefix(&event.session_id);
    let tool = event.tool.as_deref().unwrap_or("unknown");
    match event.kind {
        EventKind::SessionStart => info!(session, "Session started"),
        EventKind::SessionEnd => info!(session, "Session ended"),
        EventKind::PreToolUse => info!(session, tool, "Tool use"),
        EventKind::PostToolUse => {
            info!(session, tool, success = event.is_success(), "Tool result")
        }
        EventKind::Other => debug!(session, status = %event.status, "Event"),
    }
}

fn session_prefix(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{Mood, Tracker};
    use std::io::Write;
    use std::sync::mpsc;
    use std::time::Instant;

    fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("perch.sock")
    }

    fn started_listener(path: &Path) -> (Listener, mpsc::Receiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::channel();
        let mut listener = Listener::new(path);
        listener.start(move |event| {
            let _ = tx.send(event);
        });
        (listener, rx)
    }

    fn send_payload(path: &Path, payload: &[u8]) {
        let mut stream = UnixStream::connect(path).expect("connect");
        stream.write_all(payload).expect("write");
        // Closing the write side delimits the message.
    }

    fn pre_tool_payload(id: &str) -> String {
        format!(
            r#"{{"session_id":"abc123","cwd":"/repo","event":"PreToolUse","status":"running","tool":"Edit","tool_use_id":"{id}"}}"#
        )
    }

    #[test]
    fn delivers_decoded_events() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_in(&dir);
        let (mut listener, rx) = started_listener(&path);

        send_payload(&path, pre_tool_payload("t-1").as_bytes());

        let event = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("event delivered");
        assert_eq!(event.kind, EventKind::PreToolUse);
        assert_eq!(event.tool_use_id.as_deref(), Some("t-1"));

        listener.stop();
    }

    #[test]
    fn concurrent_connections_each_deliver_one_event() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_in(&dir);
        let (mut listener, rx) = started_listener(&path);

        let writers: Vec<_> = ["t-1", "t-2"]
            .into_iter()
            .map(|id| {
                let path = path.clone();
                let payload = pre_tool_payload(id);
                thread::spawn(move || send_payload(&path, payload.as_bytes()))
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread");
        }

        let mut tracker = Tracker::new();
        for _ in 0..2 {
            let event = rx
                .recv_timeout(Duration::from_secs(2))
                .expect("event delivered");
            tracker.handle_event_at(event, Instant::now());
        }

        let snapshot = tracker.handle().snapshot();
        assert_eq!(snapshot.event_count, 2);
        assert_eq!(snapshot.mood, Mood::Working);

        listener.stop();
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_in(&dir);
        let (mut listener, rx) = started_listener(&path);

        send_payload(&path, b"{not json");
        send_payload(&path, pre_tool_payload("t-after").as_bytes());

        let event = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("valid event still delivered");
        assert_eq!(event.tool_use_id.as_deref(), Some("t-after"));
        assert!(rx.try_recv().is_err());

        listener.stop();
    }

    #[test]
    fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_in(&dir);
        std::fs::write(&path, b"stale").expect("stale file");

        let (mut listener, rx) = started_listener(&path);
        send_payload(&path, pre_tool_payload("t-1").as_bytes());
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());

        listener.stop();
    }

    #[test]
    fn socket_is_world_connectable() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_in(&dir);
        let (mut listener, _rx) = started_listener(&path);

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o777);

        listener.stop();
    }

    #[test]
    fn start_twice_is_a_noop() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_in(&dir);
        let (mut listener, rx) = started_listener(&path);
        listener.start(|_event| panic!("second handler must never be installed"));

        send_payload(&path, pre_tool_payload("t-1").as_bytes());
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());

        listener.stop();
    }

    #[test]
    fn stop_removes_socket_and_refuses_new_connections() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = socket_in(&dir);
        let (mut listener, _rx) = started_listener(&path);

        listener.stop();

        assert!(!path.exists());
        assert!(UnixStream::connect(&path).is_err());
    }
}
