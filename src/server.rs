use crate::Result;
use std::io::Write as _;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// How long the accept loop waits before logging that nobody connected.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// A write blocked longer than this drops the client.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Granularity of the non-blocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

type Connections = Arc<Mutex<Vec<Arc<Connection>>>>;

fn lock(connections: &Mutex<Vec<Arc<Connection>>>) -> MutexGuard<'_, Vec<Arc<Connection>>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Accepts OpenIGTLink clients and fans packets out to all of them.
pub struct ConnectionListener {
    local_addr: SocketAddr,
    connections: Connections,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ConnectionListener {
    /// Bind and start the accept thread.
    pub fn bind(addr: impl ToSocketAddrs, accept_timeout: Duration) -> Result<ConnectionListener> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let connections: Connections = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let accept_connections = connections.clone();
        let accept_running = running.clone();
        let thread = std::thread::Builder::new()
            .name("igtl-accept".into())
            .spawn(move || {
                accept_loop(listener, accept_connections, accept_running, accept_timeout);
            })?;

        log::info!("Listening for OpenIGTLink clients on {}", local_addr);

        Ok(ConnectionListener {
            local_addr,
            connections,
            running,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Write a packet to every client. Clients whose write fails are
    /// dropped. Returns how many clients received the packet.
    ///
    /// The connection list is not locked while writing, so a stalled
    /// client does not hold up the accept thread.
    pub fn send(&self, packet: &[u8]) -> usize {
        let snapshot: Vec<Arc<Connection>> = lock(&self.connections).clone();

        let failed: Vec<Arc<Connection>> = snapshot
            .iter()
            .filter(|conn| match (&conn.stream).write_all(packet) {
                Ok(()) => false,
                Err(e) => {
                    log::info!("Client {} disconnected: {}", conn.peer, e);
                    true
                }
            })
            .cloned()
            .collect();

        if !failed.is_empty() {
            lock(&self.connections).retain(|conn| !failed.iter().any(|f| Arc::ptr_eq(f, conn)));
        }
        snapshot.len() - failed.len()
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        lock(&self.connections).clear();
    }
}

impl Drop for ConnectionListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: TcpListener,
    connections: Connections,
    running: Arc<AtomicBool>,
    accept_timeout: Duration,
) {
    let mut waiting_since = Instant::now();

    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                waiting_since = Instant::now();
                if let Err(e) = configure(&stream) {
                    log::warn!("Cannot configure connection from {}: {}", peer, e);
                    continue;
                }
                let mut list = lock(&connections);
                list.push(Arc::new(Connection { stream, peer }));
                log::info!("Connection from {} ({} total)", peer, list.len());
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if waiting_since.elapsed() >= accept_timeout {
                    log::debug!("No connection");
                    waiting_since = Instant::now();
                }
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                log::warn!("Accept error: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }

    log::debug!("Accept loop stopped");
}

fn configure(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    stream.set_nodelay(true)
}
