//! # Connection Pool
//!
//! Purpose: Own a fixed number of TCP connections to one store endpoint and
//! hand them out to one request at a time.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: `size` connections are dialed together on the
//!    first `acquire` (or an explicit `connect`) and reused afterwards.
//! 2. **Blocking Acquire**: Callers park on a condition variable until a
//!    connection is returned, optionally bounded by `acquire_timeout`.
//! 3. **Single Dialer**: The `Connecting` phase lets exactly one thread dial
//!    while the others wait for the result.
//! 4. **Generations**: Tearing the pool down bumps a generation counter, so
//!    connections checked out before the teardown are dropped on return
//!    instead of rejoining the pool.
//!
//! ## Phases
//!
//! ```text
//! Uninitialized --acquire/connect--> Connecting --ok--> Connected
//!       ^                                |                  |
//!       +------------ dial failed -------+                  |
//!       +------------ fatal transport error ----------------+
//! Closed <----------------------- close ---------------------+
//! Closed --acquire/connect--> Connecting
//! ```

use std::collections::VecDeque;
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rpb_common::{decode_header, Frame, HEADER_LEN};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Lifecycle phase of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    /// Never connected, or torn down after a fatal error.
    Uninitialized,
    /// One thread is dialing; others wait.
    Connecting,
    /// Connections are open and can be acquired.
    Connected,
    /// Closed by the application. The next acquire reconnects.
    Closed,
}

struct PoolState {
    phase: PoolPhase,
    idle: VecDeque<Connection>,
    /// Live connections of the current generation, idle or checked out.
    open: usize,
    generation: u64,
}

struct PoolInner {
    config: ClientConfig,
    state: Mutex<PoolState>,
    available: Condvar,
    next_id: AtomicU64,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("addr", &self.inner.config.addr)
            .field("size", &self.inner.config.pool_size)
            .field("phase", &self.phase())
            .finish()
    }
}

impl ConnectionPool {
    /// Creates a pool without dialing. Connections are opened on first use.
    pub fn new(config: ClientConfig) -> Self {
        let state = PoolState {
            phase: PoolPhase::Uninitialized,
            idle: VecDeque::with_capacity(config.pool_size),
            open: 0,
            generation: 0,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                available: Condvar::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn size(&self) -> usize {
        self.inner.config.pool_size
    }

    pub fn phase(&self) -> PoolPhase {
        self.lock().phase
    }

    /// Connections sitting in the pool, ready for reuse.
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    /// Connections currently held by callers.
    pub fn checked_out(&self) -> usize {
        let state = self.lock();
        state.open.saturating_sub(state.idle.len())
    }

    /// Dials all `size` connections, closing any existing ones first.
    pub fn connect(&self) -> ClientResult<()> {
        self.check_size()?;
        let mut state = self.lock();
        while state.phase == PoolPhase::Connecting {
            state = self
                .inner
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let retired = retire(&mut state, PoolPhase::Connecting);
        let generation = state.generation;
        drop(state);
        if !retired.is_empty() {
            debug!(closed = retired.len(), "closing connections before reconnect");
        }
        drop(retired);
        self.establish(generation)
    }

    /// Acquires a connection, connecting the pool first when needed.
    ///
    /// Blocks until a connection is free. With `acquire_timeout` configured,
    /// gives up with `AcquireTimeout` once the wait exceeds it.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        let timeout = self.inner.config.acquire_timeout;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            let phase = state.phase;
            match phase {
                PoolPhase::Connected => {
                    if let Some(conn) = state.idle.pop_front() {
                        trace!(conn = conn.id, "connection acquired");
                        return Ok(PooledConnection::new(self.clone(), conn, state.generation));
                    }
                    if state.open < self.size() {
                        // A connection was discarded earlier; dial its replacement.
                        state.open += 1;
                        let generation = state.generation;
                        drop(state);
                        return self.replace(generation);
                    }
                }
                PoolPhase::Connecting => {}
                PoolPhase::Uninitialized | PoolPhase::Closed => {
                    self.check_size()?;
                    state.phase = PoolPhase::Connecting;
                    let generation = state.generation;
                    drop(state);
                    self.establish(generation)?;
                    state = self.lock();
                    continue;
                }
            }
            state = self.wait(state, deadline, timeout)?;
        }
    }

    /// Closes every idle connection. Calling it again is a no-op.
    ///
    /// Connections checked out at this point are dropped when returned.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.open == 0 && matches!(state.phase, PoolPhase::Closed | PoolPhase::Uninitialized) {
            debug!(addr = %self.inner.config.addr, "pool already closed");
            return;
        }
        let retired = retire(&mut state, PoolPhase::Closed);
        drop(state);
        self.inner.available.notify_all();
        info!(addr = %self.inner.config.addr, closed = retired.len(), "pool closed");
    }

    fn check_size(&self) -> ClientResult<()> {
        match self.inner.config.pool_size {
            0 => Err(ClientError::BadConnectionCount(0)),
            _ => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Every critical section leaves the state consistent, so a panic
        // elsewhere does not invalidate it.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(
        &'a self,
        state: MutexGuard<'a, PoolState>,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
    ) -> ClientResult<MutexGuard<'a, PoolState>> {
        let (Some(deadline), Some(timeout)) = (deadline, timeout) else {
            return Ok(self
                .inner
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner));
        };
        let now = Instant::now();
        if now >= deadline {
            debug!(?timeout, "acquire timed out");
            return Err(ClientError::AcquireTimeout(timeout));
        }
        let (state, _) = self
            .inner
            .available
            .wait_timeout(state, deadline - now)
            .unwrap_or_else(PoisonError::into_inner);
        Ok(state)
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn dial(&self) -> ClientResult<Connection> {
        let addr = resolve(&self.inner.config.addr)?;
        Connection::open(self.next_id(), addr, &self.inner.config)
    }

    /// Opens `size` connections and installs them if the pool is still
    /// waiting for this generation.
    fn establish(&self, generation: u64) -> ClientResult<()> {
        let config = &self.inner.config;
        let started = Instant::now();
        let result = resolve(&config.addr).and_then(|addr| {
            (0..config.pool_size)
                .map(|_| Connection::open(self.next_id(), addr, config))
                .collect::<ClientResult<VecDeque<_>>>()
        });

        let mut state = self.lock();
        let current = state.generation == generation && state.phase == PoolPhase::Connecting;
        let outcome = match result {
            Ok(conns) if current => {
                state.open = conns.len();
                state.idle = conns;
                state.phase = PoolPhase::Connected;
                info!(
                    addr = %config.addr,
                    size = config.pool_size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "pool connected"
                );
                Ok(())
            }
            Ok(conns) => {
                debug!(discarded = conns.len(), "pool changed while dialing");
                Ok(())
            }
            Err(err) => {
                if current {
                    state.phase = PoolPhase::Uninitialized;
                }
                warn!(addr = %config.addr, error = %err, "pool connect failed");
                Err(err)
            }
        };
        drop(state);
        self.inner.available.notify_all();
        outcome
    }

    fn replace(&self, generation: u64) -> ClientResult<PooledConnection> {
        match self.dial() {
            Ok(conn) => {
                debug!(conn = conn.id, "replacement connection opened");
                Ok(PooledConnection::new(self.clone(), conn, generation))
            }
            Err(err) => {
                self.forget(generation);
                Err(err)
            }
        }
    }

    fn release(&self, conn: Connection, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation && state.phase == PoolPhase::Connected {
            trace!(conn = conn.id, "connection released");
            state.idle.push_back(conn);
        } else {
            trace!(conn = conn.id, "stale connection dropped");
            if state.generation == generation {
                state.open = state.open.saturating_sub(1);
            }
        }
        drop(state);
        self.inner.available.notify_one();
    }

    fn forget(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.open = state.open.saturating_sub(1);
        }
        drop(state);
        self.inner.available.notify_one();
    }

    fn teardown(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        let retired = retire(&mut state, PoolPhase::Uninitialized);
        drop(state);
        self.inner.available.notify_all();
        warn!(
            addr = %self.inner.config.addr,
            closed = retired.len(),
            "transport failure, pool torn down"
        );
    }
}

fn retire(state: &mut PoolState, next: PoolPhase) -> VecDeque<Connection> {
    state.generation += 1;
    state.open = 0;
    state.phase = next;
    std::mem::take(&mut state.idle)
}

fn resolve(addr: &str) -> ClientResult<SocketAddr> {
    let mut addrs = addr.to_socket_addrs().map_err(|source| ClientError::Resolve {
        addr: addr.to_string(),
        source,
    })?;
    addrs.next().ok_or_else(|| ClientError::Resolve {
        addr: addr.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
    })
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: ConnectionPool,
    conn: Option<Connection>,
    generation: u64,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: ConnectionPool, conn: Connection, generation: u64) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            generation,
            valid: true,
        }
    }

    /// Identifier of the underlying socket, unique within the pool.
    pub fn id(&self) -> u64 {
        self.conn.as_ref().map_or(0, |conn| conn.id)
    }

    pub(crate) fn send(&mut self, frame: &[u8]) -> ClientResult<()> {
        self.conn()?.send(frame)
    }

    /// Reads one frame. `Ok(None)` means the peer closed the stream before
    /// sending any byte of a header.
    pub(crate) fn recv(&mut self) -> ClientResult<Option<Frame>> {
        self.conn()?.recv()
    }

    /// Replaces the socket with a freshly dialed one, keeping the slot.
    pub(crate) fn reconnect(&mut self) -> ClientResult<()> {
        let fresh = self.pool.dial()?;
        debug!(old = self.id(), new = fresh.id, "reconnected connection");
        self.conn = Some(fresh);
        Ok(())
    }

    /// Drops this connection instead of returning it to the pool.
    pub fn discard(&mut self) {
        self.valid = false;
    }

    /// Drops this connection and tears down the whole pool.
    pub fn invalidate_pool(&mut self) {
        self.valid = false;
        self.pool.teardown(self.generation);
    }

    fn conn(&mut self) -> ClientResult<&mut Connection> {
        self.conn.as_mut().ok_or(ClientError::ConnectionClosed)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.valid {
            self.pool.release(conn, self.generation);
        } else {
            trace!(conn = conn.id, "connection discarded");
            drop(conn);
            self.pool.forget(self.generation);
        }
    }
}

/// Single TCP connection with a buffered reader.
struct Connection {
    id: u64,
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    header: [u8; HEADER_LEN],
}

impl Connection {
    fn open(id: u64, addr: SocketAddr, config: &ClientConfig) -> ClientResult<Self> {
        let dial_err = |source| ClientError::Dial {
            addr: addr.to_string(),
            source,
        };
        let stream = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout).map_err(dial_err)?,
            None => TcpStream::connect(addr).map_err(dial_err)?,
        };
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;
        trace!(conn = id, %addr, "connection opened");

        Ok(Connection {
            id,
            reader: BufReader::new(stream),
            header: [0; HEADER_LEN],
        })
    }

    fn send(&mut self, frame: &[u8]) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(frame)?;
        stream.flush()?;
        trace!(conn = self.id, len = frame.len(), "frame sent");
        Ok(())
    }

    fn recv(&mut self) -> ClientResult<Option<Frame>> {
        let mut filled = 0;
        while filled < HEADER_LEN {
            match self.reader.read(&mut self.header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < HEADER_LEN {
            return Err(ClientError::ShortResponse { read: filled });
        }

        let header = decode_header(&self.header)?;
        let mut payload = vec![0u8; header.payload_len];
        self.reader.read_exact(&mut payload).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                ClientError::ConnectionClosed
            } else {
                ClientError::Io(err)
            }
        })?;
        trace!(
            conn = self.id,
            code = header.code,
            len = header.payload_len,
            "frame received"
        );
        Ok(Some(Frame {
            code: header.code,
            payload: Bytes::from(payload),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    // Accepts connections and keeps them open without answering.
    fn silent_listener() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => held.push(stream),
                    Err(_) => break,
                }
            }
        });
        addr
    }

    fn refused_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").to_string()
    }

    fn pool(addr: String, size: usize) -> ConnectionPool {
        ConnectionPool::new(
            ClientConfig::new(addr)
                .with_pool_size(size)
                .with_connect_timeout(Duration::from_secs(1)),
        )
    }

    #[test]
    fn zero_size_fails_before_dialing() {
        let pool = pool(refused_addr(), 0);
        assert!(matches!(pool.acquire(), Err(ClientError::BadConnectionCount(0))));
        assert!(matches!(pool.connect(), Err(ClientError::BadConnectionCount(0))));
        assert_eq!(pool.phase(), PoolPhase::Uninitialized);
    }

    #[test]
    fn dial_failure_leaves_pool_unconnected() {
        let pool = pool(refused_addr(), 2);
        let err = pool.acquire().err().expect("dial should fail");
        assert!(matches!(err, ClientError::Dial { .. }));
        assert_eq!(pool.phase(), PoolPhase::Uninitialized);
    }

    #[test]
    fn unresolvable_address_is_reported() {
        let pool = pool("not an address".to_string(), 1);
        assert!(matches!(pool.connect(), Err(ClientError::Resolve { .. })));
    }

    #[test]
    fn first_acquire_connects_whole_pool() {
        let pool = pool(silent_listener(), 3);
        assert_eq!(pool.phase(), PoolPhase::Uninitialized);
        let conn = pool.acquire().expect("acquire");
        assert_eq!(pool.phase(), PoolPhase::Connected);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.checked_out(), 1);
        drop(conn);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn close_is_idempotent_and_pool_reconnects() {
        let pool = pool(silent_listener(), 2);
        pool.connect().expect("connect");
        pool.close();
        pool.close();
        assert_eq!(pool.phase(), PoolPhase::Closed);
        assert_eq!(pool.idle_count(), 0);

        let conn = pool.acquire().expect("reacquire");
        assert_eq!(pool.phase(), PoolPhase::Connected);
        drop(conn);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn close_on_fresh_pool_is_noop() {
        let pool = pool(refused_addr(), 1);
        pool.close();
        assert_eq!(pool.phase(), PoolPhase::Uninitialized);
    }

    #[test]
    fn connection_checked_out_across_close_is_dropped() {
        let pool = pool(silent_listener(), 1);
        let conn = pool.acquire().expect("acquire");
        pool.close();
        drop(conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn acquire_times_out_when_exhausted() {
        let addr = silent_listener();
        let pool = ConnectionPool::new(
            ClientConfig::new(addr)
                .with_pool_size(1)
                .with_acquire_timeout(Duration::from_millis(100)),
        );
        let held = pool.acquire().expect("acquire");
        let started = Instant::now();
        let err = pool.acquire().err().expect("should time out");
        assert!(matches!(err, ClientError::AcquireTimeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(100));
        drop(held);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn invalidated_pool_reconnects_on_next_acquire() {
        let pool = pool(silent_listener(), 2);
        let mut conn = pool.acquire().expect("acquire");
        let old_id = conn.id();
        conn.invalidate_pool();
        drop(conn);
        assert_eq!(pool.phase(), PoolPhase::Uninitialized);
        assert_eq!(pool.idle_count(), 0);

        let conn = pool.acquire().expect("reacquire");
        assert!(conn.id() > old_id);
        assert_eq!(pool.phase(), PoolPhase::Connected);
        drop(conn);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn discarded_connection_is_replaced_lazily() {
        let pool = pool(silent_listener(), 1);
        let mut conn = pool.acquire().expect("acquire");
        let old_id = conn.id();
        conn.discard();
        drop(conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.phase(), PoolPhase::Connected);

        let conn = pool.acquire().expect("replacement");
        assert_ne!(conn.id(), old_id);
    }

    #[test]
    fn checked_out_never_exceeds_size() {
        let pool = pool(silent_listener(), 2);
        let peak = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..6)
            .map(|_| {
                let pool = pool.clone();
                let peak = peak.clone();
                let active = active.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        let conn = pool.acquire().expect("acquire");
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(1));
                        active.fetch_sub(1, Ordering::SeqCst);
                        drop(conn);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.checked_out(), 0);
        assert_eq!(pool.idle_count(), 2);
    }
}
