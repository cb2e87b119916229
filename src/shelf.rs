//! Links to the fan controllers of the disk shelves.
//!
//! The wire protocol is one TCP connection per shelf carrying bare decimal
//! duty values ("55"), with no framing and no reply.

use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::clock::Clock;

/// Delay between two connection attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Attempt budget used when a send fails. Startup uses 0 (unbounded).
pub const RECONNECT_ATTEMPTS: u32 = 5;

/// Upper bound on one TCP connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on one blocked duty write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens transport streams to a shelf.
pub trait Connector {
    type Stream: Write;

    /// Returns the stream and a printable peer address.
    fn open(&mut self, address: &str, port: u16) -> io::Result<(Self::Stream, String)>;
}

/// Plain TCP with bounded connect and write times, so a silent shelf cannot
/// stall its link forever.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            write_timeout,
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT, WRITE_TIMEOUT)
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn open(&mut self, address: &str, port: u16) -> io::Result<(TcpStream, String)> {
        let mut last_err = None;
        for addr in (address, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.write_timeout))?;
                    return Ok((stream, addr.ip().to_string()));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{address} resolved to no addresses"),
            )
        }))
    }
}

/// Destination of one chassis's disk-fan duty.
pub trait DutySink {
    /// Fire-and-forget; failures are handled inside the sink.
    fn send_duty(&mut self, duty: u8);
    fn close(&mut self);
}

/// A reconnecting connection to one shelf.
pub struct ShelfLink<C: Connector, K: Clock> {
    chassis: usize,
    address: String,
    port: u16,
    connector: C,
    clock: K,
    retry_delay: Duration,
    stream: Option<C::Stream>,
    cancel: Arc<AtomicBool>,
}

impl<C: Connector, K: Clock> ShelfLink<C, K> {
    pub fn new(chassis: usize, address: impl Into<String>, port: u16, connector: C, clock: K) -> Self {
        Self {
            chassis,
            address: address.into(),
            port,
            connector,
            clock,
            retry_delay: RETRY_DELAY,
            stream: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares a flag that aborts pending connection retries when raised.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Tries to connect up to `max_attempts` times, forever when 0. Leaves
    /// the link disconnected if every attempt fails. A connected link is
    /// left as is.
    pub fn connect(&mut self, max_attempts: u32) -> bool {
        if self.is_connected() {
            return true;
        }
        let mut attempt = 0u32;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return false;
            }
            attempt = attempt.saturating_add(1);
            match self.connector.open(&self.address, self.port) {
                Ok((stream, peer)) => {
                    info!("Connected to {}", peer);
                    self.stream = Some(stream);
                    return true;
                }
                Err(e) if max_attempts != 0 && attempt >= max_attempts => {
                    error!(
                        "Could not connect to {} (attempt #{}): {}. Bailing.",
                        self.address, attempt, e
                    );
                    return false;
                }
                Err(e) => {
                    error!(
                        "Could not connect to {} (attempt #{}): {}. Trying again in {} seconds.",
                        self.address,
                        attempt,
                        e,
                        self.retry_delay.as_secs()
                    );
                    self.clock.sleep(self.retry_delay);
                }
            }
        }
    }

    /// Writes `duty`. On failure the connection is dropped and re-established
    /// with a bounded budget; the duty itself is not resent.
    pub fn send(&mut self, duty: u8) -> io::Result<()> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream
                .write_all(duty.to_string().as_bytes())
                .and_then(|_| stream.flush()),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "link is down")),
        };

        if let Err(e) = &result {
            error!(
                "Could not send to shelf {}: {}. Attempting to reconnect now...",
                self.chassis, e
            );
            self.close();
            self.connect(RECONNECT_ATTEMPTS);
        }
        result
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("closed link to shelf {}", self.chassis);
        }
    }
}

impl<C: Connector, K: Clock> DutySink for ShelfLink<C, K> {
    fn send_duty(&mut self, duty: u8) {
        let _ = self.send(duty);
    }

    fn close(&mut self) {
        ShelfLink::close(self);
    }
}

enum WorkerMsg {
    Duty(u8),
    Stop,
}

/// Runs a [`ShelfLink`] on its own thread so slow reconnects never hold up
/// the control loop. Duties queued while the link is busy are coalesced to
/// the newest value.
pub struct ShelfWorker {
    chassis: usize,
    tx: Sender<WorkerMsg>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ShelfWorker {
    /// Starts the worker; it connects with an unbounded budget first. The
    /// link's cancel flag is kept and is raised again by `close`.
    pub fn spawn<C, K>(link: ShelfLink<C, K>) -> io::Result<Self>
    where
        C: Connector + Send + 'static,
        C::Stream: Send,
        K: Clock + Send + 'static,
    {
        let chassis = link.chassis;
        let cancel = Arc::clone(&link.cancel);
        let mut link = link;
        let (tx, rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(format!("shelf-{chassis}"))
            .spawn(move || {
                link.connect(0);
                worker_loop(&mut link, &rx);
                link.close();
            })?;

        Ok(Self {
            chassis,
            tx,
            cancel,
            handle: Some(handle),
        })
    }
}

fn worker_loop<C: Connector, K: Clock>(link: &mut ShelfLink<C, K>, rx: &Receiver<WorkerMsg>) {
    while let Ok(WorkerMsg::Duty(mut latest)) = rx.recv() {
        let mut stop = false;
        for msg in rx.try_iter() {
            match msg {
                WorkerMsg::Duty(duty) => latest = duty,
                WorkerMsg::Stop => {
                    stop = true;
                    break;
                }
            }
        }
        let _ = link.send(latest);
        if stop {
            return;
        }
    }
}

impl DutySink for ShelfWorker {
    fn send_duty(&mut self, duty: u8) {
        if self.tx.send(WorkerMsg::Duty(duty)).is_err() {
            warn!("shelf {} worker is gone, duty {}% dropped", self.chassis, duty);
        }
    }

    fn close(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        let _ = self.tx.send(WorkerMsg::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("shelf {} worker panicked", self.chassis);
            }
        }
    }
}

impl Drop for ShelfWorker {
    fn drop(&mut self) {
        DutySink::close(self);
    }
}
