//! [std::net]-like blocking API for an actively opened TCP connection.
//!
//! A connection runs two threads once established:
//!
//! - the receiver reads the transport, feeds segments to the [`Tcb`] and
//!   appends in-order bytes to the receive buffer;
//! - the sender waits for something to transmit (a pending acknowledgment,
//!   queued data, or the FIN) and hands it to the transport.
//!
//! Sequence and queue state live behind one lock+condition pair, the receive
//! buffer behind another. When both are needed the control lock is taken
//! first.
//!
//! [std::net]: https://doc.rust-lang.org/std/net/index.html

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, trace, warn};

use super::fsm::{ConnectionState, Tcb};
use super::{Socket, SocketAddr, TcpSegment};
use crate::net::device::Device;
use crate::net::transport::{MAX_DATAGRAM_LEN, Transport};
use crate::{Config, Error, Result};

/// Dynamic and/or private ports (RFC 6335).
const EPHEMERAL_PORTS: RangeInclusive<u16> = 49152..=65535;

/// Why the receive side stopped delivering data.
#[derive(Debug, Clone)]
enum Fault {
    Reset,
    Failed(String),
}

impl Fault {
    fn to_error(&self) -> Error {
        match self {
            Fault::Reset => Error::ConnectionReset,
            Fault::Failed(reason) => Error::ConnectionFailed(reason.clone()),
        }
    }
}

/// In-order bytes waiting for the consumer.
#[derive(Debug, Default)]
struct RecvBuffer {
    data: VecDeque<u8>,
    /// The peer's FIN was received.
    eof: bool,
    fault: Option<Fault>,
    /// The connection was closed locally.
    closed: bool,
}

#[derive(Debug)]
struct Inner<D> {
    sock: Socket,
    config: Config,
    transport: Transport<D>,
    control: Mutex<Tcb>,
    control_cv: Condvar,
    recv: Mutex<RecvBuffer>,
    recv_cv: Condvar,
    /// Cancellation token observed by both worker threads.
    shutdown: AtomicBool,
}

/// A TCP connection between a local and a remote socket.
///
/// Reads, writes and [`Connection::close`] take `&self`, so one thread may
/// read while another writes.
#[derive(Debug)]
pub struct Connection<D: Device + 'static> {
    inner: Arc<Inner<D>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

#[cfg(target_os = "linux")]
impl Connection<crate::tun_tap::Tun> {
    /// Opens a TCP connection from `local` to `remote:port` over the TUN
    /// interface named by [`Config::device`].
    ///
    /// The interface must already be up with `local` routed through it.
    ///
    /// # Errors
    ///
    /// Returns an error if an address is malformed, the interface cannot be
    /// opened, or the handshake fails.
    pub fn dial(local: &str, remote: &str, port: u16, config: Config) -> Result<Self> {
        use crate::net::addr::{parse_ipv4, to_octets};

        let local = to_octets(parse_ipv4(local)?);
        let remote = to_octets(parse_ipv4(remote)?);

        let tun = crate::tun_tap::Tun::without_packet_info(&config.device)?;
        info!("attached to interface {}", tun.name());

        Self::dial_with(tun, local, remote, port, config)
    }
}

impl<D: Device + 'static> Connection<D> {
    /// Opens a TCP connection from `local` to `remote:port` over `device`.
    ///
    /// Blocks until the peer answers the SYN or [`Config::connect_timeout`]
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionRefused`] if the reply is not a SYN+ACK,
    /// [`Error::TimedOut`] if no reply arrives, or the device error.
    pub fn dial_with(
        device: D,
        local: [u8; 4],
        remote: [u8; 4],
        port: u16,
        config: Config,
    ) -> Result<Self> {
        let mut rng = config.rng();

        let local_port = config
            .local_port
            .unwrap_or_else(|| rng.random_range(EPHEMERAL_PORTS));
        let iss = config.initial_sequence.unwrap_or_else(|| rng.random());

        let sock = Socket {
            src: SocketAddr::new(local, local_port),
            dst: SocketAddr::new(remote, port),
        };

        let transport = Transport::new(
            device,
            local,
            remote,
            &config,
            StdRng::seed_from_u64(rng.random()),
        );

        let (mut tcb, syn) = Tcb::open(sock, iss, &config)?;
        transmit(&transport, &sock, &syn)?;

        let ack = handshake(&transport, &mut tcb, &config)?;
        transmit(&transport, &sock, &ack)?;

        info!("[{sock}] connection established");

        let inner = Arc::new(Inner {
            sock,
            config,
            transport,
            control: Mutex::new(tcb),
            control_cv: Condvar::new(),
            recv: Mutex::new(RecvBuffer::default()),
            recv_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let workers = match spawn_workers(&inner) {
            Ok(workers) => workers,
            Err(err) => {
                inner.shutdown.store(true, Ordering::Release);
                inner.control_cv.notify_all();
                return Err(err);
            }
        };

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
        })
    }

    /// Reads bytes received from the peer into `buf`.
    ///
    /// Blocks until at least one byte is available and returns what is
    /// buffered, up to `buf.len()`. Returns `Ok(0)` once the peer finished
    /// sending and everything was read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] after [`Connection::close`],
    /// [`Error::ConnectionReset`] after the peer reset the connection, or
    /// [`Error::ConnectionFailed`] after repeated device failures.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut recv = lock(&self.inner.recv);

        loop {
            if recv.closed {
                return Err(Error::ConnectionClosed);
            }

            if !recv.data.is_empty() || buf.is_empty() {
                let nbytes = buf.len().min(recv.data.len());

                for (dst, src) in buf.iter_mut().zip(recv.data.drain(..nbytes)) {
                    *dst = src;
                }

                return Ok(nbytes);
            }

            if let Some(fault) = &recv.fault {
                return Err(fault.to_error());
            }

            if recv.eof {
                return Ok(0);
            }

            recv = wait(&self.inner.recv_cv, recv);
        }
    }

    /// Queues `data` for transmission.
    ///
    /// Returns the number of bytes queued, which may be less than
    /// `data.len()` when the outbound queue is nearly full. Blocks while the
    /// queue is full, up to [`Config::write_timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimedOut`] if the queue stayed full,
    /// [`Error::ConnectionClosed`] once the connection is closing, or the
    /// error that ended the connection.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let deadline = Instant::now() + self.inner.config.write_timeout;
        let mut tcb = lock(&self.inner.control);

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::ConnectionClosed);
            }

            if let Some(err) = tcb.error() {
                return Err(err);
            }

            if !tcb.state().can_send() || tcb.close_requested() {
                return Err(Error::ConnectionClosed);
            }

            if data.is_empty() {
                return Ok(0);
            }

            let nbytes = tcb.enqueue(data);

            if nbytes > 0 {
                trace!("[{}] queued {nbytes} bytes", self.inner.sock);
                self.inner.control_cv.notify_all();
                return Ok(nbytes);
            }

            let now = Instant::now();

            if now >= deadline {
                debug!(
                    "[{}] outbound queue full for {:?}",
                    self.inner.sock, self.inner.config.write_timeout
                );
                return Err(Error::TimedOut);
            }

            tcb = wait_timeout(&self.inner.control_cv, tcb, deadline - now);
        }
    }

    /// Closes the connection.
    ///
    /// Queued data is sent, followed by a FIN. Waits up to
    /// [`Config::close_timeout`] for the FIN to be acknowledged and for the
    /// peer's FIN, then stops both threads. Subsequent reads and writes fail
    /// with [`Error::ConnectionClosed`]. Closing an already closed connection
    /// does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimedOut`] if the FIN exchange did not complete in
    /// time. The connection is closed regardless.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.finish();

        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.control_cv.notify_all();

        {
            let mut recv = lock(&self.inner.recv);
            recv.closed = true;
            recv.data.clear();
            self.inner.recv_cv.notify_all();
        }

        for worker in lock(&self.workers).drain(..) {
            if worker.join().is_err() {
                error!("[{}] worker thread panicked", self.inner.sock);
            }
        }

        info!("[{}] connection closed", self.inner.sock);

        result
    }

    /// Returns the current state of the connection.
    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.control).state()
    }

    /// Returns the socket address of the local half of this TCP connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.sock.src
    }

    /// Returns the socket address of the remote peer of this TCP connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.sock.dst
    }

    /// Requests the FIN and waits for the exchange to complete.
    fn finish(&self) -> Result<()> {
        let deadline = Instant::now() + self.inner.config.close_timeout;
        let mut tcb = lock(&self.inner.control);

        if tcb.request_close() {
            debug!("[{}] ({:?}) close requested", self.inner.sock, tcb.state());
            self.inner.control_cv.notify_all();
        }

        loop {
            let state = tcb.state();

            // A peer FIN completing the close still needs our ACK.
            if state.is_terminal() && !(state == ConnectionState::CLOSED && tcb.needs_ack()) {
                return Ok(());
            }

            let now = Instant::now();

            if now >= deadline {
                warn!(
                    "[{}] ({state:?}) close timed out after {:?}",
                    self.inner.sock, self.inner.config.close_timeout
                );
                return Err(Error::TimedOut);
            }

            tcb = wait_timeout(&self.inner.control_cv, tcb, deadline - now);
        }
    }
}

impl<D: Device + 'static> Drop for Connection<D> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl<D: Device + 'static> Read for Connection<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Connection::read(self, buf).map_err(io::Error::from)
    }
}

impl<D: Device + 'static> Write for Connection<D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Connection::write(self, buf).map_err(io::Error::from)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<D: Device + 'static> Read for &Connection<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Connection::read(*self, buf).map_err(io::Error::from)
    }
}

impl<D: Device + 'static> Write for &Connection<D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Connection::write(*self, buf).map_err(io::Error::from)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<D: Device> Inner<D> {
    /// Feeds a segment to the TCB and hands its delivery to the consumer.
    ///
    /// Returns `true` once the receiver has nothing left to do.
    fn on_segment(&self, seg: &TcpSegment) -> bool {
        let mut tcb = lock(&self.control);
        let delivery = tcb.on_segment(seg);

        if !delivery.data.is_empty() || delivery.fin || delivery.reset {
            let mut recv = lock(&self.recv);

            if delivery.reset {
                recv.data.clear();
                recv.fault = Some(Fault::Reset);
            }

            recv.data.extend(delivery.data);
            recv.eof |= delivery.fin;

            self.recv_cv.notify_all();
        }

        self.control_cv.notify_all();

        tcb.state().is_terminal()
    }

    /// Fails the connection and wakes every waiter.
    fn fail(&self, tcb: &mut Tcb, reason: String) {
        error!("[{}] ({:?}) {reason}", self.sock, tcb.state());

        tcb.fail(reason.clone());

        let mut recv = lock(&self.recv);
        recv.data.clear();
        recv.fault = Some(Fault::Failed(reason));

        self.recv_cv.notify_all();
        self.control_cv.notify_all();
    }
}

fn spawn_workers<D: Device + 'static>(inner: &Arc<Inner<D>>) -> Result<Vec<JoinHandle<()>>> {
    let port = inner.sock.src.port;
    let mut workers = Vec::with_capacity(2);

    let receiver = Arc::clone(inner);
    workers.push(
        thread::Builder::new()
            .name(format!("teacp-rx-{port}"))
            .spawn(move || receive_loop(receiver))?,
    );

    let sender = Arc::clone(inner);
    workers.push(
        thread::Builder::new()
            .name(format!("teacp-tx-{port}"))
            .spawn(move || send_loop(sender))?,
    );

    Ok(workers)
}

/// Waits for the reply to our SYN, returning the ACK completing the
/// handshake.
fn handshake<D: Device>(
    transport: &Transport<D>,
    tcb: &mut Tcb,
    config: &Config,
) -> Result<TcpSegment> {
    let sock = tcb.sock();
    let deadline = Instant::now() + config.connect_timeout;
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

    loop {
        if Instant::now() >= deadline {
            debug!("[{sock}] (SYN_SENT) no reply after {:?}", config.connect_timeout);
            return Err(Error::TimedOut);
        }

        let nbytes = match transport.read(&mut buf) {
            Ok(nbytes) => nbytes,
            Err(Error::TimedOut) => continue,
            Err(Error::Parse(err)) => {
                debug!("[{sock}] discarding malformed datagram: {err}");
                continue;
            }
            Err(err) => return Err(err),
        };

        if let Some(seg) = accept_segment(&sock, &buf[..nbytes]) {
            return tcb.on_syn_ack(&seg);
        }
    }
}

fn receive_loop<D: Device>(inner: Arc<Inner<D>>) {
    let sock = inner.sock;
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    let mut errors = 0;

    while !inner.shutdown.load(Ordering::Acquire) {
        match inner.transport.read(&mut buf) {
            Ok(nbytes) => {
                errors = 0;

                if let Some(seg) = accept_segment(&sock, &buf[..nbytes]) {
                    if inner.on_segment(&seg) {
                        break;
                    }
                }
            }
            Err(Error::TimedOut) => {
                errors = 0;
            }
            Err(Error::Parse(err)) => {
                debug!("[{sock}] discarding malformed datagram: {err}");
            }
            Err(err) => {
                errors += 1;
                warn!(
                    "[{sock}] device read failed ({errors}/{}): {err}",
                    inner.config.max_io_errors
                );

                if errors >= inner.config.max_io_errors {
                    let mut tcb = lock(&inner.control);
                    inner.fail(&mut tcb, format!("device read failed: {err}"));
                    break;
                }
            }
        }
    }

    debug!("[{sock}] receiver stopped");
}

fn send_loop<D: Device>(inner: Arc<Inner<D>>) {
    let sock = inner.sock;
    let mut errors = 0;

    // Held while a segment is handed to the device, so the TCB never sees a
    // reply to a segment it has not recorded as sent.
    let mut tcb = lock(&inner.control);

    while !inner.shutdown.load(Ordering::Acquire) {
        let Some(seg) = tcb.next_segment() else {
            if tcb.state().is_terminal() {
                break;
            }

            tcb = wait_timeout(&inner.control_cv, tcb, inner.config.read_timeout);
            continue;
        };

        match transmit(&inner.transport, &sock, &seg) {
            Ok(()) => {
                errors = 0;
                tcb.on_segment_sent(&seg);
                inner.control_cv.notify_all();
            }
            Err(err) => {
                errors += 1;
                warn!(
                    "[{sock}] device write failed ({errors}/{}): {err}",
                    inner.config.max_io_errors
                );

                if errors >= inner.config.max_io_errors {
                    inner.fail(&mut tcb, format!("device write failed: {err}"));
                    break;
                }

                tcb = wait_timeout(&inner.control_cv, tcb, inner.config.read_timeout);
            }
        }
    }

    debug!("[{sock}] sender stopped");
}

/// Decodes the TCP bytes of a datagram, keeping only valid segments of this
/// connection.
fn accept_segment(sock: &Socket, bytes: &[u8]) -> Option<TcpSegment> {
    let seg = match TcpSegment::decode(bytes) {
        Ok(seg) => seg,
        Err(err) => {
            debug!("[{sock}] discarding malformed segment: {err}");
            return None;
        }
    };

    if !sock.matches(seg.tcp.src_port(), seg.tcp.dst_port()) {
        debug!(
            "[{sock}] ignoring segment for ports {} -> {}",
            seg.tcp.src_port(),
            seg.tcp.dst_port()
        );
        return None;
    }

    if !seg.is_valid_checksum(sock.dst.addr, sock.src.addr) {
        warn!("[{sock}] dropping {seg} with invalid checksum");
        return None;
    }

    trace!("[{sock}] received {seg}");

    Some(seg)
}

fn transmit<D: Device>(transport: &Transport<D>, sock: &Socket, seg: &TcpSegment) -> Result<()> {
    let bytes = seg.encode(sock.src.addr, sock.dst.addr)?;
    transport.write(&bytes)?;

    trace!("[{sock}] sent {seg}");

    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wait<'a, T>(cv: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

fn wait_timeout<'a, T>(cv: &Condvar, guard: MutexGuard<'a, T>, timeout: Duration) -> MutexGuard<'a, T> {
    match cv.wait_timeout(guard, timeout) {
        Ok((guard, _)) => guard,
        Err(poisoned) => poisoned.into_inner().0,
    }
}
