use std::collections::HashMap;
use std::io::{self, prelude::*};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};

use super::backoff::{ExponentialBackoff, Retry};
use super::comm::Communicator;
use super::mailbox::Mailbox;
use super::util;
use crate::error::{Error, Result};

const ACCEPT_POLL: Duration = Duration::from_millis(10);
const RETRY_WAIT: Duration = Duration::from_millis(50);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(2000);
const RETRY_ATTEMPTS: usize = 20;

type Outbound = (usize, u64, Vec<u8>);

/// A communicator over plain TCP sockets. Each process listens on its own
/// entry of the peer table and opens one outbound connection per peer, lazily,
/// the first time it sends there.
///
/// Every frame is the payload length and the tag (both little-endian u64)
/// followed by the payload. The receiver acknowledges each frame by echoing
/// its length. Sends are queued to a background thread and return at once.
///
/// Opening a connection is retried with exponential backoff, but a frame is
/// written at most once: the receiver may already hold a frame whose ack
/// went missing, so a failed write or ack ends the sender thread. The
/// failure is reported by every later call to [`Communicator::send`].
///
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    send_sink: Option<Sender<Outbound>>,
    send_thread: Option<thread::JoinHandle<()>>,
    listen_thread: Option<thread::JoinHandle<()>>,
    loopback: Sender<(u64, Vec<u8>)>,
    mailbox: Mailbox,
    failure: Arc<Mutex<Option<String>>>,
    shutdown: Arc<AtomicBool>,
}

impl TcpCommunicator {
    /// Bind this rank's address from the peer table and start the sender and
    /// listener threads. The listening socket is bound before this returns,
    /// so peers may connect as soon as every rank has called `connect`.
    ///
    pub fn connect(rank: usize, peers: Vec<SocketAddr>) -> Result<Self> {
        let addr = *peers.get(rank).ok_or_else(|| {
            Error::Transport(format!("rank {} has no entry in a peer table of {}", rank, peers.len()))
        })?;
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!("rank {} listening on {}", rank, addr);

        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        let (send_sink, send_src) = crossbeam_channel::unbounded();
        let failure = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));

        let listen_thread = Self::start_listener(listener, recv_sink.clone(), shutdown.clone());
        let send_thread = Self::start_serial_sender(peers.clone(), send_src, failure.clone());

        Ok(Self {
            rank,
            num_peers: peers.len(),
            send_sink: Some(send_sink),
            send_thread: Some(send_thread),
            listen_thread: Some(listen_thread),
            loopback: recv_sink,
            mailbox: Mailbox::new(recv_src),
            failure,
            shutdown,
        })
    }

    fn start_serial_sender(
        peers: Vec<SocketAddr>,
        send_src: Receiver<Outbound>,
        failure: Arc<Mutex<Option<String>>>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();

            for (rank, tag, message) in send_src {
                if let Err(e) = Self::deliver(&mut table, peers[rank], rank, tag, &message) {
                    error!("giving up on peer {}: {}", peers[rank], e);
                    let mut slot = failure.lock().unwrap_or_else(|p| p.into_inner());
                    slot.get_or_insert(format!("peer {} ({}): {}", rank, peers[rank], e));
                    return;
                }
            }
        })
    }

    fn deliver(
        table: &mut HashMap<usize, TcpStream>,
        addr: SocketAddr,
        rank: usize,
        tag: u64,
        message: &[u8],
    ) -> io::Result<()> {
        if !table.contains_key(&rank) {
            table.insert(rank, Self::connect_with_retry(addr)?);
        }
        let stream = table
            .get_mut(&rank)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no stream"))?;

        let size = message.len() as u64;
        stream.write_all(&size.to_le_bytes())?;
        stream.write_all(&tag.to_le_bytes())?;
        stream.write_all(message)?;
        let ack = util::read_u64(stream)?;

        if ack != size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sent {} bytes but the receiver acknowledged {}", size, ack),
            ));
        }
        Ok(())
    }

    fn connect_with_retry(addr: SocketAddr) -> io::Result<TcpStream> {
        ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2)
            .take(RETRY_ATTEMPTS)
            .retry(
                || TcpStream::connect(addr),
                |e, delay| {
                    info!("connect to {} failed ({}), retrying in {:?}", addr, e, delay);
                    thread::sleep(delay)
                },
            )
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::NotConnected, "no attempts made")))
    }

    fn start_listener(
        listener: TcpListener,
        recv_sink: Sender<(u64, Vec<u8>)>,
        shutdown: Arc<AtomicBool>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, remote)) => {
                        if let Err(e) = stream.set_nonblocking(false) {
                            error!("could not configure connection from {}: {}", remote, e);
                            continue;
                        }
                        Self::handle_connection(stream, remote, recv_sink.clone());
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                    Err(e) => {
                        error!("accept failed: {}", e);
                        thread::sleep(ACCEPT_POLL)
                    }
                }
            }
        })
    }

    fn handle_connection(mut stream: TcpStream, remote: SocketAddr, recv_sink: Sender<(u64, Vec<u8>)>) {
        info!("receiving connection from {}", remote);
        thread::spawn(move || loop {
            let frame = util::read_u64(&mut stream).and_then(|size| {
                let tag = util::read_u64(&mut stream)?;
                let bytes = util::read_bytes_vec(&mut stream, size as usize)?;
                Ok((size, tag, bytes))
            });
            match frame {
                Ok((size, tag, bytes)) => {
                    if recv_sink.send((tag, bytes)).is_err() {
                        return;
                    }
                    if let Err(e) = stream.write_all(&size.to_le_bytes()) {
                        warn!("could not acknowledge frame from {}: {}", remote, e);
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("connection from {} closed", remote);
                    return;
                }
                Err(e) => {
                    warn!("connection from {} failed: {}", remote, e);
                    return;
                }
            }
        });
    }

    fn check_failure(&self) -> Result<()> {
        match &*self.failure.lock().unwrap_or_else(|p| p.into_inner()) {
            Some(message) => Err(Error::Transport(message.clone())),
            None => Ok(()),
        }
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, tag: u64, message: Vec<u8>) -> Result<()> {
        self.check_failure()?;

        if rank >= self.num_peers {
            return Err(Error::Transport(format!("no peer with rank {} in a group of {}", rank, self.num_peers)));
        }
        if rank == self.rank {
            return self
                .loopback
                .send((tag, message))
                .map_err(|_| Error::Transport("loopback closed".to_string()));
        }
        self.send_sink
            .as_ref()
            .ok_or_else(|| Error::Transport("sender is shut down".to_string()))?
            .send((rank, tag, message))
            .map_err(|_| Error::Transport("sender thread has exited".to_string()))
    }

    fn recv(&self, tag: u64) -> Result<Vec<u8>> {
        self.mailbox.recv(tag)
    }

    fn try_recv(&self, tag: u64) -> Result<Option<Vec<u8>>> {
        self.mailbox.try_recv(tag)
    }

    fn recv_timeout(&self, tag: u64, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.mailbox.recv_timeout(tag, timeout)
    }
}

impl Drop for TcpCommunicator {
    fn drop(&mut self) {
        self.send_sink.take();

        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("sender thread panicked");
            }
        }
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(handle) = self.listen_thread.take() {
            if handle.join().is_err() {
                error!("listener thread panicked");
            }
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::TcpCommunicator;
    use crate::error::Error;
    use crate::message::comm::Communicator;
    use std::io::Read;
    use std::net::{SocketAddr, TcpListener};
    use std::thread;
    use std::time::{Duration, Instant};

    fn free_addresses(n: usize) -> Vec<SocketAddr> {
        let listeners: Vec<_> = (0..n)
            .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        listeners.iter().map(|l| l.local_addr().unwrap()).collect()
    }

    #[test]
    fn rank_outside_peer_table_is_an_error() {
        assert!(TcpCommunicator::connect(2, free_addresses(1)).is_err());
    }

    /// Accept connections for `window`, read one frame from each and hang up
    /// without acknowledging it. Returns the number of frames read.
    fn count_unacked_frames(listener: TcpListener, window: Duration) -> usize {
        listener.set_nonblocking(true).unwrap();
        let deadline = Instant::now() + window;
        let mut frames = 0;

        while Instant::now() < deadline {
            match listener.accept() {
                Ok((mut stream, _)) => {
                    stream.set_nonblocking(false).unwrap();
                    let mut header = [0; 16];
                    if stream.read_exact(&mut header).is_ok() {
                        let mut size = [0; 8];
                        size.copy_from_slice(&header[..8]);
                        let mut payload = vec![0; u64::from_le_bytes(size) as usize];
                        if stream.read_exact(&mut payload).is_ok() {
                            frames += 1;
                        }
                    }
                }
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }
        frames
    }

    #[test]
    fn missing_ack_is_fatal_and_the_frame_is_not_resent() {
        let peer = TcpListener::bind("127.0.0.1:0").unwrap();
        let peers = vec![free_addresses(1)[0], peer.local_addr().unwrap()];
        let counter = thread::spawn(move || count_unacked_frames(peer, Duration::from_millis(500)));

        let comm = TcpCommunicator::connect(0, peers).unwrap();
        comm.send(1, 1, vec![7, 7, 7]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let failed = loop {
            match comm.send(1, 1, vec![8]) {
                Err(e) => break e,
                Ok(()) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                Ok(()) => panic!("sends kept succeeding after the peer hung up"),
            }
        };
        assert!(matches!(failed, Error::Transport(_)));
        assert_eq!(counter.join().unwrap(), 1);
    }

    #[test]
    fn all_reduce_over_tcp() {
        let peers = free_addresses(3);
        let handles: Vec<_> = (0..3)
            .map(|rank| {
                let peers = peers.clone();
                thread::spawn(move || {
                    let comm = TcpCommunicator::connect(rank, peers).unwrap();
                    let total = comm
                        .all_reduce(
                            |a, b| vec![a[0] + b[0]],
                            vec![rank as u8 + 1],
                        )
                        .unwrap();
                    comm.send(rank, 9, vec![rank as u8]).unwrap();
                    assert_eq!(comm.recv(9).unwrap(), vec![rank as u8]);
                    total
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![6]);
        }
    }
}
