use std::time::Duration;

use crossbeam_channel::Sender;

use super::{comm::Communicator, mailbox::Mailbox};
use crate::error::{Error, Result};

/// A communicator for a group of workers living in the same process, each
/// on its own thread. Every member holds a sender to every peer's mailbox,
/// itself included.
///
pub struct LocalCommunicator {
    rank: usize,
    peers: Vec<Sender<(u64, Vec<u8>)>>,
    mailbox: Mailbox,
}

impl LocalCommunicator {
    /// Create a group of `size` connected communicators. The one at index
    /// `i` has rank `i`; each is meant to be moved to its own thread.
    ///
    pub fn group(size: usize) -> Vec<LocalCommunicator> {
        let (sinks, sources): (Vec<_>, Vec<_>) =
            (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        sources
            .into_iter()
            .enumerate()
            .map(|(rank, source)| LocalCommunicator {
                rank,
                peers: sinks.clone(),
                mailbox: Mailbox::new(source),
            })
            .collect()
    }

    /// A group of one, for running a single worker.
    ///
    pub fn solo() -> Self {
        let mut group = Self::group(1);
        group.remove(0)
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, tag: u64, message: Vec<u8>) -> Result<()> {
        let peer = self.peers.get(rank).ok_or_else(|| {
            Error::Transport(format!("no peer with rank {} in a group of {}", rank, self.size()))
        })?;
        peer.send((tag, message))
            .map_err(|_| Error::Transport(format!("peer {} has hung up", rank)))
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




// ============================================================================
#[cfg(test)]
mod test {

    use super::LocalCommunicator;
    use crate::message::comm::Communicator;
    use std::thread;

    fn sum(a: Vec<u8>, b: Vec<u8>) -> Vec<u8> {
        let a = u64::from_le_bytes(a.try_into().unwrap());
        let b = u64::from_le_bytes(b.try_into().unwrap());
        (a + b).to_le_bytes().to_vec()
    }

    #[test]
    fn send_and_recv_between_threads() {
        let mut group = LocalCommunicator::group(2);
        let b = group.pop().unwrap();
        let a = group.pop().unwrap();

        let handle = thread::spawn(move || {
            let message = b.recv(5).unwrap();
            b.send(0, 6, message.iter().map(|x| x * 2).collect()).unwrap();
        });
        a.send(1, 5, vec![1, 2, 3]).unwrap();
        assert_eq!(a.recv(6).unwrap(), vec![2, 4, 6]);
        handle.join().unwrap();
    }

    #[test]
    fn send_to_unknown_rank_fails() {
        let solo = LocalCommunicator::solo();
        assert!(solo.send(3, 0, vec![]).is_err());
        solo.send(0, 0, vec![9]).unwrap();
        assert_eq!(solo.try_recv(0).unwrap(), Some(vec![9]));
    }

    #[test]
    fn all_reduce_sums_over_every_group_size() {
        for size in 1..=7 {
            let handles: Vec<_> = LocalCommunicator::group(size)
                .into_iter()
                .map(|comm| {
                    thread::spawn(move || {
                        let mine = (comm.rank() as u64 + 1).to_le_bytes().to_vec();
                        comm.all_reduce(sum, mine).unwrap()
                    })
                })
                .collect();

            let expected = (size * (size + 1) / 2) as u64;
            for handle in handles {
                let total = handle.join().unwrap();
                assert_eq!(u64::from_le_bytes(total.try_into().unwrap()), expected);
            }
        }
    }
}
