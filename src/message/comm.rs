use std::time::Duration;

use super::util;
use crate::error::Result;

/// Tag reserved for the collective operations provided by [`Communicator`].
pub const COLLECTIVE_TAG: u64 = 0;

/// Tag used by the task scheduler for messages between tasks.
pub const TASK_TAG: u64 = 1;

/// Interface for a group of processes that can exchange messages over a
/// network. The underlying transport can in principle be TCP, UDP, or a
/// higher level abstraction like MPI.
///
/// Messages carry a tag, and receives match on it: a message with a
/// different tag than the one asked for is kept for a later receive. Between
/// one sender and one receiver, messages with the same tag arrive in the
/// order they were sent.
///
pub trait Communicator {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peers processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately, in other words it is not allowed to block until a
    /// matching receive is posted.
    fn send(&self, rank: usize, tag: u64, message: Vec<u8>) -> Result<()>;

    /// Must be implemented to receive a message with the given tag from any
    /// of the peers. This method is allowed to block until a message is
    /// ready to be received.
    fn recv(&self, tag: u64) -> Result<Vec<u8>>;

    /// Must be implemented to receive a message with the given tag if one
    /// has already arrived, without blocking.
    fn try_recv(&self, tag: u64) -> Result<Option<Vec<u8>>>;

    /// Must be implemented to receive a message with the given tag, waiting
    /// at most `timeout` for one to arrive.
    fn recv_timeout(&self, tag: u64, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Implements a binomial tree broadcast from the root node (rank 0). The
    /// message buffer must be `Some` if this is the root node, and it must be
    /// `None` otherwise.
    ///
    fn broadcast(&self, value: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let r = self.rank();
        let p = self.size();

        let value = match value {
            Some(value) => value,
            None => self.recv(COLLECTIVE_TAG)?,
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.send(r + one, COLLECTIVE_TAG, value.clone())?
            }
        }
        Ok(value)
    }

    /// Implements a binomial tree reduce over a commutative and associative
    /// binary operator. All ranks return `None` except for the root.
    ///
    fn reduce<F>(&self, f: F, mut value: Vec<u8>) -> Result<Option<Vec<u8>>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv(COLLECTIVE_TAG)?)
                }
            } else {
                self.send(r - one, COLLECTIVE_TAG, value)?;
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// Implements an all-reduce (symmetric fold) operation over a commutative
    /// binary operator.
    ///
    fn all_reduce<F>(&self, f: F, value: Vec<u8>) -> Result<Vec<u8>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let root_value = self.reduce(f, value)?;
        self.broadcast(root_value)
    }
}
