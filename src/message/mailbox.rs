use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use log::debug;

use crate::error::{Error, Result};

/// The receiving end of a communicator. Messages arrive tagged on a single
/// inbound channel; a receive for one tag keeps messages with other tags
/// that it comes across, so a later receive for their tag can have them.
///
pub struct Mailbox {
    inbound: Receiver<(u64, Vec<u8>)>,
    held: Mutex<HashMap<u64, VecDeque<Vec<u8>>>>,
}

impl Mailbox {
    pub fn new(inbound: Receiver<(u64, Vec<u8>)>) -> Self {
        Self {
            inbound,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Number of messages waiting, held or still in the channel.
    ///
    pub fn len(&self) -> usize {
        self.inbound.len() + self.lock_held().values().map(VecDeque::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn recv(&self, tag: u64) -> Result<Vec<u8>> {
        if let Some(message) = self.take_held(tag) {
            return Ok(message);
        }
        loop {
            match self.inbound.recv() {
                Ok((t, message)) if t == tag => return Ok(message),
                Ok((t, message)) => self.hold(t, message),
                Err(_) => return Err(disconnected()),
            }
        }
    }

    pub fn try_recv(&self, tag: u64) -> Result<Option<Vec<u8>>> {
        if let Some(message) = self.take_held(tag) {
            return Ok(Some(message));
        }
        loop {
            match self.inbound.try_recv() {
                Ok((t, message)) if t == tag => return Ok(Some(message)),
                Ok((t, message)) => self.hold(t, message),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(disconnected()),
            }
        }
    }

    pub fn recv_timeout(&self, tag: u64, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if let Some(message) = self.take_held(tag) {
            return Ok(Some(message));
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inbound.recv_timeout(remaining) {
                Ok((t, message)) if t == tag => return Ok(Some(message)),
                Ok((t, message)) => self.hold(t, message),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(disconnected()),
            }
        }
    }

    fn hold(&self, tag: u64, message: Vec<u8>) {
        debug!("holding message with tag {} for a later receive", tag);
        self.lock_held().entry(tag).or_default().push_back(message)
    }

    fn take_held(&self, tag: u64) -> Option<Vec<u8>> {
        self.lock_held().get_mut(&tag)?.pop_front()
    }

    fn lock_held(&self) -> std::sync::MutexGuard<'_, HashMap<u64, VecDeque<Vec<u8>>>> {
        // The map stays consistent even if a holder panicked mid-push.
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn disconnected() -> Error {
    Error::Transport("inbound channel disconnected".to_string())
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::Mailbox;
    use std::time::Duration;

    #[test]
    fn other_tags_are_held_in_order() {
        let (sink, source) = crossbeam_channel::unbounded();
        let mailbox = Mailbox::new(source);
        sink.send((1, vec![1])).unwrap();
        sink.send((1, vec![2])).unwrap();
        sink.send((0, vec![3])).unwrap();

        assert_eq!(mailbox.recv(0).unwrap(), vec![3]);
        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.try_recv(1).unwrap(), Some(vec![1]));
        assert_eq!(mailbox.recv_timeout(1, Duration::from_millis(1)).unwrap(), Some(vec![2]));
        assert_eq!(mailbox.try_recv(1).unwrap(), None);
        assert_eq!(mailbox.recv_timeout(1, Duration::from_millis(1)).unwrap(), None);
    }

    #[test]
    fn disconnected_channel_is_a_transport_error() {
        let (sink, source) = crossbeam_channel::unbounded::<(u64, Vec<u8>)>();
        let mailbox = Mailbox::new(source);
        drop(sink);
        assert!(mailbox.recv(0).is_err());
    }
}
