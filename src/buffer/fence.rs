//! Acquire fences
//!
//! A fence is a one-shot signal: the producer of a buffer signals once the surface
//! may be touched, consumers wait with a bounded timeout.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

#[derive(Debug)]
enum FenceState {
    Signaled,
    Pending(Receiver<()>),
}

/// Consumer half of a fence
#[derive(Debug)]
pub struct AcquireFence {
    state: FenceState,
}

/// Producer half of a fence
#[derive(Debug, Clone)]
pub struct FenceSignaler {
    sender: Sender<()>,
}

/// Create a pending fence and the handle that signals it.
pub fn fence_pair() -> (FenceSignaler, AcquireFence) {
    let (sender, receiver) = bounded(1);
    (
        FenceSignaler { sender },
        AcquireFence {
            state: FenceState::Pending(receiver),
        },
    )
}

impl AcquireFence {
    /// A fence with nothing to wait for
    pub fn signaled() -> Self {
        Self {
            state: FenceState::Signaled,
        }
    }

    pub fn is_signaled(&self) -> bool {
        matches!(self.state, FenceState::Signaled)
    }

    /// Block until the fence is signaled or `timeout` elapses.
    ///
    /// A fence whose producer went away without signaling never completes.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let result = match &self.state {
            FenceState::Signaled => return true,
            FenceState::Pending(receiver) => receiver.recv_timeout(timeout),
        };

        match result {
            Ok(()) => {
                self.state = FenceState::Signaled;
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("acquire fence timed out after {:?}", timeout);
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("acquire fence producer dropped without signaling");
                false
            }
        }
    }
}

impl Default for AcquireFence {
    fn default() -> Self {
        Self::signaled()
    }
}

impl FenceSignaler {
    pub fn signal(&self) {
        // a second signal finds the slot full, which is fine
        let _ = self.sender.try_send(());
    }
}
