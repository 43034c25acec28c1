//! Cooperative cancellation over a crossbeam channel.
//!
//! Cancelling closes the underlying channel, which wakes every thread
//! blocked in a `select!` arm on the token. Each task then closes the
//! channels it owns and exits; no message ever travels on the channel
//! itself.

use crossbeam_channel::{bounded, Receiver, TryRecvError};

/// Create a linked canceller/token pair.
pub fn cancel_channel() -> (Canceller, CancelToken) {
    let (tx, rx) = bounded::<()>(0);
    (Canceller { _tx: tx }, CancelToken { rx })
}

/// The cancelling side. Calling [`Canceller::cancel`] (or dropping the
/// canceller) signals every clone of the paired [`CancelToken`].
pub struct Canceller {
    _tx: crossbeam_channel::Sender<()>,
}

impl Canceller {
    /// Signal cancellation. Consumes the canceller; the signal cannot be
    /// retracted.
    pub fn cancel(self) {
        drop(self);
    }
}

/// The observing side. Clonable; every clone observes the same signal.
///
/// Use [`CancelToken::receiver`] inside `select!` arms to wake on
/// cancellation while blocked on a send or receive.
#[derive(Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    /// Non-blocking check, for loops without a suspension point.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// The raw receiver, for `select!` arms.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::select;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn token_starts_uncancelled() {
        let (_canceller, token) = cancel_channel();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_observed_by_all_clones() {
        let (canceller, token) = cancel_channel();
        let second = token.clone();

        canceller.cancel();

        assert!(token.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[test]
    fn cancel_wakes_a_blocked_select() {
        let (canceller, token) = cancel_channel();

        let handle = thread::spawn(move || {
            select! {
                recv(token.receiver()) -> _ => true,
                default(Duration::from_secs(5)) => false,
            }
        });

        canceller.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn dropping_the_canceller_cancels() {
        let (canceller, token) = cancel_channel();
        drop(canceller);
        assert!(token.is_cancelled());
    }
}
