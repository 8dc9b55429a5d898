//! Implements a mailbox for receiving CAN messages
use core::cell::RefCell;

use critical_section::Mutex;
use defmt_or_log::warn;
use heapless::Deque;
use motocan_common::{messages::CanMessage, AtomicCell};

/// A queue of received frames to be shared between a receiving context (e.g. a CAN controller
/// IRQ) and the control loop which owns the [`CanopenDevice`](crate::CanopenDevice).
///
/// Incoming messages should be passed to [`FrameMailbox::store_message`], and drained with
/// [`CanopenDevice::process_mailbox`](crate::CanopenDevice::process_mailbox).
#[allow(missing_debug_implementations)]
pub struct FrameMailbox<const N: usize> {
    queue: Mutex<RefCell<Deque<CanMessage, N>>>,
    notify_cb: AtomicCell<Option<&'static (dyn Fn() + Sync)>>,
}

impl<const N: usize> FrameMailbox<N> {
    /// Create an empty mailbox
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(RefCell::new(Deque::new())),
            notify_cb: AtomicCell::new(None),
        }
    }

    /// Set a callback for notification when a message is stored
    ///
    /// It must be static. Usually this will be a static fn, but in some circumstances, it may be
    /// desirable to use Box::leak to pass a heap allocated closure instead.
    pub fn set_process_notify_callback(&self, callback: &'static (dyn Fn() + Sync)) {
        self.notify_cb.store(Some(callback));
    }

    /// Store a received CAN message
    ///
    /// Returns the message back if the mailbox is full.
    pub fn store_message(&self, msg: CanMessage) -> Result<(), CanMessage> {
        let result = critical_section::with(|cs| self.queue.borrow_ref_mut(cs).push_back(msg));
        match result {
            Ok(()) => {
                if let Some(notify_cb) = self.notify_cb.load() {
                    notify_cb();
                }
                Ok(())
            }
            Err(msg) => {
                warn!("Mailbox full, dropping frame 0x{:x}", msg.id().raw());
                Err(msg)
            }
        }
    }

    /// Take the oldest stored message
    pub fn take_message(&self) -> Option<CanMessage> {
        critical_section::with(|cs| self.queue.borrow_ref_mut(cs).pop_front())
    }

    /// Number of stored messages
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).len())
    }

    /// Returns true if no messages are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize> Default for FrameMailbox<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motocan_common::messages::CanId;

    #[test]
    fn test_fifo_and_overflow() {
        let mbox: FrameMailbox<2> = FrameMailbox::new();
        let a = CanMessage::new(CanId::Std(1), &[1]);
        let b = CanMessage::new(CanId::Std(2), &[2]);
        let c = CanMessage::new(CanId::Std(3), &[3]);
        assert!(mbox.store_message(a).is_ok());
        assert!(mbox.store_message(b).is_ok());
        assert_eq!(mbox.store_message(c), Err(c));
        assert_eq!(mbox.len(), 2);
        assert_eq!(mbox.take_message(), Some(a));
        assert_eq!(mbox.take_message(), Some(b));
        assert!(mbox.is_empty());
    }
}
