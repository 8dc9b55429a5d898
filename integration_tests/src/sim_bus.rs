//! A simulated CAN bus
//!
//! Every frame sent by a [`SimBusSender`] is delivered to every [`SimBusReceiver`] on the bus,
//! except the receiver paired with the sender, mirroring how a CAN controller does not receive
//! its own frames.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use motocan_common::{
    messages::CanMessage,
    traits::{CanReceiver, CanSendError, CanSender},
};

type Ports = Arc<Mutex<Vec<(usize, Sender<CanMessage>)>>>;

/// A shared bus which frames can be sent onto and received from
#[derive(Debug, Clone, Default)]
pub struct SimBus {
    ports: Ports,
    next_port: Arc<Mutex<usize>>,
}

impl SimBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_port(&self) -> usize {
        let mut next = self.next_port.lock().unwrap();
        *next += 1;
        *next
    }

    fn attach(&self, port: usize) -> SimBusReceiver {
        let (tx, rx) = unbounded();
        self.ports.lock().unwrap().push((port, tx));
        SimBusReceiver { rx }
    }

    /// Create a sender which delivers to every receiver
    pub fn new_sender(&self) -> SimBusSender {
        SimBusSender {
            port: self.allocate_port(),
            ports: self.ports.clone(),
        }
    }

    /// Create a receiver of every frame sent on the bus
    pub fn new_receiver(&self) -> SimBusReceiver {
        let port = self.allocate_port();
        self.attach(port)
    }

    /// Create a connected sender and receiver, which does not see its own frames
    pub fn new_pair(&self) -> (SimBusSender, SimBusReceiver) {
        let port = self.allocate_port();
        let rx = self.attach(port);
        (
            SimBusSender {
                port,
                ports: self.ports.clone(),
            },
            rx,
        )
    }
}

/// Sends frames onto a [`SimBus`]
#[derive(Debug, Clone)]
pub struct SimBusSender {
    port: usize,
    ports: Ports,
}

impl CanSender for SimBusSender {
    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        let ports = self.ports.lock().unwrap();
        for (port, tx) in ports.iter() {
            if *port != self.port {
                // A dropped receiver is a detached node
                let _ = tx.send(msg);
            }
        }
        Ok(())
    }
}

/// Receives frames from a [`SimBus`]
#[derive(Debug)]
pub struct SimBusReceiver {
    rx: Receiver<CanMessage>,
}

impl SimBusReceiver {
    /// Take every frame received so far
    pub fn drain(&mut self) -> Vec<CanMessage> {
        self.rx.try_iter().collect()
    }
}

impl CanReceiver for SimBusReceiver {
    type Error = RecvTimeoutError;

    fn try_recv(&mut self) -> Option<CanMessage> {
        self.rx.try_recv().ok()
    }

    fn recv(&mut self, timeout: Duration) -> Result<CanMessage, Self::Error> {
        self.rx.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motocan_common::messages::CanId;

    #[test]
    fn test_pair_does_not_echo() {
        let bus = SimBus::new();
        let (mut a_tx, mut a_rx) = bus.new_pair();
        let (_b_tx, mut b_rx) = bus.new_pair();
        let mut logger = bus.new_receiver();

        let msg = CanMessage::new(CanId::std(0x123), &[1, 2]);
        a_tx.send(msg).unwrap();
        assert_eq!(a_rx.try_recv(), None);
        assert_eq!(b_rx.try_recv(), Some(msg));
        assert_eq!(logger.drain(), vec![msg]);
        assert_eq!(
            b_rx.recv(Duration::from_millis(1)),
            Err(RecvTimeoutError::Timeout)
        );
    }
}
