//! In-process transport over crossbeam channels.
//!
//! Used by the test suite and for peers that live in the same process.

use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use wlwire::ArgumentBuffer;

use crate::transport;
use crate::transport::RawMessage;
use crate::transport::Transport;
use crate::transport::TransportError;

/// A duplex channel transport.
///
/// Messages sent on one end of a [`pair`](Self::pair) are received by the
/// other and vice versa.
pub struct ChannelTransport {
    tx: Sender<RawMessage>,
    rx: Receiver<RawMessage>,
}

impl ChannelTransport {
    /// Creates a transport from separate tx and rx channels.
    pub fn new(tx: Sender<RawMessage>, rx: Receiver<RawMessage>) -> Self {
        Self { tx, rx }
    }

    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = crossbeam_channel::unbounded();
        let (tx_b, rx_b) = crossbeam_channel::unbounded();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }

    /// Number of messages waiting to be received on this end.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, target: u32, opcode: u16, args: ArgumentBuffer) -> transport::Result<()> {
        self.tx
            .send(RawMessage { target, opcode, args })
            .map_err(|_| TransportError::ConnectionLost("Channel closed".into()))
    }

    fn receive_or_timeout(&self, timeout: Option<Duration>) -> transport::Result<Option<RawMessage>> {
        match timeout {
            None => self
                .rx
                .recv()
                .map(Some)
                .map_err(|_| TransportError::ConnectionLost("Channel closed".into())),
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(message) => Ok(Some(message)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(TransportError::ConnectionLost("Channel closed".into()))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wlwire::WireArg;

    #[test]
    fn test_pair_is_duplex() {
        let (a, b) = ChannelTransport::pair();
        a.send(3, 1, ArgumentBuffer::from_slots(vec![WireArg::Uint(9)])).unwrap();
        b.send(4, 0, ArgumentBuffer::default()).unwrap();

        let at_b = b.receive_or_timeout(Some(Duration::ZERO)).unwrap().unwrap();
        assert_eq!(at_b.target, 3);
        assert_eq!(at_b.opcode, 1);
        assert_eq!(at_b.args.get(0), Some(&WireArg::Uint(9)));

        let at_a = a.receive_or_timeout(None).unwrap().unwrap();
        assert_eq!(at_a.target, 4);
    }

    #[test]
    fn test_timeout_is_empty_not_error() {
        let (a, _b) = ChannelTransport::pair();
        assert_eq!(a.receive_or_timeout(Some(Duration::from_millis(5))).unwrap(), None);
    }

    #[test]
    fn test_dropped_peer_is_connection_lost() {
        let (a, b) = ChannelTransport::pair();
        drop(b);
        assert!(matches!(
            a.send(1, 0, ArgumentBuffer::default()),
            Err(TransportError::ConnectionLost(_))
        ));
        assert!(matches!(
            a.receive_or_timeout(Some(Duration::ZERO)),
            Err(TransportError::ConnectionLost(_))
        ));
    }
}
