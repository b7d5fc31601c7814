use nf_core::frame::TickPayload;

use crate::error::SubscriberSendError;

/// Poignée opaque retournée à l'enregistrement d'un abonné.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberHandle(pub(crate) u64);

impl SubscriberHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Canal sortant d'un abonné, appelé une fois par tick sous le verrou de la
/// session. `send` ne doit pas bloquer.
pub trait Subscriber: Send {
    /// Envoie le payload du tick.
    ///
    /// # Errors
    /// Any error removes the subscriber from its session.
    fn send(&self, payload: &TickPayload) -> Result<(), SubscriberSendError>;

    /// Appelé quand l'abonné est retiré (échec, suppression de session).
    fn close(&self) {}
}

/// Abonné adossé à un canal flume borné.
///
/// File pleine ou récepteur abandonné : l'envoi échoue et l'abonné est
/// retiré de la session.
///
/// # Example
/// ```
/// use nf_core::frame::TickPayload;
/// use nf_session::subscriber::{ChannelSubscriber, Subscriber};
///
/// let (sub, rx) = ChannelSubscriber::bounded(2);
/// sub.send(&TickPayload::default()).unwrap();
/// assert!(rx.try_recv().is_ok());
/// drop(rx);
/// assert!(sub.send(&TickPayload::default()).is_err());
/// ```
pub struct ChannelSubscriber {
    tx: flume::Sender<TickPayload>,
}

impl ChannelSubscriber {
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, flume::Receiver<TickPayload>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn send(&self, payload: &TickPayload) -> Result<(), SubscriberSendError> {
        self.tx.try_send(payload.clone()).map_err(|e| match e {
            flume::TrySendError::Full(_) => SubscriberSendError::Full,
            flume::TrySendError::Disconnected(_) => SubscriberSendError::Disconnected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_reports_full() {
        let (sub, _rx) = ChannelSubscriber::bounded(1);
        sub.send(&TickPayload::default()).unwrap();
        assert_eq!(
            sub.send(&TickPayload::default()),
            Err(SubscriberSendError::Full)
        );
    }

    #[test]
    fn dropped_receiver_reports_disconnected() {
        let (sub, rx) = ChannelSubscriber::bounded(1);
        drop(rx);
        assert_eq!(
            sub.send(&TickPayload::default()),
            Err(SubscriberSendError::Disconnected)
        );
    }
}
