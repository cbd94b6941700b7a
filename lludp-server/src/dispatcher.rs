//! Packet Dispatcher
//!
//! Routes decoded packets to the callbacks registered for their message
//! id, in registration order.

use lludp_protocol::{AgentId, MessageId, Packet};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

/// Handler invoked for every packet of a registered message id
pub type PacketCallback = Arc<dyn Fn(&Packet, AgentId) -> anyhow::Result<()> + Send + Sync>;

/// Message id to callback registry
#[derive(Default)]
pub struct Dispatcher {
    callbacks: RwLock<HashMap<MessageId, Vec<PacketCallback>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback for `message_id`
    pub fn register<F>(&self, message_id: MessageId, callback: F)
    where
        F: Fn(&Packet, AgentId) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_shared(message_id, Arc::new(callback));
    }

    /// Append an already shared callback for `message_id`
    pub fn register_shared(&self, message_id: MessageId, callback: PacketCallback) {
        self.callbacks
            .write()
            .entry(message_id)
            .or_default()
            .push(callback);
    }

    /// Number of callbacks registered for `message_id`
    pub fn callback_count(&self, message_id: MessageId) -> usize {
        self.callbacks
            .read()
            .get(&message_id)
            .map_or(0, |callbacks| callbacks.len())
    }

    /// Invoke every callback registered for the packet's message id
    ///
    /// A callback that fails or panics is logged and does not stop the
    /// others. Returns the number of callbacks invoked.
    pub fn dispatch(&self, packet: &Packet, agent: AgentId) -> usize {
        // Snapshot so callbacks may register more handlers
        let callbacks = match self.callbacks.read().get(&packet.message_id) {
            Some(callbacks) => callbacks.clone(),
            None => {
                trace!(message = %packet.message_id, agent = %agent, "No callbacks registered");
                return 0;
            }
        };

        for callback in &callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(packet, agent))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        message = %packet.message_id,
                        agent = %agent,
                        seq = packet.sequence(),
                        "Packet callback failed: {:#}",
                        e
                    );
                }
                Err(_) => {
                    error!(
                        message = %packet.message_id,
                        agent = %agent,
                        seq = packet.sequence(),
                        "Packet callback panicked"
                    );
                }
            }
        }

        callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn packet(id: MessageId) -> Packet {
        Packet::new(id, vec![1, 2, 3])
    }

    #[test]
    fn test_registration_order() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let calls = calls.clone();
            dispatcher.register(
                MessageId::High(5),
                move |_, _| {
                    calls.lock().push(tag);
                    Ok(())
                },
            );
        }

        assert_eq!(dispatcher.dispatch(&packet(MessageId::High(5)), AgentId::NIL), 3);
        assert_eq!(*calls.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unregistered_ignored() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.dispatch(&packet(MessageId::Low(400)), AgentId::NIL), 0);
        assert_eq!(dispatcher.callback_count(MessageId::Low(400)), 0);
    }

    #[test]
    fn test_agent_passed_through() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        dispatcher.register(
            MessageId::Medium(8),
            move |packet, agent| {
                *s.lock() = Some((packet.body.clone(), agent));
                Ok(())
            },
        );

        let agent = AgentId::from_u128(77);
        dispatcher.dispatch(&packet(MessageId::Medium(8)), agent);
        let (body, who) = seen.lock().clone().unwrap();
        assert_eq!(&body[..], &[1, 2, 3]);
        assert_eq!(who, agent);
    }

    #[test]
    fn test_failing_callbacks_isolated() {
        let dispatcher = Dispatcher::new();
        let reached = Arc::new(Mutex::new(0));

        dispatcher.register(MessageId::High(1), |_, _| anyhow::bail!("boom"));
        dispatcher.register(MessageId::High(1), |_, _| -> anyhow::Result<()> {
            panic!("callback panic")
        });
        let r = reached.clone();
        dispatcher.register(MessageId::High(1), move |_, _| {
            *r.lock() += 1;
            Ok(())
        });

        assert_eq!(dispatcher.dispatch(&packet(MessageId::High(1)), AgentId::NIL), 3);
        assert_eq!(*reached.lock(), 1);
    }
}
