//! Typing indicators. The server only forwards signals between two users and
//! keeps no record of who is typing; the idle cut-off lives in the client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::messages::{ClientEvent, ServerEvent};
use crate::models::UserId;
use crate::registry::{ConnectionRegistry, Outbound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Forwards `signal` from `from` to the current connection of `to`. An absent
/// target, or one that is not connected, drops the signal without error.
pub async fn relay(
    registry: &ConnectionRegistry,
    from: &UserId,
    to: Option<&UserId>,
    signal: TypingSignal,
) -> Option<Outbound> {
    let Some(to) = to else {
        debug!("Typing signal from {} has no target", from);
        return None;
    };
    let target = registry.lookup(to).await?;
    let from = from.clone();
    let event = match signal {
        TypingSignal::Start => ServerEvent::Typing { from },
        TypingSignal::Stop => ServerEvent::StopTyping { from },
    };
    Some(Outbound::new(target, event))
}

/// Client-side helper: announces typing on the first keystroke and sends
/// `stopTyping` once no keystroke arrives within the idle window.
pub struct TypingNotifier {
    counterpart: UserId,
    idle: Duration,
    events: mpsc::UnboundedSender<ClientEvent>,
    typing: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl TypingNotifier {
    pub fn new(counterpart: UserId, idle: Duration, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        TypingNotifier {
            counterpart,
            idle,
            events,
            typing: Arc::new(AtomicBool::new(false)),
            timer: None,
        }
    }

    /// Notifier using the configured idle window.
    pub fn from_config(counterpart: UserId, config: &Config, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self::new(counterpart, config.typing_idle(), events)
    }

    pub fn keystroke(&mut self) {
        if !self.typing.swap(true, Ordering::SeqCst) {
            emit(
                &self.events,
                ClientEvent::Typing {
                    to: Some(self.counterpart.clone()),
                },
            );
        }
        self.cancel_timer();

        let idle = self.idle;
        let typing = Arc::clone(&self.typing);
        let events = self.events.clone();
        let to = self.counterpart.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if typing.swap(false, Ordering::SeqCst) {
                emit(&events, ClientEvent::StopTyping { to: Some(to) });
            }
        }));
    }

    /// Ends the typing state right away, e.g. when the message is sent.
    pub fn stop(&mut self) {
        self.cancel_timer();
        if self.typing.swap(false, Ordering::SeqCst) {
            emit(
                &self.events,
                ClientEvent::StopTyping {
                    to: Some(self.counterpart.clone()),
                },
            );
        }
    }

    pub fn is_typing(&self) -> bool {
        self.typing.load(Ordering::SeqCst)
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<ClientEvent>, event: ClientEvent) {
    if let Err(e) = events.send(event) {
        debug!("Dropping {} signal: socket closed", e.0.tag());
    }
}

impl Drop for TypingNotifier {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
