//! Inter-processor notification abstraction
//!
//! A [`Notifier`] is one domain's view of the interrupt lines shared with
//! its peer: `raise` fires a line on the peer, `on_notify` installs the local
//! handler for a line the peer fires at us. Handlers run in the notifier's
//! interrupt context, never on the raising thread.

use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

/// One interrupt line between the two domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotifyLine(pub u32);

impl fmt::Display for NotifyLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "irq{}", self.0)
    }
}

/// Handler invoked when the peer raises a line
pub type NotifyHandler = Arc<dyn Fn(NotifyLine) + Send + Sync + 'static>;

/// Errors that can occur when raising or registering interrupts
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterruptError {
    /// The peer's interrupt controller is gone
    #[error("Peer interrupt controller disconnected")]
    Disconnected,

    /// The interrupt context could not be started
    #[error("Interrupt context unavailable: {0}")]
    Unavailable(String),
}

/// Interrupt lines toward one peer domain
pub trait Notifier: Send + Sync {
    /// Fires `line` on the peer
    fn raise(&self, line: NotifyLine) -> Result<(), InterruptError>;

    /// Installs the local handler for `line`, replacing any previous one
    ///
    /// A line the peer raised while no handler was installed stays latched
    /// and is delivered as soon as a handler arrives.
    fn on_notify(&self, line: NotifyLine, handler: NotifyHandler) -> Result<(), InterruptError>;

    /// Removes the local handler for `line`
    fn clear_handler(&self, line: NotifyLine);
}

enum Event {
    Raise(u32),
    Stop,
}

#[derive(Default)]
struct Lines {
    handlers: HashMap<u32, NotifyHandler>,
    latched: HashSet<u32>,
}

struct Controller {
    name: String,
    lines: Mutex<Lines>,
}

impl Controller {
    fn dispatch(&self, line: u32) {
        let handler = {
            let mut lines = self.lines.lock();
            match lines.handlers.get(&line) {
                Some(handler) => Some(handler.clone()),
                None => {
                    lines.latched.insert(line);
                    None
                }
            }
        };
        match handler {
            Some(handler) => {
                trace!(target: "hal", "{}: dispatching irq{}", self.name, line);
                handler(NotifyLine(line));
            }
            None => debug!(target: "hal", "{}: latched irq{} (no handler)", self.name, line),
        }
    }

    fn run(self: Arc<Self>, events: Receiver<Event>) {
        while let Ok(event) = events.recv() {
            match event {
                Event::Raise(line) => self.dispatch(line),
                Event::Stop => break,
            }
        }
        debug!(target: "hal", "{}: interrupt context stopped", self.name);
    }
}

/// Host-side interrupt controller for one simulated domain
///
/// Each domain gets a dedicated thread standing in for its interrupt
/// context. Raising a line posts an event to the peer's thread.
pub struct HostNotifier {
    controller: Arc<Controller>,
    local: Mutex<Sender<Event>>,
    peer: Mutex<Sender<Event>>,
}

fn spawn_controller(name: &str) -> Result<(Arc<Controller>, Sender<Event>), InterruptError> {
    let controller = Arc::new(Controller {
        name: name.to_string(),
        lines: Mutex::new(Lines::default()),
    });
    let (tx, rx) = mpsc::channel();
    let worker = controller.clone();
    thread::Builder::new()
        .name(format!("irq-{}", name))
        .spawn(move || worker.run(rx))
        .map_err(|err| InterruptError::Unavailable(err.to_string()))?;
    Ok((controller, tx))
}

/// Creates the two ends of a host interrupt fabric
///
/// Lines raised on the first notifier are handled by the second and vice
/// versa.
pub fn host_interrupt_pair(
    first: &str,
    second: &str,
) -> Result<(HostNotifier, HostNotifier), InterruptError> {
    let (first_ctl, first_tx) = spawn_controller(first)?;
    let (second_ctl, second_tx) = spawn_controller(second)?;
    Ok((
        HostNotifier {
            controller: first_ctl,
            local: Mutex::new(first_tx.clone()),
            peer: Mutex::new(second_tx.clone()),
        },
        HostNotifier {
            controller: second_ctl,
            local: Mutex::new(second_tx),
            peer: Mutex::new(first_tx),
        },
    ))
}

impl HostNotifier {
    /// Returns the name of the domain this notifier belongs to
    pub fn name(&self) -> &str {
        &self.controller.name
    }

    /// Returns whether `line` is latched without a handler
    pub fn is_latched(&self, line: NotifyLine) -> bool {
        self.controller.lines.lock().latched.contains(&line.0)
    }
}

impl Notifier for HostNotifier {
    fn raise(&self, line: NotifyLine) -> Result<(), InterruptError> {
        self.peer
            .lock()
            .send(Event::Raise(line.0))
            .map_err(|_| InterruptError::Disconnected)
    }

    fn on_notify(&self, line: NotifyLine, handler: NotifyHandler) -> Result<(), InterruptError> {
        let was_latched = {
            let mut lines = self.controller.lines.lock();
            lines.handlers.insert(line.0, handler);
            lines.latched.remove(&line.0)
        };
        if was_latched {
            self.local
                .lock()
                .send(Event::Raise(line.0))
                .map_err(|_| InterruptError::Disconnected)?;
        }
        Ok(())
    }

    fn clear_handler(&self, line: NotifyLine) {
        self.controller.lines.lock().handlers.remove(&line.0);
    }
}

impl Drop for HostNotifier {
    fn drop(&mut self) {
        let _ = self.local.lock().send(Event::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn test_raise_reaches_peer_handler() {
        let (gpp, dsp) = host_interrupt_pair("gpp", "dsp").unwrap();
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        dsp.on_notify(
            NotifyLine(3),
            Arc::new(move |line| {
                let _ = tx.lock().send(line);
            }),
        )
        .unwrap();

        gpp.raise(NotifyLine(3)).unwrap();
        let line = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(line, NotifyLine(3));
    }

    #[test]
    fn test_raise_without_handler_is_latched() {
        let (gpp, dsp) = host_interrupt_pair("gpp", "dsp").unwrap();
        gpp.raise(NotifyLine(1)).unwrap();

        let mut waited = 0;
        while !dsp.is_latched(NotifyLine(1)) && waited < 100 {
            thread::sleep(Duration::from_millis(5));
            waited += 1;
        }
        assert!(dsp.is_latched(NotifyLine(1)));

        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        dsp.on_notify(
            NotifyLine(1),
            Arc::new(move |line| {
                let _ = tx.lock().send(line);
            }),
        )
        .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            NotifyLine(1)
        );
        assert!(!dsp.is_latched(NotifyLine(1)));
    }

    #[test]
    fn test_raise_after_peer_dropped() {
        let (gpp, dsp) = host_interrupt_pair("gpp", "dsp").unwrap();
        drop(dsp);

        let mut result = Ok(());
        for _ in 0..100 {
            result = gpp.raise(NotifyLine(0));
            if result.is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(result, Err(InterruptError::Disconnected));
    }

    #[test]
    fn test_line_display() {
        assert_eq!(NotifyLine(4).to_string(), "irq4");
    }
}
