//! Generic single-input, multi-subscriber fan-out
//!
//! A [`Broker`] owns one input channel and a set of subscribers. Its control
//! loop is the only place the subscriber set is touched: subscribe and
//! unsubscribe requests arrive as messages over a control channel, events
//! arrive over the input, and every event is offered to every subscriber
//! without blocking (see [`Subscribers::publish`]).
//!
//! Subscriptions are tied to a [`CancellationToken`]; a watchdog task turns
//! the token's cancellation into an unsubscribe request.

use crate::error::BrokerError;
use crate::subscription::{SubscriptionId, Subscribers};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;

/// How long a cancelled subscription waits for the control loop to accept
/// its unsubscribe request before giving up.
pub const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(1);

const CONTROL_CAPACITY: usize = 32;

#[derive(Debug)]
enum Control<T> {
    Subscribe {
        id: SubscriptionId,
        out: mpsc::Sender<T>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
}

pub struct Broker<T> {
    input: mpsc::Receiver<T>,
    control_rx: mpsc::Receiver<Control<T>>,
    handle: BrokerHandle<T>,
    active: Subscribers<T>,
}

/// Cloneable entry point for subscribing to a running [`Broker`].
pub struct BrokerHandle<T> {
    control: mpsc::Sender<Control<T>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for BrokerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T: Clone + Send + 'static> Broker<T> {
    pub fn new(input: mpsc::Receiver<T>) -> Self {
        let (control, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        Self {
            input,
            control_rx,
            handle: BrokerHandle {
                control,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            active: Subscribers::new(),
        }
    }

    pub fn handle(&self) -> BrokerHandle<T> {
        self.handle.clone()
    }

    /// Runs the control loop until `token` is cancelled or the input closes.
    ///
    /// Every remaining subscription is closed on the way out. The returned
    /// error tells the two exits apart: [`BrokerError::ContextCancelled`] for
    /// a requested shutdown, [`BrokerError::InputClosed`] when the upstream
    /// producer went away.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), BrokerError> {
        let reason = loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    info!("Broker stopping: context cancelled");
                    break BrokerError::ContextCancelled;
                }

                Some(control) = self.control_rx.recv() => {
                    self.apply(control);
                }

                item = self.input.recv() => {
                    match item {
                        Some(item) => {
                            for id in self.active.publish(&item) {
                                self.active.remove(id);
                            }
                        }
                        None => {
                            info!("Broker stopping: input closed");
                            break BrokerError::InputClosed;
                        }
                    }
                }
            }
        };

        let closed = self.active.close_all();
        debug!("Broker closed {} subscriptions", closed);
        Err(reason)
    }

    fn apply(&mut self, control: Control<T>) {
        match control {
            Control::Subscribe { id, out } => {
                self.active.insert(id, out);
                debug!("Subscribing {} ({} active)", id, self.active.len());
            }
            Control::Unsubscribe { id } => {
                if self.active.remove(id) {
                    debug!("Unsubscribing {} ({} active)", id, self.active.len());
                }
            }
        }
    }
}

impl<T: Send + 'static> BrokerHandle<T> {
    /// Adds `out` as a receiver of every future event until `token` is
    /// cancelled, at which point the subscription is removed and `out`'s
    /// channel closed.
    pub async fn subscribe(
        &self,
        token: CancellationToken,
        out: mpsc::Sender<T>,
    ) -> Result<SubscriptionId, BrokerError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.control
            .send(Control::Subscribe { id, out })
            .await
            .map_err(|_| BrokerError::Stopped)?;

        let control = self.control.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                // Broker gone; it already closed every subscription.
                _ = control.closed() => return,
            }

            match control
                .send_timeout(Control::Unsubscribe { id }, UNSUBSCRIBE_TIMEOUT)
                .await
            {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!("Abandoning unsubscribe for {}: broker did not respond", id);
                }
                Err(SendTimeoutError::Closed(_)) => {}
            }
        });

        Ok(id)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError> {
        self.control
            .send(Control::Unsubscribe { id })
            .await
            .map_err(|_| BrokerError::Stopped)
    }
}
