//! In-process event bus with a bounded intake queue and per-event delivery
//! tasks.
//!
//! [`EventBus`] is the central publish/subscribe hub for [`Event`]s. It is
//! designed to be shared via `Arc<EventBus>` across the application; build one
//! per process (or per test) and pass it to consumers explicitly.
//!
//! Publishing enqueues on a bounded channel. A single dispatcher task drains
//! the channel and spawns one delivery task per event, so a slow handler never
//! stalls later events. The price is that two events of the same type may
//! reach subscribers out of publish order.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::EventBusConfig;
use crate::error::BusError;
use crate::event::Event;
use crate::middleware::{Middleware, Pipeline};
use crate::registry::{Handler, SubscriptionRegistry, Unsubscribe};

// ---------------------------------------------------------------------------
// EventMessage
// ---------------------------------------------------------------------------

/// Queue envelope, consumed exactly once by the dispatcher.
struct EventMessage {
    event: Arc<Event>,
    enqueued_at: Instant,
}

impl EventMessage {
    fn new(event: Event) -> Self {
        Self {
            event: Arc::new(event),
            enqueued_at: Instant::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Lifecycle state guarded by the bus mutex.
struct Lifecycle {
    running: bool,
    /// Receiver waiting for the next `start`. `None` while a dispatcher owns
    /// it, and after shutdown (the next `start` opens a fresh queue).
    receiver: Option<mpsc::Receiver<EventMessage>>,
    cancel: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
    deliveries: TaskTracker,
}

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust,no_run
/// use beacon_events::{Event, EventBus};
///
/// # async fn demo() -> Result<(), beacon_events::BusError> {
/// let bus = EventBus::default();
/// let _sub = bus.subscribe("user.created", |event| async move {
///     tracing::info!(source = %event.source, "user created");
/// });
///
/// bus.start()?;
/// bus.publish(Event::new("user.created").with_source("accounts")).await?;
/// bus.shutdown(&Default::default()).await?;
/// # Ok(())
/// # }
/// ```
pub struct EventBus {
    config: EventBusConfig,
    registry: Arc<SubscriptionRegistry>,
    pipeline: Arc<Pipeline>,
    sender: RwLock<mpsc::Sender<EventMessage>>,
    lifecycle: Mutex<Lifecycle>,
}

impl EventBus {
    /// Create a stopped bus. Events published before [`start`](Self::start)
    /// are buffered (up to the queue capacity) and delivered once started.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        Self {
            config,
            registry: Arc::new(SubscriptionRegistry::new()),
            pipeline: Arc::new(Pipeline::new()),
            sender: RwLock::new(sender),
            lifecycle: Mutex::new(Lifecycle {
                running: false,
                receiver: Some(receiver),
                cancel: CancellationToken::new(),
                dispatcher: None,
                deliveries: TaskTracker::new(),
            }),
        }
    }

    /// Append a middleware to the delivery pipeline.
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        Arc::make_mut(&mut self.pipeline).push(Arc::new(middleware));
        self
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Whether a dispatcher is currently running.
    pub fn is_running(&self) -> bool {
        self.lock_lifecycle().running
    }

    /// Number of subscribers registered for `event_type`.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.registry.count(event_type)
    }

    /// Spawn the dispatcher.
    ///
    /// Fails with [`BusError::AlreadyStarted`] if the bus is running, and
    /// with [`BusError::NoRuntime`] when called outside a Tokio runtime.
    pub fn start(&self) -> Result<(), BusError> {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.running {
            return Err(BusError::AlreadyStarted);
        }
        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;

        let receiver = match lifecycle.receiver.take() {
            Some(receiver) => receiver,
            None => {
                let (sender, receiver) = mpsc::channel(self.config.queue_capacity);
                *self.sender.write().unwrap_or_else(PoisonError::into_inner) = sender;
                receiver
            }
        };

        let cancel = CancellationToken::new();
        let deliveries = TaskTracker::new();
        let dispatcher = Dispatcher {
            receiver,
            registry: Arc::clone(&self.registry),
            pipeline: Arc::clone(&self.pipeline),
            cancel: cancel.clone(),
            deliveries: deliveries.clone(),
        };

        lifecycle.dispatcher = Some(runtime.spawn(dispatcher.run()));
        lifecycle.cancel = cancel;
        lifecycle.deliveries = deliveries;
        lifecycle.running = true;

        tracing::info!(
            queue_capacity = self.config.queue_capacity,
            middleware = self.pipeline.len(),
            "Event bus started"
        );
        Ok(())
    }

    /// Stop the dispatcher and wait for in-flight deliveries.
    ///
    /// Succeeds immediately if the bus is not running. Otherwise signals the
    /// dispatcher, closes the intake queue, and waits until every delivery
    /// task finishes, the configured shutdown timeout elapses, or `cancel`
    /// fires, whichever comes first. Delivery tasks still running when the
    /// wait ends are left to finish in the background.
    ///
    /// The bus counts as stopped once this returns, whatever the outcome, so
    /// it can be started again.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), BusError> {
        let (dispatcher, deliveries) = {
            let mut lifecycle = self.lock_lifecycle();
            if !lifecycle.running {
                return Ok(());
            }
            lifecycle.running = false;
            lifecycle.cancel.cancel();
            (lifecycle.dispatcher.take(), lifecycle.deliveries.clone())
        };

        tracing::info!("Shutting down event bus");

        let drain = async move {
            if let Some(handle) = dispatcher {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Event dispatcher task failed");
                }
            }
            deliveries.close();
            deliveries.wait().await;
        };

        let timeout = self.config.shutdown_timeout;
        tokio::select! {
            biased;
            () = drain => {
                tracing::info!("Event bus stopped");
                Ok(())
            }
            () = cancel.cancelled() => {
                tracing::warn!("Event bus shutdown canceled before deliveries drained");
                Err(BusError::ShutdownCanceled)
            }
            () = tokio::time::sleep(timeout) => {
                tracing::error!(
                    timeout_secs = timeout.as_secs_f64(),
                    "Event bus shutdown timed out, deliveries still running"
                );
                Err(BusError::ShutdownTimeout(timeout))
            }
        }
    }

    /// Enqueue an event for delivery to every current subscriber of its type.
    ///
    /// Waits while the intake queue is full; never waits for delivery itself.
    /// Fails with [`BusError::Closed`] after the bus has been shut down.
    pub async fn publish(&self, event: Event) -> Result<(), BusError> {
        let sender = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        sender
            .send(EventMessage::new(event))
            .await
            .map_err(|_| BusError::Closed)
    }

    /// Register `handler` for events of `event_type`.
    ///
    /// Handlers for one event run sequentially in registration order, inside
    /// that event's delivery task. A handler may itself subscribe or
    /// unsubscribe.
    pub fn subscribe<F, Fut>(&self, event_type: impl Into<String>, handler: F) -> Unsubscribe
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |event: Arc<Event>| -> BoxFuture<'static, ()> { handler(event).boxed() });
        self.registry.subscribe(event_type.into(), handler)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// The single task draining the intake queue.
struct Dispatcher {
    receiver: mpsc::Receiver<EventMessage>,
    registry: Arc<SubscriptionRegistry>,
    pipeline: Arc<Pipeline>,
    cancel: CancellationToken,
    deliveries: TaskTracker,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                message = self.receiver.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => {
                        tracing::debug!("All event publishers dropped");
                        break;
                    }
                },
            }
        }

        // Refuse new events, then hand off whatever was already accepted.
        self.receiver.close();
        let mut drained = 0usize;
        while let Ok(message) = self.receiver.try_recv() {
            self.dispatch(message);
            drained += 1;
        }
        tracing::debug!(drained, "Event dispatcher stopped");
    }

    fn dispatch(&self, message: EventMessage) {
        self.deliveries.spawn(deliver(
            Arc::clone(&self.registry),
            Arc::clone(&self.pipeline),
            message,
        ));
    }
}

/// Deliver one event: middleware first, then every subscriber in order.
async fn deliver(registry: Arc<SubscriptionRegistry>, pipeline: Arc<Pipeline>, message: EventMessage) {
    let queued_ms = message.enqueued_at.elapsed().as_millis() as u64;

    let event_type = message.event.event_type.clone();
    let event_id = message.event.id;
    let event = match AssertUnwindSafe(pipeline.run(message.event))
        .catch_unwind()
        .await
    {
        Ok(Ok(event)) => event,
        Ok(Err(e)) => {
            tracing::warn!(
                event_type = %event_type,
                event_id = %event_id,
                error = %e,
                "Event delivery aborted by middleware"
            );
            return;
        }
        Err(panic) => {
            tracing::error!(
                event_type = %event_type,
                event_id = %event_id,
                panic = %panic_message(panic.as_ref()),
                "Event middleware panicked, delivery aborted"
            );
            return;
        }
    };

    let subscribers = registry.snapshot(&event.event_type);
    tracing::debug!(
        event_type = %event.event_type,
        event_id = %event.id,
        subscribers = subscribers.len(),
        queued_ms,
        "Dispatching event"
    );

    for subscription in subscribers {
        let event = Arc::clone(&event);
        let handler = Arc::clone(&subscription.handler);
        let outcome = AssertUnwindSafe(async move { handler(event).await })
            .catch_unwind()
            .await;

        if let Err(panic) = outcome {
            tracing::error!(
                event_type = %subscription.event_type,
                subscription_id = %subscription.id,
                panic = %panic_message(panic.as_ref()),
                "Event handler panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
