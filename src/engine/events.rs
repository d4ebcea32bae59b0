// Event bus for cache invalidation observers
// Named events are dispatched to sync and async observers, in or out of a runtime

//! # Event System
//!
//! Writers publish named [`Event`]s; observers registered for that name react
//! to them. The bus is an explicitly constructed value: build it once with
//! [`EventBus::init`], hand clones to every publisher and subscriber, and call
//! [`EventBus::shutdown`] at teardown.
//!
//! ## Dispatch Paths
//!
//! - [`EventBus::notify`]: runs sync observers inline
//! - [`EventBus::dispatch`]: sync observers on the blocking pool, then the
//!   async ones
//! - [`EventBus::notify_async`]: runs async observers concurrently, awaits them
//! - [`EventBus::publish`]: fire-and-forget. Inside a tokio runtime the
//!   dispatch is spawned onto it; outside any runtime it is handed to a small
//!   dedicated worker pool, so the call never blocks the writer
//! - [`EventBus::notify_blocking`]: for scripts that must wait for observers.
//!   Refuses to run inside a runtime with [`RouterCacheError::InsideRuntime`]
//!
//! ## Error Isolation
//!
//! Each registration carries `isolate_errors`. An isolated observer's failure
//! is logged and dropped; a non-isolated failure is returned to the caller of
//! `notify`/`notify_async` as [`RouterCacheError::Observer`] after the other
//! observers have run. Fire-and-forget dispatch can only log.
//!
//! ## Rust Learning Notes:
//!
//! ### Runtimes in drop
//! Dropping a tokio `Runtime` from async code panics because it blocks while
//! joining worker threads. The worker pool therefore uses
//! `shutdown_background` when dropped and moves the bounded
//! `shutdown_timeout` onto a blocking thread during an orderly shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::models::Event;
use crate::{Result, RouterCacheError};

/// Observer run inline by [`EventBus::notify`].
pub trait Observer: Send + Sync {
    fn perform(&self, event: &Event) -> Result<()>;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Observer awaited by [`EventBus::notify_async`] and [`EventBus::publish`].
#[async_trait::async_trait]
pub trait AsyncObserver: Send + Sync {
    async fn perform(&self, event: &Event) -> Result<()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Event bus settings.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Threads of the fallback worker pool used outside a runtime
    pub worker_threads: usize,
    /// Upper bound on draining in-flight dispatches at shutdown
    pub shutdown_grace: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            worker_threads: 5,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

struct Registration<H: ?Sized> {
    handler: Arc<H>,
    isolate_errors: bool,
}

impl<H: ?Sized> Clone for Registration<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            isolate_errors: self.isolate_errors,
        }
    }
}

fn same_handler<H: ?Sized>(a: &Arc<H>, b: &Arc<H>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Fixed-size runtime used when publishing from outside any runtime.
struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
}

impl WorkerPool {
    fn new(worker_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("router-cache-events")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
        })
    }

    fn handle(&self) -> Option<Handle> {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|runtime| runtime.handle().clone())
    }

    fn take(&self) -> Option<Runtime> {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.take() {
            runtime.shutdown_background();
        }
    }
}

struct EventBusInner {
    config: EventBusConfig,
    sync_observers: DashMap<String, Vec<Registration<dyn Observer>>>,
    async_observers: DashMap<String, Vec<Registration<dyn AsyncObserver>>>,
    tracker: TaskTracker,
    pool: WorkerPool,
}

/// Process-wide publish/subscribe register. Cheap to clone.
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl EventBus {
    /// Create the bus and start its fallback worker pool.
    pub fn init(config: EventBusConfig) -> Result<Self> {
        let pool = WorkerPool::new(config.worker_threads)?;
        debug!(worker_threads = config.worker_threads, "Event bus initialized");

        Ok(Self {
            inner: Arc::new(EventBusInner {
                config,
                sync_observers: DashMap::new(),
                async_observers: DashMap::new(),
                tracker: TaskTracker::new(),
                pool,
            }),
        })
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// Register a sync observer. Registering the same handler twice for one
    /// event name is a no-op.
    pub fn subscribe(&self, event_name: &str, handler: Arc<dyn Observer>, isolate_errors: bool) {
        let mut registrations = self
            .inner
            .sync_observers
            .entry(event_name.to_string())
            .or_default();
        if registrations
            .iter()
            .any(|existing| same_handler(&existing.handler, &handler))
        {
            return;
        }
        debug!(event = event_name, observer = handler.name(), "Sync observer registered");
        registrations.push(Registration {
            handler,
            isolate_errors,
        });
    }

    /// Register an async observer. Registering the same handler twice for one
    /// event name is a no-op.
    pub fn subscribe_async(
        &self,
        event_name: &str,
        handler: Arc<dyn AsyncObserver>,
        isolate_errors: bool,
    ) {
        let mut registrations = self
            .inner
            .async_observers
            .entry(event_name.to_string())
            .or_default();
        if registrations
            .iter()
            .any(|existing| same_handler(&existing.handler, &handler))
        {
            return;
        }
        debug!(event = event_name, observer = handler.name(), "Async observer registered");
        registrations.push(Registration {
            handler,
            isolate_errors,
        });
    }

    /// Number of sync plus async observers registered for `event_name`.
    pub fn observer_count(&self, event_name: &str) -> usize {
        let sync = self
            .inner
            .sync_observers
            .get(event_name)
            .map_or(0, |r| r.len());
        let async_ = self
            .inner
            .async_observers
            .get(event_name)
            .map_or(0, |r| r.len());
        sync + async_
    }

    fn sync_registrations(&self, event_name: &str) -> Vec<Registration<dyn Observer>> {
        self.inner
            .sync_observers
            .get(event_name)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    fn async_registrations(&self, event_name: &str) -> Vec<Registration<dyn AsyncObserver>> {
        self.inner
            .async_observers
            .get(event_name)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Run every sync observer for `event`.
    pub fn notify(&self, event: &Event) -> Result<()> {
        let mut first_error = None;

        for registration in self.sync_registrations(&event.name) {
            if let Err(e) = registration.handler.perform(event) {
                Self::record_failure(
                    event,
                    registration.handler.name(),
                    registration.isolate_errors,
                    e,
                    &mut first_error,
                );
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Run every async observer for `event` concurrently and wait for all.
    pub async fn notify_async(&self, event: &Event) -> Result<()> {
        let registrations = self.async_registrations(&event.name);
        let results = join_all(
            registrations
                .iter()
                .map(|registration| registration.handler.perform(event)),
        )
        .await;

        let mut first_error = None;
        for (registration, result) in registrations.iter().zip(results) {
            if let Err(e) = result {
                Self::record_failure(
                    event,
                    registration.handler.name(),
                    registration.isolate_errors,
                    e,
                    &mut first_error,
                );
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn record_failure(
        event: &Event,
        observer: &str,
        isolate_errors: bool,
        e: RouterCacheError,
        first_error: &mut Option<RouterCacheError>,
    ) {
        if isolate_errors {
            error!(event = %event.name, observer, error = %e, "Observer failed");
        } else if first_error.is_none() {
            *first_error = Some(RouterCacheError::Observer {
                event: event.name.clone(),
                message: e.to_string(),
            });
        }
    }

    /// Run sync then async observers.
    ///
    /// Sync observers may block, so they run on the blocking thread pool
    /// instead of the caller's executor.
    pub async fn dispatch(&self, event: &Event) -> Result<()> {
        let sync_result = if self.sync_registrations(&event.name).is_empty() {
            Ok(())
        } else {
            let bus = self.clone();
            let owned = event.clone();
            tokio::task::spawn_blocking(move || bus.notify(&owned))
                .await
                .map_err(|e| RouterCacheError::Runtime(e.to_string()))
                .and_then(|result| result)
        };
        let async_result = self.notify_async(event).await;
        sync_result.and(async_result)
    }

    /// Dispatch `event` without waiting for observers.
    ///
    /// Uses the current tokio runtime when there is one and the fallback
    /// worker pool otherwise. Events published after shutdown are dropped.
    pub fn publish(&self, event: Event) {
        if self.inner.tracker.is_closed() {
            warn!(event = %event.name, "Event bus is shut down, dropping event");
            return;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => match self.inner.pool.handle() {
                Some(handle) => handle,
                None => {
                    warn!(event = %event.name, "Worker pool stopped, dropping event");
                    return;
                }
            },
        };

        let bus = self.clone();
        self.inner.tracker.spawn_on(
            async move {
                if let Err(e) = bus.dispatch(&event).await {
                    error!(event = %event.name, error = %e, "Event dispatch failed");
                }
            },
            &handle,
        );
    }

    /// Dispatch `event` and block until every observer has finished.
    ///
    /// Only for code running outside any runtime, such as one-off scripts.
    pub fn notify_blocking(&self, event: &Event) -> Result<()> {
        let runtime = Self::blocking_runtime()?;
        runtime.block_on(self.dispatch(event))
    }

    fn blocking_runtime() -> Result<Runtime> {
        if Handle::try_current().is_ok() {
            return Err(RouterCacheError::InsideRuntime);
        }
        Ok(Builder::new_current_thread().enable_all().build()?)
    }

    /// Stop accepting events, drain in-flight dispatches within the grace
    /// period, then stop the worker pool.
    pub async fn shutdown(&self) -> Result<()> {
        let grace = self.inner.config.shutdown_grace;
        self.inner.tracker.close();

        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.inner.tracker.len(),
                "Event dispatches still running after shutdown grace period"
            );
        }

        if let Some(runtime) = self.inner.pool.take() {
            tokio::task::spawn_blocking(move || runtime.shutdown_timeout(grace))
                .await
                .map_err(|e| RouterCacheError::Runtime(e.to_string()))?;
        }

        debug!("Event bus shut down");
        Ok(())
    }

    /// [`EventBus::shutdown`] for code running outside any runtime.
    pub fn shutdown_blocking(&self) -> Result<()> {
        let runtime = Self::blocking_runtime()?;
        runtime.block_on(self.shutdown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl Observer for Counting {
        fn perform(&self, _event: &Event) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl AsyncObserver for Counting {
        async fn perform(&self, _event: &Event) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl Observer for Failing {
        fn perform(&self, _event: &Event) -> Result<()> {
            Err(RouterCacheError::NotFound("boom".to_string()))
        }
    }

    #[async_trait::async_trait]
    impl AsyncObserver for Failing {
        async fn perform(&self, _event: &Event) -> Result<()> {
            Err(RouterCacheError::NotFound("boom".to_string()))
        }
    }

    struct Signal(Mutex<mpsc::Sender<String>>);

    #[async_trait::async_trait]
    impl AsyncObserver for Signal {
        async fn perform(&self, event: &Event) -> Result<()> {
            let thread = std::thread::current().name().unwrap_or_default().to_string();
            let _ = self.0.lock().unwrap().send(format!("{}@{}", event.name, thread));
            Ok(())
        }
    }

    fn bus() -> EventBus {
        EventBus::init(EventBusConfig {
            worker_threads: 2,
            shutdown_grace: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_isolated_errors_do_not_reach_publisher() {
        let bus = bus();
        let counting = Arc::new(Counting::default());
        bus.subscribe("project_activity", Arc::new(Failing), true);
        bus.subscribe("project_activity", counting.clone(), true);
        bus.subscribe_async("project_activity", Arc::new(Failing), true);

        let event = Event::new("project_activity");
        assert_ok!(bus.notify(&event));
        assert_ok!(bus.notify_async(&event).await);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_isolated_errors_propagate() {
        let bus = bus();
        let counting = Arc::new(Counting::default());
        bus.subscribe("project_activity", Arc::new(Failing), false);
        bus.subscribe("project_activity", counting.clone(), false);
        bus.subscribe_async("project_activity", Arc::new(Failing), false);

        let event = Event::new("project_activity");
        let err = bus.notify(&event).unwrap_err();
        assert!(matches!(err, RouterCacheError::Observer { ref event, .. } if event == "project_activity"));
        // Remaining observers still ran
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        assert_err!(bus.notify_async(&event).await);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let bus = bus();
        let counting = Arc::new(Counting::default());
        bus.subscribe_async("contentbase_activity", counting.clone(), true);
        bus.subscribe_async("contentbase_activity", counting.clone(), true);
        bus.subscribe_async("project_activity", counting.clone(), true);

        assert_eq!(bus.observer_count("contentbase_activity"), 1);
        assert_eq!(bus.observer_count("project_activity"), 1);
        assert_eq!(bus.observer_count("unknown"), 0);
    }

    #[tokio::test]
    async fn test_notify_blocking_refuses_inside_runtime() {
        let bus = bus();
        let err = bus.notify_blocking(&Event::new("project_activity")).unwrap_err();
        assert!(matches!(err, RouterCacheError::InsideRuntime));
        assert!(matches!(
            bus.shutdown_blocking().unwrap_err(),
            RouterCacheError::InsideRuntime
        ));
    }

    #[test]
    fn test_notify_blocking_waits_for_observers() {
        let bus = bus();
        let counting = Arc::new(Counting::default());
        bus.subscribe_async("project_activity", counting.clone(), true);

        bus.notify_blocking(&Event::new("project_activity")).unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        bus.shutdown_blocking().unwrap();
    }

    #[tokio::test]
    async fn test_publish_returns_immediately_and_shutdown_drains() {
        let bus = bus();
        let counting = Arc::new(Counting::default());
        bus.subscribe_async("project_activity", counting.clone(), true);

        for _ in 0..3 {
            bus.publish(Event::new("project_activity"));
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);

        bus.shutdown().await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);

        // Dropped after shutdown
        bus.publish(Event::new("project_activity"));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);
    }

    struct Slow {
        calls: AtomicUsize,
    }

    impl Observer for Slow {
        fn perform(&self, _event: &Event) -> Result<()> {
            std::thread::sleep(Duration::from_millis(500));
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_blocking_sync_observer_does_not_stall_publisher() {
        let bus = bus();
        let slow = Arc::new(Slow {
            calls: AtomicUsize::new(0),
        });
        bus.subscribe("project_activity", slow.clone(), true);

        let started = std::time::Instant::now();
        bus.publish(Event::new("project_activity"));
        tokio::task::yield_now().await;
        assert!(started.elapsed() < Duration::from_millis(250));

        bus.shutdown().await.unwrap();
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_reports_sync_failures() {
        let bus = bus();
        bus.subscribe("project_activity", Arc::new(Failing), false);
        assert_err!(bus.dispatch(&Event::new("project_activity")).await);
    }

    #[test]
    fn test_publish_outside_runtime_uses_worker_pool() {
        let bus = bus();
        let (tx, rx) = mpsc::channel();
        bus.subscribe_async("project_activity", Arc::new(Signal(Mutex::new(tx))), true);

        bus.publish(Event::new("project_activity"));

        let delivered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(delivered.starts_with("project_activity@router-cache-events"));

        bus.shutdown_blocking().unwrap();
    }
}
