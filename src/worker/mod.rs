//! Offline caching and push handling for the PWA, independent of the
//! browser runtime: the platform supplies the traits, `ServiceWorker`
//! drives the lifecycle and keeps every event alive until its work is done.

pub mod cache;
pub mod controller;
pub mod model;
pub mod network;
pub mod push;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{
    sync::{Mutex, RwLock, oneshot},
    task::JoinSet,
};
use tracing::{error, info, warn};

use controller::{CacheController, Interception, InstallReport};
use model::FetchRequest;
use push::{NotificationClick, PushReceiver, SubscriptionOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

impl WorkerState {
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, WorkerState::Activated)
    }
}

#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch {
        request: FetchRequest,
        respond_to: oneshot::Sender<Interception>,
    },
    Push {
        data: Option<Vec<u8>>,
    },
    NotificationClick(NotificationClick),
    PushSubscriptionChange {
        previous: Option<SubscriptionOptions>,
    },
}

struct WorkerInner {
    controller: CacheController,
    receiver: PushReceiver,
    state: RwLock<WorkerState>,
    controls_clients: AtomicBool,
}

pub struct ServiceWorker {
    inner: Arc<WorkerInner>,
    pending: Mutex<JoinSet<()>>,
}

impl ServiceWorker {
    pub fn new(controller: CacheController, receiver: PushReceiver) -> Self {
        ServiceWorker {
            inner: Arc::new(WorkerInner {
                controller,
                receiver,
                state: RwLock::new(WorkerState::Parsed),
                controls_clients: AtomicBool::new(false),
            }),
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub async fn state(&self) -> WorkerState {
        *self.inner.state.read().await
    }

    /// Set once activation has claimed the open clients.
    pub fn controls_clients(&self) -> bool {
        self.inner.controls_clients.load(Ordering::Acquire)
    }

    pub fn controller(&self) -> &CacheController {
        &self.inner.controller
    }

    /// Runs the event as a tracked task; `settle` waits for it.
    pub async fn dispatch(&self, event: WorkerEvent) {
        let inner = self.inner.clone();
        let mut pending = self.pending.lock().await;
        while let Some(done) = pending.try_join_next() {
            if let Err(e) = done {
                error!(error = %e, "Worker event task failed");
            }
        }
        pending.spawn(async move { inner.handle(event).await });
    }

    /// Install followed directly by activation (skip waiting).
    pub async fn start(&self) -> InstallReport {
        let report = self.inner.install().await;
        self.inner.activate().await;
        report
    }

    pub async fn fetch(&self, request: FetchRequest) -> Interception {
        let (respond_to, response) = oneshot::channel();
        self.dispatch(WorkerEvent::Fetch {
            request,
            respond_to,
        })
        .await;
        response.await.unwrap_or(Interception::Passthrough)
    }

    /// Waits until every dispatched event has finished, including events
    /// dispatched while waiting. The lock is not held across the wait.
    pub async fn settle(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.pending.lock().await);
            if batch.is_empty() {
                return;
            }
            while let Some(joined) = batch.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Worker event task failed");
                }
            }
        }
    }
}

impl WorkerInner {
    async fn handle(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Install => {
                self.install().await;
                self.activate().await;
            }
            WorkerEvent::Activate => self.activate().await,
            WorkerEvent::Fetch {
                request,
                respond_to,
            } => {
                let response = if self.state.read().await.can_intercept_fetch() {
                    self.controller.handle_fetch(&request).await
                } else {
                    Interception::Passthrough
                };
                // Receiver gone means the page stopped waiting.
                let _ = respond_to.send(response);
            }
            WorkerEvent::Push { data } => {
                if let Err(e) = self.receiver.on_push(data.as_deref()).await {
                    warn!(error = %e, "Could not show notification");
                }
            }
            WorkerEvent::NotificationClick(click) => {
                if let Err(e) = self.receiver.on_notification_click(click).await {
                    warn!(error = %e, "Notification click routing failed");
                }
            }
            WorkerEvent::PushSubscriptionChange { previous } => {
                self.receiver.on_subscription_change(previous).await;
            }
        }
    }

    async fn install(&self) -> InstallReport {
        *self.state.write().await = WorkerState::Installing;
        info!("Service Worker installing");
        let report = self.controller.install().await;
        *self.state.write().await = WorkerState::Installed;
        report
    }

    async fn activate(&self) {
        {
            let mut state = self.state.write().await;
            if *state != WorkerState::Installed {
                warn!(state = ?*state, "Activate ignored, worker not installed");
                return;
            }
            *state = WorkerState::Activating;
        }
        info!("Service Worker activating");
        let deleted = self.controller.activate().await;
        *self.state.write().await = WorkerState::Activated;
        self.controls_clients.store(true, Ordering::Release);
        info!(deleted = deleted.len(), "Service Worker activated");
    }
}
