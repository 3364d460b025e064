//! `engine` crate: workflow domain model, DAG validation, the graph
//! executor, the workflow store service and everything that starts
//! executions (dispatcher, scheduler, webhook gateway, event listener).
//!
//! [`Engine`] wires the pieces together around one [`db::Store`].

pub mod config;
pub mod dag;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod hub;
pub mod models;
pub mod notify;
pub mod retry;
pub mod scheduler;
pub mod tracker;
pub mod webhook;
pub mod worker;
pub mod workflows;

pub use config::EngineConfig;
pub use dag::{validate_dag, validate_workflow};
pub use dispatcher::{Dispatcher, TriggerRequest};
pub use error::EngineError;
pub use events::{Event, EventBus, EventTriggerListener};
pub use executor::WorkflowExecutor;
pub use hub::{ExecutionHub, LiveMessage, LiveMessageType};
pub use models::{PinnedWorkflow, WorkflowDefinition};
pub use notify::{Notifier, TracingNotifier};
pub use scheduler::{ScheduleLedger, Scheduler};
pub use webhook::{WebhookGateway, WebhookRejection};
pub use workflows::{WorkflowInput, WorkflowService};

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use db::Store;
use nodes::{CredentialStore, EnvCredentialStore, NodeRegistry};
use queue::{Job, JobQueue, WorkerPool};

use crate::worker::ExecutionWorker;

/// Builder for [`Engine`].
pub struct EngineBuilder {
    store: Arc<dyn Store>,
    registry: NodeRegistry,
    credentials: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Engine {
        let (queue, jobs) = JobQueue::new();
        let hub = ExecutionHub::new();
        let schedules = ScheduleLedger::new(self.store.clone(), self.config.schedule_failure_threshold);
        let dispatcher = Dispatcher::new(self.store.clone(), queue, hub.clone(), schedules.clone());
        let scheduler = Scheduler::new(
            self.store.clone(),
            dispatcher.clone(),
            schedules.clone(),
            self.config.scheduler_tick,
        );
        let webhooks = WebhookGateway::new(self.store.clone(), dispatcher.clone(), self.config.webhook_wait_timeout);
        let listener = EventTriggerListener::new(self.store.clone(), dispatcher.clone());
        let registry = Arc::new(self.registry);
        let workflows = WorkflowService::new(self.store.clone(), registry.clone());

        Engine {
            store: self.store,
            registry,
            workflows,
            credentials: self.credentials,
            notifier: self.notifier,
            config: self.config,
            hub,
            dispatcher,
            scheduler,
            schedules,
            webhooks,
            events: EventBus::new(),
            listener,
            jobs: Mutex::new(Some(jobs)),
        }
    }
}

/// The assembled engine. Cheap to share behind an `Arc`.
pub struct Engine {
    store: Arc<dyn Store>,
    registry: Arc<NodeRegistry>,
    workflows: WorkflowService,
    credentials: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    hub: ExecutionHub,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    schedules: ScheduleLedger,
    webhooks: WebhookGateway,
    events: EventBus,
    listener: EventTriggerListener,
    /// Taken by the first `start_workers` call.
    jobs: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

impl Engine {
    /// Built-in nodes, environment credentials, log notifications and
    /// default tuning.
    pub fn builder(store: Arc<dyn Store>) -> EngineBuilder {
        EngineBuilder {
            store,
            registry: NodeRegistry::with_builtins(),
            credentials: Arc::new(EnvCredentialStore::default()),
            notifier: Arc::new(TracingNotifier),
            config: EngineConfig::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn workflows(&self) -> &WorkflowService {
        &self.workflows
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hub(&self) -> &ExecutionHub {
        &self.hub
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn webhooks(&self) -> &WebhookGateway {
        &self.webhooks
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// An executor sharing this engine's store, registry and hub.
    pub fn executor(&self) -> WorkflowExecutor {
        WorkflowExecutor::new(
            self.store.clone(),
            self.registry.clone(),
            self.credentials.clone(),
            self.hub.clone(),
            self.config.clone(),
        )
    }

    /// Spawn the worker pool. Returns `None` when it is already running.
    pub async fn start_workers(&self) -> Option<JoinHandle<()>> {
        let jobs = self.jobs.lock().await.take()?;
        let worker = Arc::new(ExecutionWorker::new(
            self.store.clone(),
            self.executor(),
            self.notifier.clone(),
            self.schedules.clone(),
        ));
        let pool = WorkerPool::new(self.config.workers);
        Some(tokio::spawn(pool.run(jobs, worker)))
    }

    pub fn start_scheduler(&self) -> JoinHandle<()> {
        tokio::spawn(self.scheduler.clone().run())
    }

    pub fn start_event_listener(&self) -> JoinHandle<()> {
        let subscription = self.events.subscribe();
        tokio::spawn(self.listener.clone().run(subscription))
    }

    /// Start workers, recover unfinished executions, then start the
    /// scheduler and the event listener.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>, EngineError> {
        let mut handles = Vec::new();
        handles.extend(self.start_workers().await);
        let recovered = self.dispatcher.recover().await?;
        handles.push(self.start_scheduler());
        handles.push(self.start_event_listener());
        info!(
            workers = self.config.workers,
            recovered,
            "engine started"
        );
        Ok(handles)
    }
}

#[cfg(test)]
mod executor_tests;
