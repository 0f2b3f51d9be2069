// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock container runtime and log agent

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log_helper_core::runtime::EventStream;
use log_helper_core::{ContainerEvent, ContainerRuntime, ContainerSpec, ControllerError, LogAgent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type EventSender = mpsc::UnboundedSender<Result<ContainerEvent, ControllerError>>;

/// In-memory runtime. Each call to `events()` consumes the next subscription opened with
/// `subscribe()`; once they run out the stream stays pending forever.
#[derive(Default)]
pub struct MockRuntime {
    containers: Mutex<HashMap<String, ContainerSpec>>,
    running: Mutex<Vec<String>>,
    subscriptions: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<ContainerEvent, ControllerError>>>>,
    inspect_calls: AtomicUsize,
    event_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `spec` inspectable, and listed as running when `running` is set.
    pub fn add_container(&self, spec: ContainerSpec, running: bool) {
        if running {
            self.running.lock().unwrap().push(spec.id.clone());
        }
        self.containers.lock().unwrap().insert(spec.id.clone(), spec);
    }

    /// Lists `id` as running without making it inspectable.
    pub fn add_running_id(&self, id: &str) {
        self.running.lock().unwrap().push(id.to_string());
    }

    pub fn subscribe(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().unwrap().push_back(rx);
        tx
    }

    pub fn inspect_calls(&self) -> usize {
        self.inspect_calls.load(Ordering::SeqCst)
    }

    pub fn event_calls(&self) -> usize {
        self.event_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_running(&self) -> Result<Vec<String>, ControllerError> {
        Ok(self.running.lock().unwrap().clone())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerSpec, ControllerError> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        self.containers
            .lock()
            .unwrap()
            .get(container_id)
            .cloned()
            .ok_or_else(|| ControllerError::Runtime(format!("no such container: {container_id}")))
    }

    fn events(&self) -> EventStream {
        self.event_calls.fetch_add(1, Ordering::SeqCst);
        match self.subscriptions.lock().unwrap().pop_front() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
            None => stream::pending().boxed(),
        }
    }
}

/// Log agent that runs until cancelled, or exits on its own after `exit_after`.
#[derive(Default)]
pub struct MockAgent {
    exit_after: Option<Duration>,
    prepared: AtomicBool,
    stopped: AtomicBool,
}

#[allow(dead_code)]
impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exiting_after(delay: Duration) -> Self {
        Self {
            exit_after: Some(delay),
            ..Default::default()
        }
    }

    pub fn prepared(&self) -> bool {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LogAgent for MockAgent {
    async fn prepare(&self) -> Result<(), ControllerError> {
        self.prepared.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), ControllerError> {
        match self.exit_after {
            Some(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        Err(ControllerError::AgentExited("exit status: 1".to_string()))
                    }
                    _ = cancel.cancelled() => {
                        self.stopped.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                }
            }
            None => {
                cancel.cancelled().await;
                self.stopped.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}
