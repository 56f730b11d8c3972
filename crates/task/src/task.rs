// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::sync::Arc;

use anyhow::Result;
use async_broadcast::{Receiver, RecvError, Sender};
use async_trait::async_trait;
use futures::future::join_all;
use tokio::task::{spawn, JoinHandle};
use tracing::{error, info, warn};

/// Trait for events that long-running tasks handle
pub trait TaskEvent: PartialEq {
    /// The shutdown signal for this event type
    ///
    /// Note that this is necessarily uniform across all tasks.
    /// Exiting the task loop is handled by the task spawner, rather than the task individually.
    fn shutdown_event() -> Self;
}

#[async_trait]
/// Type for mutable task state that can be used as the state for a `Task`
pub trait TaskState: Send {
    /// Type of event sent and received by the task
    type Event: TaskEvent + Clone + Send + Sync;

    /// Aborts all subtasks (timers, delayed events) owned by the state.
    async fn cancel_subtasks(&mut self);

    /// Handles an event, providing direct access to the specific channel we received the event on.
    async fn handle_event(
        &mut self,
        event: Arc<Self::Event>,
        sender: &Sender<Arc<Self::Event>>,
        receiver: &Receiver<Arc<Self::Event>>,
    ) -> Result<()>;
}

/// A basic task which loops waiting for events to come from `event_receiver`
/// and then handles them using its state
/// It sends events to other `Task`s through `sender`
///
/// Events are handled one at a time in arrival order, so the state is never mutated
/// concurrently.
pub struct Task<S: TaskState> {
    /// The state of the task.  It is fed events from `receiver`
    /// and mutated via `handle_event`.
    state: S,
    /// Sends events all tasks including itself
    sender: Sender<Arc<S::Event>>,
    /// Receives events that are broadcast from any task, including itself
    receiver: Receiver<Arc<S::Event>>,
    /// The generated task id
    task_id: usize,
}

impl<S: TaskState + Send + 'static> Task<S> {
    /// Create a new task
    pub fn new(
        state: S,
        sender: Sender<Arc<S::Event>>,
        receiver: Receiver<Arc<S::Event>>,
        task_id: usize,
    ) -> Self {
        Task {
            state,
            sender,
            receiver,
            task_id,
        }
    }

    /// The state of the task, as a boxed dynamic trait object.
    fn boxed_state(self) -> Box<dyn TaskState<Event = S::Event>> {
        Box::new(self.state) as Box<dyn TaskState<Event = S::Event>>
    }

    /// Spawn the task loop, consuming self.  Will continue until
    /// the task reaches some shutdown condition
    pub fn run(mut self) -> WrappedHandle<S::Event> {
        let task_id = self.task_id;
        let handle = spawn(async move {
            loop {
                match self.receiver.recv_direct().await {
                    Ok(input) => {
                        if *input == S::Event::shutdown_event() {
                            self.state.cancel_subtasks().await;

                            break self.boxed_state();
                        }
                        let _ =
                            S::handle_event(&mut self.state, input, &self.sender, &self.receiver)
                                .await
                                .inspect_err(|e| info!("{e}"));
                    }
                    Err(RecvError::Overflowed(missed)) => {
                        warn!("Task {task_id} lagged behind and missed {missed} events");
                    }
                    Err(RecvError::Closed) => {
                        error!("Event stream of task {task_id} closed");
                        self.state.cancel_subtasks().await;

                        break self.boxed_state();
                    }
                }
            }
        });
        WrappedHandle { handle, task_id }
    }
}

/// Wrapper to have the task id as well as the join handle so we can map
pub struct WrappedHandle<EVENT> {
    /// handle for the task
    pub handle: JoinHandle<Box<dyn TaskState<Event = EVENT>>>,
    /// given task id
    pub task_id: usize,
}

#[derive(Default)]
/// A collection of tasks which can handle shutdown
pub struct ConsensusTaskRegistry<EVENT> {
    /// Tasks this registry controls
    pub task_handles: Vec<WrappedHandle<EVENT>>,
}

impl<EVENT: Send + Sync + Clone + TaskEvent> ConsensusTaskRegistry<EVENT> {
    #[must_use]
    /// Create a new task registry
    pub fn new() -> Self {
        ConsensusTaskRegistry {
            task_handles: vec![],
        }
    }

    /// Add a task to the registry
    pub fn register(&mut self, handle: WrappedHandle<EVENT>) {
        self.task_handles.push(handle);
    }

    /// Wait for every task to return its state, then cancel the subtasks it still owns.
    ///
    /// Callers broadcast the shutdown event first; a task that panicked is logged and skipped.
    pub async fn shutdown(&mut self) {
        let handles = &mut self.task_handles;

        while let Some(wrapped_handle) = handles.pop() {
            match wrapped_handle.handle.await {
                Ok(mut task_state) => task_state.cancel_subtasks().await,
                Err(e) => error!("Task {} failed to join: {e}", wrapped_handle.task_id),
            }
        }
    }

    /// Take a task, run it, and register it
    pub fn run_task<S>(&mut self, task: Task<S>)
    where
        S: TaskState<Event = EVENT> + Send + 'static,
    {
        self.register(task.run());
    }

    /// Wait for the results of all the tasks registered
    ///
    /// Tasks that panicked are dropped from the result.
    pub async fn join_all(self) -> Vec<Box<dyn TaskState<Event = EVENT>>> {
        let handles: Vec<JoinHandle<Box<dyn TaskState<Event = EVENT>>>> = self
            .task_handles
            .into_iter()
            .map(|wrapped| wrapped.handle)
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| joined.inspect_err(|e| error!("{e}")).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum CountEvent {
        Add(u64),
        Shutdown,
    }

    impl TaskEvent for CountEvent {
        fn shutdown_event() -> Self {
            CountEvent::Shutdown
        }
    }

    struct Counter {
        total: u64,
        seen: Sender<u64>,
    }

    #[async_trait]
    impl TaskState for Counter {
        type Event = CountEvent;

        async fn cancel_subtasks(&mut self) {}

        async fn handle_event(
            &mut self,
            event: Arc<CountEvent>,
            _sender: &Sender<Arc<CountEvent>>,
            _receiver: &Receiver<Arc<CountEvent>>,
        ) -> Result<()> {
            if let CountEvent::Add(n) = *event {
                self.total += n;
                self.seen.broadcast_direct(self.total).await?;
            }
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn events_are_handled_in_order_until_shutdown() {
        let (tx, rx) = async_broadcast::broadcast(16);
        let (seen_tx, mut seen_rx) = async_broadcast::broadcast(16);
        let mut registry = ConsensusTaskRegistry::new();
        registry.run_task(Task::new(
            Counter {
                total: 0,
                seen: seen_tx,
            },
            tx.clone(),
            rx,
            0,
        ));

        for n in [1, 2, 3] {
            tx.broadcast_direct(Arc::new(CountEvent::Add(n))).await.unwrap();
        }
        assert_eq!(seen_rx.recv().await.unwrap(), 1);
        assert_eq!(seen_rx.recv().await.unwrap(), 3);
        assert_eq!(seen_rx.recv().await.unwrap(), 6);

        tx.broadcast_direct(Arc::new(CountEvent::Shutdown)).await.unwrap();
        let states = registry.join_all().await;
        assert_eq!(states.len(), 1);
    }
}
