use std::collections::HashMap;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use conductor_backend_client::ApiError;
use conductor_backend_client::ChatTarget;
use conductor_backend_client::ConductorBackend;
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::app_event::AppCommand;
use crate::app_event::AppEvent;
use crate::app_event_sender::AppEventSender;

/// Builds a fresh transport from the current credentials. Called on
/// re-authentication; an `Err` carries a message for the user.
pub(crate) type BackendFactory =
    Arc<dyn Fn() -> Result<Arc<dyn ConductorBackend>, String> + Send + Sync>;

/// Executes [`AppCommand`]s off the event loop. Every result comes back as an
/// [`AppEvent`] on the same channel the loop reads from.
pub(crate) struct CommandRunner {
    backend: Arc<RwLock<Arc<dyn ConductorBackend>>>,
    factory: BackendFactory,
    app_event_tx: AppEventSender,
    runtime: Handle,
    /// Reader task per conversation context, tagged with its generation.
    streams: HashMap<ChatTarget, (u64, JoinHandle<()>)>,
}

impl CommandRunner {
    pub(crate) fn new(
        backend: Arc<dyn ConductorBackend>,
        factory: BackendFactory,
        app_event_tx: AppEventSender,
        runtime: Handle,
    ) -> Self {
        Self {
            backend: Arc::new(RwLock::new(backend)),
            factory,
            app_event_tx,
            runtime,
            streams: HashMap::new(),
        }
    }

    fn backend(&self) -> Arc<dyn ConductorBackend> {
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn execute(&mut self, command: AppCommand) {
        match command {
            AppCommand::SendChat {
                target,
                generation,
                prompt,
            } => self.spawn_chat(target, generation, prompt),
            AppCommand::AbortStream { target, generation } => {
                let matches = self
                    .streams
                    .get(&target)
                    .is_some_and(|(live, _)| *live == generation);
                if matches {
                    if let Some((_, handle)) = self.streams.remove(&target) {
                        tracing::debug!(%target, generation, "aborting chat stream");
                        handle.abort();
                    }
                }
            }
            AppCommand::FetchRuns { origin, seq } => {
                let backend = self.backend();
                let tx = self.app_event_tx.clone();
                self.runtime.spawn(async move {
                    let result = backend.list_runs().await;
                    tx.send(AppEvent::RunsRefreshed {
                        origin,
                        seq,
                        result,
                    });
                });
            }
            AppCommand::TriggerRun { workflow } => {
                let backend = self.backend();
                let tx = self.app_event_tx.clone();
                self.runtime.spawn(async move {
                    let result = backend.trigger_run(&workflow).await;
                    tx.send(AppEvent::RunTriggered { workflow, result });
                });
            }
            AppCommand::CancelRun { run_id } => {
                let backend = self.backend();
                let tx = self.app_event_tx.clone();
                self.runtime.spawn(async move {
                    let result = backend.cancel_run(&run_id).await;
                    tx.send(AppEvent::RunCancelFinished { run_id, result });
                });
            }
            AppCommand::Reauthenticate => {
                let slot = self.backend.clone();
                let factory = self.factory.clone();
                let tx = self.app_event_tx.clone();
                self.runtime.spawn_blocking(move || match factory() {
                    Ok(backend) => {
                        *slot.write().unwrap_or_else(PoisonError::into_inner) = backend;
                        tracing::info!("transport rebuilt with fresh credentials");
                        tx.send(AppEvent::AuthRestored);
                    }
                    Err(message) => {
                        tracing::warn!("re-authentication failed: {message}");
                        tx.send(AppEvent::AuthRestoreFailed(message));
                    }
                });
            }
            AppCommand::ScheduleAt { at, event } => {
                let tx = self.app_event_tx.clone();
                self.runtime.spawn(async move {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
                    tx.send(*event);
                });
            }
            AppCommand::Exit => self.app_event_tx.send(AppEvent::ExitRequest),
        }
    }

    fn spawn_chat(&mut self, target: ChatTarget, generation: u64, prompt: String) {
        self.streams.retain(|_, (_, handle)| !handle.is_finished());

        let backend = self.backend();
        let tx = self.app_event_tx.clone();
        let task_target = target.clone();
        let handle = self.runtime.spawn(async move {
            let target = task_target;
            let send = |item| {
                tx.send(AppEvent::Chat {
                    target: target.clone(),
                    generation,
                    item,
                })
            };
            let mut stream = match backend.stream_chat(&target, &prompt).await {
                Ok(stream) => stream,
                Err(e) => {
                    send(Err(e));
                    return;
                }
            };
            while let Some(item) = stream.next().await {
                let terminal = match &item {
                    Ok(event) => event.is_terminal(),
                    Err(_) => true,
                };
                send(item);
                if terminal {
                    return;
                }
            }
            send(Err(ApiError::Stream("stream closed before done".to_string())));
        });

        if let Some((_, previous)) = self.streams.insert(target, (generation, handle)) {
            previous.abort();
        }
    }
}
