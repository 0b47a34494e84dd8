use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::channel;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use color_eyre::eyre::Result;
use conductor_backend_client::ChatTarget;
use conductor_backend_client::ConductorBackend;
use crossterm::event::KeyEventKind;
use tokio::runtime::Handle;

use crate::app_event::AppCommand;
use crate::app_event::AppEvent;
use crate::app_event_sender::AppEventSender;
use crate::command_runner::BackendFactory;
use crate::command_runner::CommandRunner;
use crate::composer::Composer;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::coordinator::CoreSettings;
use crate::render::render;
use crate::tui;

/// Time window for debouncing redraw requests.
const REDRAW_DEBOUNCE: Duration = Duration::from_millis(10);

/// Redraw cadence while a countdown is on screen.
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

pub(crate) struct App {
    app_event_tx: AppEventSender,
    app_event_rx: Receiver<AppEvent>,
    coordinator: Coordinator,
    runner: CommandRunner,
    composer: Composer,
    initial_prompt: Option<String>,

    /// True when a redraw has been scheduled but not yet executed.
    pending_redraw: Arc<AtomicBool>,
    /// True while a countdown refresh is queued.
    pending_countdown: Arc<AtomicBool>,
}

impl App {
    pub(crate) fn new(
        config: &Config,
        backend: Arc<dyn ConductorBackend>,
        factory: BackendFactory,
        initial_prompt: Option<String>,
        runtime: Handle,
    ) -> Self {
        let (app_event_tx, app_event_rx) = channel();
        let app_event_tx = AppEventSender::new(app_event_tx);

        // Dedicated thread that reads crossterm events and re-publishes them
        // as AppEvents.
        {
            let app_event_tx = app_event_tx.clone();
            std::thread::spawn(move || {
                loop {
                    // Poll with a timeout so the event lock is not held
                    // indefinitely by `read()`.
                    if let Ok(true) = crossterm::event::poll(Duration::from_millis(100)) {
                        if let Ok(event) = crossterm::event::read() {
                            match event {
                                crossterm::event::Event::Key(key_event) => {
                                    app_event_tx.send(AppEvent::KeyEvent(key_event));
                                }
                                crossterm::event::Event::Resize(_, _) => {
                                    app_event_tx.send(AppEvent::RequestRedraw);
                                }
                                crossterm::event::Event::Paste(pasted) => {
                                    app_event_tx.send(AppEvent::Paste(pasted.replace('\r', "\n")));
                                }
                                _ => {}
                            }
                        }
                    }
                }
            });
        }

        let target = match &config.default_agent {
            Some(agent) => ChatTarget::agent(agent.as_str()),
            None => ChatTarget::Main,
        };
        let coordinator = Coordinator::new(CoreSettings::from(config), target);
        let runner = CommandRunner::new(backend, factory, app_event_tx.clone(), runtime);

        Self {
            app_event_tx,
            app_event_rx,
            coordinator,
            runner,
            composer: Composer::new(),
            initial_prompt,
            pending_redraw: Arc::new(AtomicBool::new(false)),
            pending_countdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Schedule a redraw if one is not already pending.
    fn schedule_redraw(&self) {
        if self
            .pending_redraw
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let tx = self.app_event_tx.clone();
        let pending_redraw = self.pending_redraw.clone();
        thread::spawn(move || {
            thread::sleep(REDRAW_DEBOUNCE);
            tx.send(AppEvent::Redraw);
            pending_redraw.store(false, Ordering::SeqCst);
        });
    }

    /// Keep the cancel countdown moving even when nothing else happens.
    fn schedule_countdown(&self) {
        if self
            .pending_countdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let tx = self.app_event_tx.clone();
        let pending = self.pending_countdown.clone();
        thread::spawn(move || {
            thread::sleep(COUNTDOWN_TICK);
            pending.store(false, Ordering::SeqCst);
            tx.send(AppEvent::RequestRedraw);
        });
    }

    fn dispatch(&mut self, event: AppEvent) {
        let commands = self.coordinator.handle(event, Instant::now());
        self.execute_all(commands);
    }

    fn execute_all(&mut self, commands: Vec<AppCommand>) {
        for command in commands {
            self.runner.execute(command);
        }
    }

    pub(crate) fn run(&mut self, terminal: &mut tui::Tui) -> Result<()> {
        // Insert an event to trigger the first render.
        self.app_event_tx.send(AppEvent::RequestRedraw);
        let startup = self
            .coordinator
            .startup(self.initial_prompt.take(), Instant::now());
        self.execute_all(startup);

        while let Ok(event) = self.app_event_rx.recv() {
            match event {
                AppEvent::RequestRedraw => self.schedule_redraw(),
                AppEvent::Redraw => {
                    let snapshot = self.coordinator.snapshot(Instant::now());
                    terminal.draw(|frame| render(frame, &snapshot, &self.composer))?;
                    if snapshot.hint.is_some() {
                        self.schedule_countdown();
                    }
                }
                AppEvent::KeyEvent(key_event) => {
                    if key_event.kind == KeyEventKind::Release {
                        continue;
                    }
                    if let Some(action) = self.composer.handle_key_event(key_event) {
                        tracing::debug!(?action, "user action");
                        self.dispatch(AppEvent::Action(action));
                    }
                    self.schedule_redraw();
                }
                AppEvent::Paste(text) => {
                    self.composer.handle_paste(&text);
                    self.schedule_redraw();
                }
                AppEvent::ExitRequest => break,
                event => {
                    self.dispatch(event);
                    self.schedule_redraw();
                }
            }
        }
        Ok(())
    }
}
