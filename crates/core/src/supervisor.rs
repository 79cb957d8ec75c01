//! Async driver for a session registry
//!
//! The registry is moved onto a single tokio task. Commands, engine signals
//! and timer deadlines are all applied from that task's `select!` loop, so
//! no two transitions ever run concurrently. Status changes are fanned out
//! on a broadcast channel.

use std::ops::ControlFlow;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::camera::{CameraId, CameraRecord, Quality};
use crate::engine::{EngineEvents, EngineSignal, SinkId};
use crate::registry::{ReconcileReport, SessionRegistry};
use crate::session::{SessionEvent, SessionSnapshot};
use crate::Result;

const COMMAND_QUEUE: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Per-camera control requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    StartStream,
    Retry,
    ChangeQuality(Quality),
    ToggleAudio,
    AttachSink(SinkId),
    DetachSink,
}

#[derive(Debug)]
enum Command {
    Reconcile {
        cameras: Vec<CameraRecord>,
        reply: oneshot::Sender<ReconcileReport>,
    },
    Control {
        camera_id: CameraId,
        action: ControlAction,
        reply: oneshot::Sender<bool>,
    },
    Snapshot(oneshot::Sender<Vec<SessionSnapshot>>),
    Shutdown(oneshot::Sender<()>),
}

/// Owns the registry; run it with [`SessionSupervisor::spawn`]
pub struct SessionSupervisor {
    registry: SessionRegistry,
    commands: mpsc::Receiver<Command>,
    signals: mpsc::UnboundedReceiver<EngineSignal>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionSupervisor {
    /// Wrap a registry; engines bound from now on report to this supervisor
    ///
    /// The registry's clock must follow tokio time (see
    /// [`crate::clock::TokioClock`]) since deadlines are awaited with
    /// `tokio::time::sleep_until`.
    pub fn new(mut registry: SessionRegistry) -> (Self, SupervisorHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        registry.set_engine_events(EngineEvents::new(signal_tx));

        let handle = SupervisorHandle {
            commands: command_tx,
            events: events.clone(),
        };
        (
            Self {
                registry,
                commands,
                signals,
                events,
            },
            handle,
        )
    }

    /// Spawn onto the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(view = %self.registry.view().kind, "Session supervisor started");

        loop {
            let deadline = self.registry.next_deadline();
            let sleep = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).is_break() {
                            return;
                        }
                    }
                    None => break,
                },

                Some(signal) = self.signals.recv() => {
                    self.registry.handle_engine_signal(signal);
                }

                _ = sleep => {
                    let fired = self.registry.advance();
                    debug!(fired, "Timers fired");
                }
            }

            self.publish();
        }

        self.stop();
    }

    /// Apply one command; `Break` once the supervisor has stopped
    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Reconcile { cameras, reply } => {
                let _ = reply.send(self.registry.reconcile(&cameras));
            }
            Command::Control {
                camera_id,
                action,
                reply,
            } => {
                let applied = match action {
                    ControlAction::StartStream => self.registry.start_stream(camera_id),
                    ControlAction::Retry => self.registry.retry(camera_id),
                    ControlAction::ChangeQuality(q) => self.registry.change_quality(camera_id, q),
                    ControlAction::ToggleAudio => self.registry.toggle_audio(camera_id),
                    ControlAction::AttachSink(sink) => self.registry.attach_sink(camera_id, sink),
                    ControlAction::DetachSink => self.registry.detach_sink(camera_id),
                };
                let _ = reply.send(applied);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.registry.snapshots());
            }
            Command::Shutdown(reply) => {
                self.stop();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn publish(&mut self) {
        for event in self.registry.drain_events() {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    fn stop(&mut self) {
        self.registry.destroy_all();
        self.publish();
        info!("Session supervisor stopped");
    }
}

/// Cloneable client of a running supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SupervisorHandle {
    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn reconcile(&self, cameras: Vec<CameraRecord>) -> Result<ReconcileReport> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Reconcile { cameras, reply }).await?;
        Ok(rx.await?)
    }

    async fn control(&self, camera_id: CameraId, action: ControlAction) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Control {
                camera_id,
                action,
                reply,
            })
            .await?;
        Ok(rx.await?)
    }

    pub async fn start_stream(&self, camera_id: CameraId) -> Result<bool> {
        self.control(camera_id, ControlAction::StartStream).await
    }

    pub async fn retry(&self, camera_id: CameraId) -> Result<bool> {
        self.control(camera_id, ControlAction::Retry).await
    }

    pub async fn change_quality(&self, camera_id: CameraId, quality: Quality) -> Result<bool> {
        self.control(camera_id, ControlAction::ChangeQuality(quality)).await
    }

    pub async fn toggle_audio(&self, camera_id: CameraId) -> Result<bool> {
        self.control(camera_id, ControlAction::ToggleAudio).await
    }

    pub async fn attach_sink(&self, camera_id: CameraId, sink: SinkId) -> Result<bool> {
        self.control(camera_id, ControlAction::AttachSink(sink)).await
    }

    pub async fn detach_sink(&self, camera_id: CameraId) -> Result<bool> {
        self.control(camera_id, ControlAction::DetachSink).await
    }

    pub async fn snapshot(&self) -> Result<Vec<SessionSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot(reply)).await?;
        Ok(rx.await?)
    }

    /// Stop the supervisor, destroying every session
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Shutdown(reply)).await?;
        Ok(rx.await?)
    }
}
