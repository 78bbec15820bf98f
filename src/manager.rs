//! The manager task.
//!
//! One tokio task owns the [`SerialConnection`] and its [`IoScheduler`] and
//! handles one thing at a time: a caller command, a transport notification,
//! an interval tick or a break deadline. Callers talk to it through a
//! cloneable [`SerialHandle`]; each request carries a oneshot for the reply.
//! When every handle is dropped the loop ends and the line is closed.

use crate::config::{Config, ConfigResult};
use crate::connection::SerialConnection;
use crate::error::LinkError;
use crate::events::{EventNotifier, EventSubscription, DEFAULT_EVENT_CAPACITY};
use crate::port::{FrameSettings, SerialBackend, TransportSignal, TransportSignals};
use crate::registry::PortDescriptor;
use crate::scheduler::{BreakTiming, IoScheduler, SampleTrigger};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default depth of the command queue.
pub const DEFAULT_COMMAND_CAPACITY: usize = 32;

/// Construction-time settings of a manager.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub trigger: SampleTrigger,
    pub auto_break: bool,
    pub break_timing: BreakTiming,
    pub frame: FrameSettings,
    pub check_writable: bool,
    pub event_capacity: usize,
    pub command_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            trigger: SampleTrigger::Edge,
            auto_break: false,
            break_timing: BreakTiming::default(),
            frame: FrameSettings::default(),
            check_writable: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl ManagerOptions {
    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        Ok(Self {
            trigger: config.sampling.trigger()?,
            auto_break: config.auto_break.enabled,
            break_timing: config.auto_break.timing(),
            frame: config.serial.frame,
            check_writable: config.serial.check_writable,
            event_capacity: config.serial.event_capacity,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        })
    }

    pub fn with_trigger(mut self, trigger: SampleTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_auto_break(mut self, enabled: bool) -> Self {
        self.auto_break = enabled;
        self
    }
}

#[derive(Debug)]
enum Command {
    ListPorts {
        reply: oneshot::Sender<Vec<PortDescriptor>>,
    },
    IsConnected {
        reply: oneshot::Sender<bool>,
    },
    StatusText {
        reply: oneshot::Sender<String>,
    },
    Connect {
        port: String,
        baud_rate: u32,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Toggle {
        port: String,
        baud_rate: u32,
        reply: oneshot::Sender<Result<bool, LinkError>>,
    },
    Write {
        data: Vec<u8>,
        reply: oneshot::Sender<isize>,
    },
    SetAutoBreak {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
}

/// Owner of one serial connection. Consumed by [`SerialManager::run`].
#[derive(Debug)]
pub struct SerialManager {
    connection: SerialConnection,
    scheduler: IoScheduler,
    commands: mpsc::Receiver<Command>,
}

impl SerialManager {
    pub fn new(options: ManagerOptions, backend: Arc<dyn SerialBackend>) -> (Self, SerialHandle) {
        let notifier = EventNotifier::new(options.event_capacity);
        let (tx, rx) = mpsc::channel(options.command_capacity.max(1));

        let manager = Self {
            connection: SerialConnection::new(
                backend,
                notifier.clone(),
                options.frame,
                options.check_writable,
            ),
            scheduler: IoScheduler::new(options.trigger, options.auto_break, options.break_timing),
            commands: rx,
        };
        let handle = SerialHandle {
            commands: tx,
            notifier,
        };
        (manager, handle)
    }

    /// Create a manager and run it on the current tokio runtime.
    pub fn spawn(options: ManagerOptions, backend: Arc<dyn SerialBackend>) -> SerialHandle {
        let (manager, handle) = Self::new(options, backend);
        tokio::spawn(manager.run());
        handle
    }

    /// Run until every [`SerialHandle`] is dropped.
    pub async fn run(mut self) {
        debug!(trigger = ?self.scheduler.trigger(), "serial manager started");

        loop {
            let break_deadline = self.scheduler.next_break();

            tokio::select! {
                biased;

                // Notifications already raised are handled before any command
                // queued after them.
                signal = next_signal(self.connection.signals_mut()) => {
                    self.handle_signal(signal);
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = break_due(break_deadline) => {
                    self.scheduler.fire_breaks(&mut self.connection, Instant::now());
                }
                _ = self.scheduler.tick() => {
                    self.scheduler.on_tick(&mut self.connection);
                }
            }

            self.scheduler.sync(self.connection.is_connected());
        }

        if self.connection.is_connected() {
            self.connection.disconnect();
        }
        info!("serial manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        // Reply send errors mean the caller stopped waiting.
        match command {
            Command::ListPorts { reply } => {
                let _ = reply.send(self.connection.list_ports());
            }
            Command::IsConnected { reply } => {
                let _ = reply.send(self.connection.is_connected());
            }
            Command::StatusText { reply } => {
                let _ = reply.send(self.connection.status_text());
            }
            Command::Connect {
                port,
                baud_rate,
                reply,
            } => {
                let _ = reply.send(self.connection.connect(&port, baud_rate));
            }
            Command::Disconnect { reply } => {
                self.connection.disconnect();
                let _ = reply.send(());
            }
            Command::Toggle {
                port,
                baud_rate,
                reply,
            } => {
                let _ = reply.send(self.connection.toggle(&port, baud_rate));
            }
            Command::Write { data, reply } => {
                let written = self.scheduler.write(&mut self.connection, &data);
                let _ = reply.send(written);
            }
            Command::SetAutoBreak { enabled, reply } => {
                debug!(enabled, "auto-break changed");
                self.scheduler.set_auto_break(enabled);
                let _ = reply.send(());
            }
        }
    }

    fn handle_signal(&mut self, signal: Option<TransportSignal>) {
        match signal {
            Some(TransportSignal::DataArrived) => {
                self.scheduler.on_data_arrived(&mut self.connection);
            }
            Some(TransportSignal::Failed(message)) => {
                warn!(error = %message, "serial line failed");
                self.connection.handle_transport_error(message);
            }
            None => {
                self.connection
                    .handle_transport_error("transport notifications stopped");
            }
        }
    }
}

async fn next_signal(signals: Option<&mut TransportSignals>) -> Option<TransportSignal> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn break_due(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Cloneable client of a running [`SerialManager`].
///
/// Every method fails with [`LinkError::ManagerClosed`] once the manager task
/// is gone, except [`SerialHandle::write`] which reports `-1` like any other
/// write on a closed line.
#[derive(Debug, Clone)]
pub struct SerialHandle {
    commands: mpsc::Sender<Command>,
    notifier: EventNotifier,
}

impl SerialHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| LinkError::ManagerClosed)?;
        rx.await.map_err(|_| LinkError::ManagerClosed)
    }

    pub async fn list_ports(&self) -> Result<Vec<PortDescriptor>, LinkError> {
        self.request(|reply| Command::ListPorts { reply }).await
    }

    pub async fn is_connected(&self) -> Result<bool, LinkError> {
        self.request(|reply| Command::IsConnected { reply }).await
    }

    pub async fn status_text(&self) -> Result<String, LinkError> {
        self.request(|reply| Command::StatusText { reply }).await
    }

    pub async fn connect(&self, port: &str, baud_rate: u32) -> Result<(), LinkError> {
        let port = port.to_string();
        self.request(|reply| Command::Connect {
            port,
            baud_rate,
            reply,
        })
        .await?
    }

    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Returns the connected state after the toggle.
    pub async fn toggle(&self, port: &str, baud_rate: u32) -> Result<bool, LinkError> {
        let port = port.to_string();
        self.request(|reply| Command::Toggle {
            port,
            baud_rate,
            reply,
        })
        .await?
    }

    /// Bytes accepted, or `-1` when not connected.
    pub async fn write(&self, data: impl Into<Vec<u8>>) -> isize {
        let data = data.into();
        self.request(|reply| Command::Write { data, reply })
            .await
            .unwrap_or(-1)
    }

    pub async fn set_auto_break(&self, enabled: bool) -> Result<(), LinkError> {
        self.request(|reply| Command::SetAutoBreak { enabled, reply })
            .await
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> EventSubscription {
        self.notifier.subscribe()
    }

    /// Whether the manager task is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
