//! The daemon loop.
//!
//! A [`Daemon`] owns the command server, the scheduler of periodic jobs and
//! an optional message-bus client, and drives them from one thread until a
//! `terminate` command or a shutdown signal arrives.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::time::Instant;

use standby_core::DaemonConfig;
use standby_sync::{ChainResolver, SystemExecutor};

use crate::error::{io_err, DaemonError};
use crate::log_rotation::{self, LogFile, LOG_ROTATION_INTERVAL};
use crate::monitor::BackupMonitor;
use crate::protocol::{error_reply, CommandRequest};
use crate::scheduler::Scheduler;
use crate::server::{CommandServer, PendingRequest};

/// Handler for a job-declared command; the returned text is the reply body.
pub type CommandHandler = Box<dyn FnMut(&CommandRequest) -> String>;

/// Contributes fields to the `status` or `stats` reply.
pub type InfoHook = Box<dyn Fn() -> Map<String, Value>>;

/// Cleanup run once at shutdown.
pub type DisconnectHook = Box<dyn FnOnce()>;

const BUILTIN_COMMANDS: [&str; 4] = ["help", "stats", "status", "terminate"];

/// External message-bus client pumped once per loop iteration.
pub trait BusClient {
    /// Move pending inbound/outbound traffic without blocking.
    fn pump(&mut self) -> Result<(), DaemonError>;

    fn disconnect(&mut self);
}

/// Static facts reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub config: Option<PathBuf>,
    pub listen: SocketAddr,
    pub port: u16,
}

struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self, DaemonError> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(|e| io_err("SIGINT handler", e))?,
            terminate: signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

async fn wait_for_signal(signals: Option<&mut ShutdownSignals>) -> &'static str {
    match signals {
        Some(signals) => signals.recv().await,
        None => std::future::pending().await,
    }
}

enum Wake {
    Request(Option<PendingRequest>),
    Signal(&'static str),
}

/// Process-wide daemon state: listener, commands, jobs, lifecycle flag.
///
/// Everything runs on the caller's thread. One loop iteration serves at
/// most one client, then runs due jobs, then pumps the bus client.
pub struct Daemon {
    server: CommandServer,
    info: DaemonInfo,
    listen_interval: Duration,
    commands: HashMap<String, CommandHandler>,
    scheduler: Scheduler,
    status_hooks: Vec<InfoHook>,
    stats_hooks: Vec<InfoHook>,
    disconnect_hooks: Vec<DisconnectHook>,
    bus: Option<Box<dyn BusClient>>,
    handle_signals: bool,
    signals: Option<ShutdownSignals>,
    terminating: bool,
}

impl Daemon {
    /// Bind the command server. `listen_interval` is the scheduler tick.
    pub async fn bind(addr: &str, listen_interval: Duration) -> Result<Self, DaemonError> {
        let server = CommandServer::bind(addr).await?;
        let listen = server.local_addr();
        Ok(Self {
            server,
            info: DaemonInfo {
                pid: std::process::id(),
                started_at: Utc::now(),
                config: None,
                listen,
                port: listen.port(),
            },
            listen_interval,
            commands: HashMap::new(),
            scheduler: Scheduler::new(),
            status_hooks: Vec::new(),
            stats_hooks: Vec::new(),
            disconnect_hooks: Vec::new(),
            bus: None,
            handle_signals: true,
            signals: None,
            terminating: false,
        })
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.info.config = path;
        self
    }

    /// Whether SIGINT/SIGTERM initiate shutdown (default `true`).
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.info.listen
    }

    pub fn info(&self) -> &DaemonInfo {
        &self.info
    }

    /// Declare a periodic job. Jobs run in declaration order.
    pub fn declare(
        &mut self,
        name: &str,
        interval: Duration,
        handler: impl FnMut() -> Result<(), DaemonError> + 'static,
    ) {
        self.scheduler.declare(name, interval, handler);
    }

    /// Register a job command. Names are case-insensitive and unique.
    pub fn register_command(
        &mut self,
        name: &str,
        handler: impl FnMut(&CommandRequest) -> String + 'static,
    ) -> Result<(), DaemonError> {
        let name = name.to_ascii_lowercase();
        if BUILTIN_COMMANDS.contains(&name.as_str()) || self.commands.contains_key(&name) {
            return Err(DaemonError::DuplicateCommand(name));
        }
        self.commands.insert(name, Box::new(handler));
        Ok(())
    }

    pub fn on_status(&mut self, hook: impl Fn() -> Map<String, Value> + 'static) {
        self.status_hooks.push(Box::new(hook));
    }

    pub fn on_stats(&mut self, hook: impl Fn() -> Map<String, Value> + 'static) {
        self.stats_hooks.push(Box::new(hook));
    }

    pub fn on_disconnect(&mut self, hook: impl FnOnce() + 'static) {
        self.disconnect_hooks.push(Box::new(hook));
    }

    pub fn attach_bus(&mut self, bus: Box<dyn BusClient>) {
        self.bus = Some(bus);
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    pub fn request_termination(&mut self) {
        self.terminating = true;
    }

    /// Answer one request.
    pub fn dispatch(&mut self, request: &CommandRequest) -> String {
        match request.command.as_str() {
            "status" => render(&self.status_payload()),
            "stats" => render(&self.stats_payload()),
            "terminate" => {
                tracing::info!("terminate requested over command socket");
                self.terminating = true;
                "terminating".to_string()
            }
            "help" => {
                let mut names: Vec<&str> = BUILTIN_COMMANDS
                    .iter()
                    .copied()
                    .chain(self.commands.keys().map(String::as_str))
                    .collect();
                names.sort_unstable();
                names.join("\n")
            }
            other => match self.commands.get_mut(other) {
                Some(handler) => handler(request),
                None => error_reply(format!("unknown command '{other}'")),
            },
        }
    }

    pub fn status_payload(&self) -> Value {
        let mut payload = match serde_json::to_value(&self.info) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        payload.insert("running".to_string(), json!(true));
        payload.insert(
            "jobs".to_string(),
            self.scheduler.snapshot(Instant::now()),
        );
        for hook in &self.status_hooks {
            payload.extend(hook());
        }
        Value::Object(payload)
    }

    pub fn stats_payload(&self) -> Value {
        let mut payload = Map::new();
        for hook in &self.stats_hooks {
            payload.extend(hook());
        }
        Value::Object(payload)
    }

    /// Wait up to `wait` for one client and answer it.
    ///
    /// Returns `true` when a client was served. A shutdown signal arriving
    /// meanwhile sets the terminating flag.
    pub async fn serve_once(&mut self, wait: Duration) -> bool {
        let wake = {
            let server = &self.server;
            let signals = self.signals.as_mut();
            tokio::select! {
                pending = server.accept_once(wait) => Wake::Request(pending),
                name = wait_for_signal(signals) => Wake::Signal(name),
            }
        };

        match wake {
            Wake::Request(Some(pending)) => {
                self.answer(pending).await;
                true
            }
            Wake::Request(None) => false,
            Wake::Signal(name) => {
                tracing::info!(signal = name, "received signal, shutting down daemon");
                self.terminating = true;
                false
            }
        }
    }

    async fn answer(&mut self, pending: PendingRequest) {
        let reply = match pending.request() {
            Ok(request) => {
                tracing::debug!(
                    peer = %pending.peer(),
                    command = %request.command,
                    "command received",
                );
                self.dispatch(request)
            }
            Err(reason) => {
                tracing::warn!(peer = %pending.peer(), reason, "malformed request");
                error_reply(reason)
            }
        };
        if let Err(err) = pending.respond(&reply).await {
            tracing::warn!(error = %err, "failed to write command reply");
        }
    }

    /// Shortest job interval, when the tick is too coarse to honour it.
    fn interval_below_tick(&self) -> Option<Duration> {
        self.scheduler
            .min_interval()
            .filter(|shortest| *shortest < self.listen_interval)
    }

    /// One loop iteration: serve, run due jobs, pump the bus.
    pub async fn tick(&mut self) {
        self.serve_once(self.listen_interval).await;
        if self.terminating {
            return;
        }

        self.scheduler.run_due(Instant::now());

        if let Some(bus) = self.bus.as_mut() {
            if let Err(err) = bus.pump() {
                tracing::warn!(error = %err, "message bus pump failed");
            }
        }
    }

    /// Run until terminated, then shut down.
    pub async fn start(mut self) -> Result<(), DaemonError> {
        if self.handle_signals {
            self.signals = Some(ShutdownSignals::install()?);
        }
        if let Some(shortest) = self.interval_below_tick() {
            tracing::warn!(
                interval_ms = shortest.as_millis() as u64,
                tick_ms = self.listen_interval.as_millis() as u64,
                "a job interval is shorter than the listen interval; such jobs run at most once per tick",
            );
        }
        tracing::info!(
            listen = %self.info.listen,
            jobs = self.scheduler.len(),
            tick_ms = self.listen_interval.as_millis() as u64,
            "daemon started",
        );

        while !self.terminating {
            self.tick().await;
        }

        self.shutdown();
        Ok(())
    }

    fn shutdown(self) {
        let Daemon {
            server,
            disconnect_hooks,
            bus,
            ..
        } = self;

        drop(server);
        for hook in disconnect_hooks {
            hook();
        }
        if let Some(mut bus) = bus {
            if let Err(err) = bus.pump() {
                tracing::warn!(error = %err, "final message bus pump failed");
            }
            bus.disconnect();
        }
        tracing::info!("daemon stopped");
    }
}

fn render(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|err| error_reply(err))
}

/// Load the config at `config_path` and run the daemon on the current
/// thread until it terminates.
pub fn start_blocking(config_path: &Path) -> Result<(), DaemonError> {
    let config = DaemonConfig::load(config_path)?;
    init_tracing(config.log_file.as_deref());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Build the daemon for `config`: command server, backup monitor job and,
/// when logging to a file, the log rotation job.
pub async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    if !config.remote_share.is_dir() {
        tracing::warn!(
            share = %config.remote_share.display(),
            "remote share is not reachable yet",
        );
    }

    let mut daemon = Daemon::bind(&config.listen_addr(), config.listen_interval)
        .await?
        .with_config_path(config.path.clone())
        .with_signal_handling(!config.ignore_signals);

    let resolver = ChainResolver::new(&config, Box::new(SystemExecutor))?;
    BackupMonitor::new(&config, resolver).register(&mut daemon)?;

    if let Some(log_file) = config.log_file.clone() {
        daemon.declare("log-rotation", LOG_ROTATION_INTERVAL, move || {
            log_rotation::rotate_log(&log_file);
            Ok(())
        });
    }

    daemon.start().await
}

fn init_tracing(log_file: Option<&Path>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match log_file {
        Some(path) => builder
            .with_ansi(false)
            .with_writer(LogFile::new(path))
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
}
