// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present MCRouter Contributors

//! Service hosts
//!
//! A host decides how the router process is controlled from the outside:
//! an interactive console, a POSIX daemon driven by signals, or an OS
//! service manager. Every host turns its external triggers into
//! [`ControlSignal`]s posted to the dispatcher.

use crate::actors::{RouterHandle, RouterMessage};
use crate::config::HostCommand;
use crate::error::HostError;
use crate::state::ControlSignal;
use std::fmt;
use std::fs;
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Which kind of host runs the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Console,
    PosixDaemon,
    WindowsService,
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostKind::Console => "console",
            HostKind::PosixDaemon => "posix-daemon",
            HostKind::WindowsService => "windows-service",
        };
        write!(f, "{}", name)
    }
}

/// What gets registered with the OS service manager
#[derive(Debug, Clone)]
pub struct InstallSpec {
    pub service_name: String,
    pub executable: PathBuf,
    pub config_path: PathBuf,
    pub unit_path: PathBuf,
}

impl InstallSpec {
    /// Renders the systemd unit for this installation
    pub fn unit_file(&self) -> String {
        format!(
            "[Unit]\n\
             Description={name} multicast message router\n\
             After=network.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             ExecStart={exe} --service --config {config}\n\
             ExecReload=/bin/kill -USR2 $MAINPID\n\
             Restart=on-failure\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            name = self.service_name,
            exe = self.executable.display(),
            config = self.config_path.display(),
        )
    }
}

/// Capability of a process host
pub trait ServiceHost: Send {
    fn kind(&self) -> HostKind;

    /// Registers the router with the OS service manager
    fn install(&self, spec: &InstallSpec) -> Result<(), HostError>;

    fn uninstall(&self, spec: &InstallSpec) -> Result<(), HostError>;

    /// Starts forwarding external triggers to `router`
    ///
    /// Forwarding ends once `quit` is cancelled.
    fn attach(&mut self, router: RouterHandle, quit: CancellationToken) -> Result<(), HostError>;
}

/// Picks the host for a command line request
pub fn host_for(command: HostCommand) -> Box<dyn ServiceHost> {
    match command {
        HostCommand::RunConsole => Box::new(ConsoleHost::new()),
        HostCommand::RunService | HostCommand::Install | HostCommand::Uninstall => {
            platform_service_host()
        }
    }
}

#[cfg(unix)]
fn platform_service_host() -> Box<dyn ServiceHost> {
    Box::new(PosixDaemon::new())
}

#[cfg(not(unix))]
fn platform_service_host() -> Box<dyn ServiceHost> {
    Box::new(WindowsServiceHost)
}

/// A line typed on the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Control(ControlSignal),
    Status,
}

/// Parses one console line; unknown input yields `None`
pub fn parse_console_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "q" | "quit" => Some(ConsoleCommand::Control(ControlSignal::Stop)),
        "s" | "status" => Some(ConsoleCommand::Status),
        "p" | "pause" => Some(ConsoleCommand::Control(ControlSignal::Pause)),
        "c" | "continue" => Some(ConsoleCommand::Control(ControlSignal::Continue)),
        _ => None,
    }
}

/// Interactive host reading commands from stdin
#[derive(Debug, Default)]
pub struct ConsoleHost {
    attached: bool,
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceHost for ConsoleHost {
    fn kind(&self) -> HostKind {
        HostKind::Console
    }

    fn install(&self, _spec: &InstallSpec) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostKind::Console.to_string()))
    }

    fn uninstall(&self, _spec: &InstallSpec) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostKind::Console.to_string()))
    }

    fn attach(&mut self, router: RouterHandle, quit: CancellationToken) -> Result<(), HostError> {
        if self.attached {
            return Err(HostError::RegistrationFailed("console already attached".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HostError::RegistrationFailed(e.to_string()))?;

        // Ctrl-C
        let signal_router = router.clone();
        let signal_quit = quit.clone();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = signal_quit.cancelled() => break,
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            break;
                        }
                        tracing::info!("Interrupted, stopping router");
                        match signal_router.control(ControlSignal::Stop).await {
                            Ok(true) => break,
                            Ok(false) => println!("Stop refused in the current state"),
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        // Stdin reads block, so they get their own thread
        std::thread::Builder::new()
            .name("mcrouter-console".to_string())
            .spawn(move || read_console(std::io::stdin().lock(), router, quit))
            .map_err(|e| HostError::RegistrationFailed(e.to_string()))?;

        println!("Type 'q' to quit, 's' for status, 'p' to pause, 'c' to continue");
        self.attached = true;
        Ok(())
    }
}

/// Reads console commands until a stop is accepted or input ends
///
/// Blocks the calling thread; must not run on a runtime worker.
fn read_console<R: BufRead>(input: R, router: RouterHandle, quit: CancellationToken) {
    for line in input.lines() {
        if quit.is_cancelled() {
            break;
        }
        let Ok(line) = line else {
            break;
        };
        match parse_console_command(&line) {
            Some(ConsoleCommand::Control(signal)) => {
                let Some(accepted) = blocking_control(&router, signal) else {
                    break;
                };
                if !accepted {
                    println!("'{}' refused in the current state", line.trim());
                } else if signal == ControlSignal::Stop || quit.is_cancelled() {
                    break;
                }
            }
            Some(ConsoleCommand::Status) => print_status(&router),
            None if line.trim().is_empty() => {}
            None => println!("Unknown command: {}", line.trim()),
        }
    }
    tracing::debug!("Console reader finished");
}

/// Posts `signal` and waits for the outcome; `None` once the router is gone
fn blocking_control(router: &RouterHandle, signal: ControlSignal) -> Option<bool> {
    let (tx, mut rx) = mpsc::channel(1);
    router
        .blocking_send(RouterMessage::Control {
            signal,
            response: Some(tx),
        })
        .ok()?;
    rx.blocking_recv()
}

fn print_status(router: &RouterHandle) {
    let (tx, mut rx) = mpsc::channel(1);
    if router
        .blocking_send(RouterMessage::GetStatus { response: tx })
        .is_err()
    {
        return;
    }
    if let Some(status) = rx.blocking_recv() {
        match serde_json::to_string_pretty(&status) {
            Ok(text) => println!("{}", text),
            Err(e) => tracing::warn!(error = %e, "Failed to render status"),
        }
    }
}

/// Host driven by POSIX signals
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct PosixDaemon {
    attached: bool,
}

#[cfg(unix)]
impl PosixDaemon {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(unix)]
impl ServiceHost for PosixDaemon {
    fn kind(&self) -> HostKind {
        HostKind::PosixDaemon
    }

    fn install(&self, spec: &InstallSpec) -> Result<(), HostError> {
        if let Some(parent) = spec.unit_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| HostError::InstallFailed(format!("{}: {}", parent.display(), e)))?;
        }
        fs::write(&spec.unit_path, spec.unit_file())
            .map_err(|e| HostError::InstallFailed(format!("{}: {}", spec.unit_path.display(), e)))?;
        tracing::info!(unit = %spec.unit_path.display(), service = %spec.service_name, "Service installed");
        Ok(())
    }

    fn uninstall(&self, spec: &InstallSpec) -> Result<(), HostError> {
        if !spec.unit_path.exists() {
            return Err(HostError::UninstallFailed(format!(
                "{} is not installed",
                spec.service_name
            )));
        }
        fs::remove_file(&spec.unit_path).map_err(|e| {
            HostError::UninstallFailed(format!("{}: {}", spec.unit_path.display(), e))
        })?;
        tracing::info!(unit = %spec.unit_path.display(), service = %spec.service_name, "Service uninstalled");
        Ok(())
    }

    fn attach(&mut self, router: RouterHandle, quit: CancellationToken) -> Result<(), HostError> {
        use tokio::signal::unix::{SignalKind, signal};

        if self.attached {
            return Err(HostError::RegistrationFailed("daemon already attached".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HostError::RegistrationFailed(e.to_string()))?;
        let _guard = runtime.enter();

        let register = |kind: SignalKind| {
            signal(kind).map_err(|e| HostError::RegistrationFailed(e.to_string()))
        };
        let mut terminate = register(SignalKind::terminate())?;
        let mut interrupt = register(SignalKind::interrupt())?;
        let mut pause = register(SignalKind::user_defined1())?;
        let mut resume = register(SignalKind::user_defined2())?;

        runtime.spawn(async move {
            loop {
                let signal = tokio::select! {
                    _ = quit.cancelled() => break,
                    _ = terminate.recv() => ControlSignal::Shutdown,
                    _ = interrupt.recv() => ControlSignal::Stop,
                    _ = pause.recv() => ControlSignal::Pause,
                    _ = resume.recv() => ControlSignal::Continue,
                };
                tracing::info!(signal = %signal, "Signal received");
                if router
                    .send(RouterMessage::Control {
                        signal,
                        response: None,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        self.attached = true;
        Ok(())
    }
}

/// Windows service control manager host; not available in this build
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsServiceHost;

impl ServiceHost for WindowsServiceHost {
    fn kind(&self) -> HostKind {
        HostKind::WindowsService
    }

    fn install(&self, _spec: &InstallSpec) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostKind::WindowsService.to_string()))
    }

    fn uninstall(&self, _spec: &InstallSpec) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostKind::WindowsService.to_string()))
    }

    fn attach(&mut self, _router: RouterHandle, _quit: CancellationToken) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostKind::WindowsService.to_string()))
    }
}
