//! Shared application state handed to the command surface.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::coordinator::{ActiveInvocation, SessionCoordinator};
use crate::invocation::{ClaudeCliBackend, InvocationBackend, SessionClient};
use crate::process::{ProcessRegistry, ProcessSupervisor};

/// Core components of one instance, bound to one working directory.
#[derive(Debug)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Supervisor of interactive child processes.
    pub supervisor: ProcessSupervisor,
    /// Streaming session client.
    pub client: SessionClient,
    /// Single-invocation coordinator.
    pub coordinator: SessionCoordinator,
    /// Config file this instance was started from; needed to relaunch.
    pub config_path: Option<PathBuf>,
}

impl AppState {
    /// Build the state around an explicit invocation backend.
    #[must_use]
    pub fn new(
        config: GlobalConfig,
        backend: Arc<dyn InvocationBackend>,
        config_path: Option<PathBuf>,
    ) -> Self {
        let supervisor = ProcessSupervisor::new(
            config.working_dir.clone(),
            config.process.clone(),
            ProcessRegistry::new(),
        );
        let client = SessionClient::new(backend, &config.invocation);
        let coordinator = SessionCoordinator::new(ActiveInvocation::new());
        Self {
            config: Arc::new(config),
            supervisor,
            client,
            coordinator,
            config_path,
        }
    }

    /// Build the state with the agent CLI backend from the config.
    #[must_use]
    pub fn with_cli_backend(config: GlobalConfig, config_path: Option<PathBuf>) -> Self {
        let backend = Arc::new(ClaudeCliBackend::new(config.invocation.clone()));
        Self::new(config, backend, config_path)
    }

    /// Stop everything in flight: cancel the active invocation and signal
    /// every live process. Does not wait for processes to exit.
    pub async fn shutdown(&self) {
        self.coordinator.cancel_current().await;
        self.supervisor.kill_all().await;
    }
}
