//! Opening control channels to provisioned workers.

use std::sync::Arc;
use std::time::Duration;

use buildrun_rcon::{CommandSink, RconClient, RconConfig};

use crate::lifecycle::WorkerHandle;

/// Produces a [`CommandSink`] for a worker's control port.
pub trait ControlConnector: Send + Sync {
    fn connect(&self, worker: &WorkerHandle) -> Arc<dyn CommandSink>;
}

/// Connects over RCON using the worker's generated credential.
#[derive(Debug, Clone)]
pub struct RconConnector {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl RconConnector {
    pub fn new(connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout,
        }
    }
}

impl ControlConnector for RconConnector {
    fn connect(&self, worker: &WorkerHandle) -> Arc<dyn CommandSink> {
        let config = RconConfig::new(worker.host.clone(), worker.control_port, worker.credential())
            .with_connect_timeout(self.connect_timeout)
            .with_command_timeout(self.command_timeout);
        Arc::new(RconClient::new(config))
    }
}
