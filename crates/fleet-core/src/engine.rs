// ── DeviceEngine — the polymorphic interface over C4/C5 ──
//
// §9 "Dynamic dispatch across protocols": the façade (C7) must not run
// per-device runtime type inspection. Both the USP engine and the CWMP
// engine implement this one trait; C7 picks the implementation once,
// by `DeviceId` kind, and forgets which protocol it is talking to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::model::{Device, ParamType, Parameter, PathPattern, TransferDirection};

/// One (path, value, type) write in a `setParameters`/`addObject` call.
#[derive(Debug, Clone)]
pub struct ParameterWrite {
    pub path: String,
    pub value: String,
    pub param_type: ParamType,
}

/// Per-path outcome of a `setParameters` call. `error` is `None` on
/// success.
#[derive(Debug, Clone)]
pub struct SetOutcome {
    pub path: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransferCredentials {
    pub username: String,
    pub password: SecretString,
}

/// The handle an engine needs to act against one device: the current
/// snapshot plus the exclusive lock C6 handed out for it. Callers
/// acquire the lock themselves for mutators per §5; readers pass it
/// through unused.
pub struct EngineTarget {
    pub device: Device,
    pub lock: Arc<Mutex<()>>,
}

#[async_trait]
pub trait DeviceEngine: Send + Sync {
    async fn get(&self, target: &EngineTarget, pattern: &PathPattern, timeout: Duration) -> Result<Vec<Parameter>, CoreError>;

    async fn set(
        &self,
        target: &EngineTarget,
        writes: Vec<ParameterWrite>,
        all_or_nothing: bool,
        timeout: Duration,
    ) -> Result<Vec<SetOutcome>, CoreError>;

    async fn add(
        &self,
        target: &EngineTarget,
        object_path: &str,
        seed: Vec<ParameterWrite>,
        timeout: Duration,
    ) -> Result<u32, CoreError>;

    async fn delete(&self, target: &EngineTarget, object_path: &str, instance_number: u32, timeout: Duration) -> Result<(), CoreError>;

    async fn operate(&self, target: &EngineTarget, command: &str, arguments: serde_json::Value, timeout: Duration) -> Result<serde_json::Value, CoreError>;

    async fn schedule_transfer(
        &self,
        target: &EngineTarget,
        direction: TransferDirection,
        url: &str,
        file_type: &str,
        credentials: Option<TransferCredentials>,
        delay: Duration,
        command_key: &str,
    ) -> Result<(), CoreError>;

    /// `true` for engines where operator mutators take effect on the
    /// live wire immediately (USP); `false` where they are queued for
    /// the device's next session (CWMP).
    fn supports_immediate(&self) -> bool;
}
