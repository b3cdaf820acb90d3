//! Media player connection backed by the pyatv command line tools.
//!
//! Commands run `atvremote ... turn_on|turn_off` and wait for the process to
//! exit. Property updates come from a long-running `atvscript ... push_updates`
//! process printing one JSON document per line:
//!
//! ```text
//! {"result": "success", "power_state": "on", "device_state": "playing", "app_id": "com.netflix.Netflix", ...}
//! {"result": "failure", "exception": "connection lost", ...}
//! ```
//!
//! Only the fields mapped in [`PUSH_FIELDS`] are tracked, and an update is
//! emitted only when a field's value actually changes.

use super::{
    DeviceError, DeviceEvent, DeviceHandle, DeviceParams, EventHub, Subscription, ValueChange,
    update_event,
};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// `atvscript` JSON field → bridge property name.
pub const PUSH_FIELDS: &[(&str, &str)] = &[
    ("power_state", "powerState"),
    ("device_state", "deviceState"),
    ("app_id", "app"),
];

/// Delay before restarting a `push_updates` process that exited.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// One parsed `push_updates` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushUpdate {
    /// Property values present in the line, in [`PUSH_FIELDS`] order.
    Values(Vec<(&'static str, String)>),
    /// The script reported a failure.
    Failure(String),
}

/// Parse a single line printed by `atvscript push_updates`.
pub fn parse_push_update(line: &str) -> Result<PushUpdate, DeviceError> {
    let json: Value = serde_json::from_str(line)
        .map_err(|e| DeviceError::MalformedUpdate(format!("{}: {}", e, line)))?;
    let object = json
        .as_object()
        .ok_or_else(|| DeviceError::MalformedUpdate(line.to_string()))?;

    if object.get("result").and_then(Value::as_str) == Some("failure") {
        let reason = object
            .get("exception")
            .or_else(|| object.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("unknown failure");
        return Ok(PushUpdate::Failure(reason.to_string()));
    }

    let values = PUSH_FIELDS
        .iter()
        .filter_map(|(field, property)| {
            let value = match object.get(*field)? {
                Value::String(s) => s.clone(),
                // pyatv reports null when nothing is set (e.g. no app in the
                // foreground); an empty value matches no configured sensor.
                Value::Null => String::new(),
                other => other.to_string(),
            };
            Some((*property, value))
        })
        .collect();

    Ok(PushUpdate::Values(values))
}

pub struct PyAtvDevice {
    params: DeviceParams,
    atvremote: String,
    atvscript: String,
    hub: Arc<EventHub>,
    values: Arc<Mutex<HashMap<String, String>>>,
    push_task: Mutex<Option<JoinHandle<()>>>,
}

impl PyAtvDevice {
    pub fn new(params: DeviceParams) -> Self {
        Self {
            params,
            atvremote: "atvremote".to_string(),
            atvscript: "atvscript".to_string(),
            hub: Arc::new(EventHub::new()),
            values: Arc::new(Mutex::new(HashMap::new())),
            push_task: Mutex::new(None),
        }
    }

    /// Override the tool locations (e.g. a virtualenv's `bin/`).
    pub fn with_tools(mut self, atvremote: impl Into<String>, atvscript: impl Into<String>) -> Self {
        self.atvremote = atvremote.into();
        self.atvscript = atvscript.into();
        self
    }

    /// Arguments selecting the device, shared by both tools.
    fn device_args(&self) -> Vec<String> {
        let mut args = vec!["-s".to_string(), self.params.host.clone()];
        if let Some(credentials) = &self.params.credentials {
            args.push("--airplay-credentials".to_string());
            args.push(credentials.clone());
            args.push("--companion-credentials".to_string());
            args.push(credentials.clone());
        }
        args
    }

    async fn run_command(&self, command: &'static str) -> Result<(), DeviceError> {
        debug!("[Device] {}: {} {}", self.params.name, self.atvremote, command);
        let output = Command::new(&self.atvremote)
            .args(self.device_args())
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DeviceError::SpawnFailed {
                program: self.atvremote.clone(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(DeviceError::CommandFailed {
                command,
                reason: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            })
        }
    }

    /// Apply one `push_updates` line: emit changed values, or fail every subscription.
    pub fn handle_line(&self, line: &str) {
        apply_line(&self.hub, &self.values, line);
    }

    /// Start the `push_updates` process. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut task = self.push_task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let name = self.params.name.clone();
        let program = self.atvscript.clone();
        let mut args = self.device_args();
        args.push("push_updates".to_string());
        let hub = self.hub.clone();
        let values = self.values.clone();

        *task = Some(tokio::spawn(async move {
            loop {
                if let Err(e) = run_push_updates(&name, &program, &args, &hub, &values).await {
                    error!("[Device] {}: push updates failed: {}", name, e);
                    hub.fail_all(e);
                }
                warn!(
                    "[Device] {}: push updates stopped, restarting in {:?}",
                    name, RESTART_DELAY
                );
                tokio::time::sleep(RESTART_DELAY).await;
            }
        }));
    }
}

impl Drop for PyAtvDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_push_updates(
    name: &str,
    program: &str,
    args: &[String],
    hub: &EventHub,
    values: &Mutex<HashMap<String, String>>,
) -> Result<(), DeviceError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DeviceError::SpawnFailed {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DeviceError::SpawnFailed {
            program: program.to_string(),
            reason: "stdout not captured".to_string(),
        })?;

    info!("[Device] {}: listening for push updates", name);
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => apply_line(hub, values, &line),
            Ok(None) => break,
            Err(e) => {
                return Err(DeviceError::MalformedUpdate(format!(
                    "failed to read output: {}",
                    e
                )));
            }
        }
    }

    let status = child.wait().await.map_err(|e| DeviceError::SpawnFailed {
        program: program.to_string(),
        reason: e.to_string(),
    })?;
    debug!("[Device] {}: {} exited with {}", name, program, status);
    Ok(())
}

fn apply_line(hub: &EventHub, values: &Mutex<HashMap<String, String>>, line: &str) {
    match parse_push_update(line) {
        Ok(PushUpdate::Values(updates)) => {
            for (property, new_value) in updates {
                let old_value = {
                    let mut values = values.lock();
                    if values.get(property) == Some(&new_value) {
                        continue;
                    }
                    values.insert(property.to_string(), new_value.clone())
                };
                hub.emit(
                    &update_event(property),
                    DeviceEvent::Update(ValueChange::new(old_value, new_value)),
                );
            }
        }
        Ok(PushUpdate::Failure(reason)) => hub.fail_all(DeviceError::Reported(reason)),
        Err(e) => hub.fail_all(e),
    }
}

#[async_trait]
impl DeviceHandle for PyAtvDevice {
    fn id(&self) -> Option<String> {
        None
    }

    async fn turn_on(&self) -> Result<(), DeviceError> {
        self.run_command("turn_on").await
    }

    async fn turn_off(&self) -> Result<(), DeviceError> {
        self.run_command("turn_off").await
    }

    fn subscribe(&self, event_name: &str) -> Subscription {
        self.hub.subscribe(event_name)
    }

    /// Stop the `push_updates` process.
    fn stop(&self) {
        if let Some(task) = self.push_task.lock().take() {
            task.abort();
        }
    }
}
