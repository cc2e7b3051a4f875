//! Socket protocol: one JSON object per line in each direction.
//!
//! ```text
//! → {"cmd":"publish","dataset":"ds1","snapshot":"v1","realm":"PUBLIC"}
//! ← {"ok":true,"data":{"task_id":1}}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::queue::TaskId;

/// Attempts `request_status` makes while the socket comes up.
const STATUS_ATTEMPTS: u32 = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Client → daemon. Fields a command does not use are omitted on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl DaemonRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            ..Self::default()
        }
    }
}

/// Daemon → client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// The payload of a successful response; a refusal becomes
    /// [`DaemonError::Protocol`] carrying the daemon's message.
    pub fn into_data(self) -> Result<Value, DaemonError> {
        match (self.ok, self.error) {
            (true, _) => Ok(self.data.unwrap_or(Value::Null)),
            (false, Some(message)) => Err(DaemonError::Protocol(message)),
            (false, None) => Err(DaemonError::Protocol("request refused".to_string())),
        }
    }
}

/// Blocking client for the daemon socket under one home directory.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn new(home: &Path) -> Self {
        Self {
            socket: socket_path(home),
        }
    }

    /// Open a fresh connection, send `request`, read one response line.
    pub fn call(&self, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
        let not_running = || DaemonError::DaemonNotRunning {
            socket: self.socket.clone(),
        };
        if !self.socket.exists() {
            return Err(not_running());
        }
        let mut stream = match UnixStream::connect(&self.socket) {
            Ok(stream) => stream,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
                ) =>
            {
                return Err(not_running())
            }
            Err(err) => return Err(io_err(&self.socket, err)),
        };

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        stream
            .write_all(&line)
            .map_err(|e| io_err(&self.socket, e))?;

        let mut reply = String::new();
        let read = BufReader::new(stream)
            .read_line(&mut reply)
            .map_err(|e| io_err(&self.socket, e))?;
        if read == 0 {
            return Err(DaemonError::Protocol(
                "connection closed without a response".to_string(),
            ));
        }
        Ok(serde_json::from_str(reply.trim_end())?)
    }

    pub fn status(&self) -> Result<Value, DaemonError> {
        let request = DaemonRequest::command("status");
        let mut attempt = 1;
        loop {
            match self.call(&request) {
                Err(DaemonError::DaemonNotRunning { .. }) if attempt < STATUS_ATTEMPTS => {
                    attempt += 1;
                    std::thread::sleep(STATUS_RETRY_DELAY);
                }
                result => return result?.into_data(),
            }
        }
    }

    pub fn stop(&self) -> Result<(), DaemonError> {
        self.call(&DaemonRequest::command("stop"))?
            .into_data()
            .map(drop)
    }

    pub fn publish(&self, dataset: &str, snapshot: &str, realm: &str) -> Result<TaskId, DaemonError> {
        let request = DaemonRequest {
            dataset: Some(dataset.to_string()),
            snapshot: Some(snapshot.to_string()),
            realm: Some(realm.to_string()),
            ..DaemonRequest::command("publish")
        };
        let data = self.call(&request)?.into_data()?;
        match data.get("task_id").and_then(Value::as_u64) {
            Some(id) => Ok(TaskId(id)),
            None => Err(DaemonError::Protocol(format!(
                "publish acknowledgement without task_id: {data}"
            ))),
        }
    }

    pub fn task(&self, id: TaskId) -> Result<Value, DaemonError> {
        let request = DaemonRequest {
            task_id: Some(id),
            ..DaemonRequest::command("task")
        };
        self.call(&request)?.into_data()
    }
}

/// Send one request to the daemon for `home`.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    DaemonClient::new(home).call(request)
}

/// Daemon status plus the task table. Retries briefly while the socket
/// comes up.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    DaemonClient::new(home).status()
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    DaemonClient::new(home).stop()
}

/// Submit a publish; the daemon acknowledges with the new task id.
pub fn request_publish(
    home: &Path,
    dataset: &str,
    snapshot: &str,
    realm: &str,
) -> Result<TaskId, DaemonError> {
    DaemonClient::new(home).publish(dataset, snapshot, realm)
}

pub fn request_task(home: &Path, id: TaskId) -> Result<Value, DaemonError> {
    DaemonClient::new(home).task(id)
}
