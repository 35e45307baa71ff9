//! Sandboxed execution over an untrusted channel
//!
//! An alternative execution path that runs generated code inside a
//! capability-restricted boundary and speaks to it through asynchronous
//! message passing: correlation ids, a pending-request table, per-request
//! timeouts, and a ready handshake. The boundary is a trait so the same
//! client works against an in-process task, a subprocess, or a WASM host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::execute::{CapabilityTable, ComponentHost, RawError};
use crate::transpile::{Transpiler, contains_markup};

/// Request sent across the boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxRequest {
    ExecuteCode { id: u64, payload: ExecutePayload },
}

/// Payload of an execute-code request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutePayload {
    pub code: String,
    pub component_name: Option<String>,
    pub dependencies: Vec<String>,
}

/// Response received from the boundary
///
/// `SandboxReady` is the initialization handshake and carries no id; it is
/// not correlated to any pending request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxResponse {
    SandboxReady,
    ExecutionSuccess { id: u64, payload: SuccessPayload },
    ExecutionError { id: u64, payload: ErrorPayload },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessPayload {
    /// Resolved component name
    pub component: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: WireError,
}

/// Error shape crossing the boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    pub stack: Option<String>,
    pub name: String,
}

impl From<WireError> for RawError {
    fn from(wire: WireError) -> Self {
        let mut error = RawError::new(wire.name, wire.message);
        error.stack = wire.stack;
        error
    }
}

/// Successful sandboxed execution
#[derive(Debug, Clone)]
pub struct ExecutionReply {
    pub component: String,
    pub execution_time_ms: u64,
}

/// The process-isolation boundary
///
/// Implementations take ownership of the request receiver, serve requests
/// on their own task, and must send `SandboxReady` once initialized.
pub trait SandboxBoundary: Send + Sync + 'static {
    fn start(
        &self,
        requests: mpsc::Receiver<SandboxRequest>,
        responses: mpsc::Sender<SandboxResponse>,
    );
}

struct Pending {
    resolve: oneshot::Sender<std::result::Result<SuccessPayload, RawError>>,
    start: Instant,
}

/// Client side of the sandboxed execution engine
///
/// One lazily created, reused instance per draft session. Requests are
/// correlated by a monotonically incrementing id; a response that matches
/// no tracked id is silently ignored.
pub struct Sandbox {
    requests: mpsc::Sender<SandboxRequest>,
    pending: Arc<Mutex<HashMap<u64, Pending>>>,
    next_id: AtomicU64,
    timeout: Duration,
    max_code_bytes: usize,
}

impl Sandbox {
    /// Initialize the boundary and wait for its ready handshake
    pub async fn initialize(
        boundary: Arc<dyn SandboxBoundary>,
        config: &SandboxConfig,
    ) -> Result<Self> {
        let (req_tx, req_rx) = mpsc::channel(32);
        let (resp_tx, mut resp_rx) = mpsc::channel(32);

        boundary.start(req_rx, resp_tx);

        let ready_timeout = Duration::from_millis(config.ready_timeout_ms);
        let ready = tokio::time::timeout(ready_timeout, async {
            while let Some(message) = resp_rx.recv().await {
                if matches!(message, SandboxResponse::SandboxReady) {
                    return true;
                }
                trace!("Discarding pre-handshake sandbox message");
            }
            false
        })
        .await
        .unwrap_or(false);

        if !ready {
            return Err(Error::SandboxNotReady(config.ready_timeout_ms));
        }

        info!("Sandbox boundary ready");

        let pending: Arc<Mutex<HashMap<u64, Pending>>> = Arc::new(Mutex::new(HashMap::new()));
        let dispatch_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(message) = resp_rx.recv().await {
                dispatch(&dispatch_pending, message);
            }
            debug!("Sandbox response channel closed");
        });

        Ok(Self {
            requests: req_tx,
            pending,
            next_id: AtomicU64::new(0),
            timeout: Duration::from_millis(config.timeout_ms),
            max_code_bytes: config.max_code_bytes,
        })
    }

    /// Number of requests still awaiting a response
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Execute code inside the boundary
    ///
    /// Oversized code is rejected locally without crossing the boundary.
    /// On timeout the pending entry is evicted and the caller rejected;
    /// the boundary itself is not torn down, since it may still be
    /// mid-execution, which is an accepted resource trade-off.
    pub async fn execute_code(
        &self,
        code: &str,
        component_name: Option<&str>,
        dependencies: &[String],
    ) -> std::result::Result<ExecutionReply, RawError> {
        if code.len() > self.max_code_bytes {
            return Err(RawError::new(
                "ValidationError",
                format!(
                    "code exceeds maximum sandbox payload size ({} > {} bytes)",
                    code.len(),
                    self.max_code_bytes
                ),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (resolve, resolved) = oneshot::channel();
        let start = Instant::now();

        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, Pending { resolve, start });
        }

        let request = SandboxRequest::ExecuteCode {
            id,
            payload: ExecutePayload {
                code: code.to_string(),
                component_name: component_name.map(String::from),
                dependencies: dependencies.to_vec(),
            },
        };

        if self.requests.send(request).await.is_err() {
            self.evict(id);
            return Err(RawError::new("SandboxError", "sandbox channel closed"));
        }

        match tokio::time::timeout(self.timeout, resolved).await {
            Ok(Ok(Ok(success))) => Ok(ExecutionReply {
                component: success.component,
                execution_time_ms: start.elapsed().as_millis() as u64,
            }),
            Ok(Ok(Err(error))) => Err(error),
            Ok(Err(_recv)) => {
                // Dispatcher dropped the entry without resolving it
                self.evict(id);
                Err(RawError::new("SandboxError", "sandbox dropped the request"))
            }
            Err(_elapsed) => {
                self.evict(id);
                warn!(id, timeout_ms = self.timeout.as_millis() as u64, "Sandbox request timed out");
                Err(RawError::new(
                    "TimeoutError",
                    format!(
                        "sandbox execution timed out after {} ms",
                        self.timeout.as_millis()
                    ),
                ))
            }
        }
    }

    fn evict(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

/// Route a response to its pending request, if any
fn dispatch(pending: &Mutex<HashMap<u64, Pending>>, message: SandboxResponse) {
    let (id, result) = match message {
        SandboxResponse::SandboxReady => {
            trace!("Duplicate ready handshake ignored");
            return;
        }
        SandboxResponse::ExecutionSuccess { id, payload } => (id, Ok(payload)),
        SandboxResponse::ExecutionError { id, payload } => (id, Err(payload.error.into())),
    };

    let entry = pending.lock().ok().and_then(|mut p| p.remove(&id));
    match entry {
        Some(entry) => {
            debug!(id, round_trip_ms = entry.start.elapsed().as_millis() as u64, "Sandbox response");
            // The caller may have timed out between removal and send
            let _ = entry.resolve.send(result);
        }
        None => trace!(id, "Response for unknown request id ignored"),
    }
}

/// In-process boundary backed by the engine's transpiler and host
///
/// The default boundary: runs transpile-and-instantiate on its own task
/// with only the configured capability table in scope. Substitutable by an
/// out-of-process worker or subprocess speaking the same protocol.
pub struct InProcessBoundary {
    transpiler: Arc<dyn Transpiler>,
    host: Arc<dyn ComponentHost>,
    capabilities: CapabilityTable,
}

impl InProcessBoundary {
    pub fn new(
        transpiler: Arc<dyn Transpiler>,
        host: Arc<dyn ComponentHost>,
        capabilities: CapabilityTable,
    ) -> Self {
        Self {
            transpiler,
            host,
            capabilities,
        }
    }

    fn serve(&self, payload: &ExecutePayload) -> std::result::Result<SuccessPayload, WireError> {
        let code = self
            .transpiler
            .transform(&payload.code)
            .map_err(|failure| WireError {
                message: failure.message,
                stack: None,
                name: "TranspileError".to_string(),
            })?;

        if contains_markup(&code) {
            return Err(WireError {
                message: "transpiled output still contains markup syntax".to_string(),
                stack: None,
                name: "TranspileError".to_string(),
            });
        }

        let unit = self
            .host
            .instantiate(&code, &self.capabilities)
            .map_err(|error| WireError {
                message: error.message,
                stack: error.stack,
                name: error.name,
            })?;

        let component = payload
            .component_name
            .as_ref()
            .filter(|name| unit.exports.iter().any(|e| &e == name))
            .cloned()
            .or_else(|| unit.exports.first().cloned())
            .ok_or_else(|| WireError {
                message: "component function is not valid".to_string(),
                stack: None,
                name: "TypeError".to_string(),
            })?;

        Ok(SuccessPayload { component })
    }
}

impl SandboxBoundary for InProcessBoundary {
    fn start(
        &self,
        mut requests: mpsc::Receiver<SandboxRequest>,
        responses: mpsc::Sender<SandboxResponse>,
    ) {
        let transpiler = self.transpiler.clone();
        let host = self.host.clone();
        let capabilities = self.capabilities.clone();

        tokio::spawn(async move {
            let boundary = InProcessBoundary {
                transpiler,
                host,
                capabilities,
            };

            if responses.send(SandboxResponse::SandboxReady).await.is_err() {
                return;
            }

            while let Some(SandboxRequest::ExecuteCode { id, payload }) = requests.recv().await {
                let response = match boundary.serve(&payload) {
                    Ok(success) => SandboxResponse::ExecutionSuccess { id, payload: success },
                    Err(error) => SandboxResponse::ExecutionError {
                        id,
                        payload: ErrorPayload { error },
                    },
                };
                if responses.send(response).await.is_err() {
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::InstantiatedUnit;
    use crate::transpile::TranspileFailure;

    struct PassthroughTranspiler;

    impl Transpiler for PassthroughTranspiler {
        fn transform(&self, source: &str) -> std::result::Result<String, TranspileFailure> {
            Ok(source.replace(['<', '>'], " "))
        }
    }

    struct SingleExportHost;

    impl ComponentHost for SingleExportHost {
        fn instantiate(
            &self,
            _code: &str,
            _capabilities: &CapabilityTable,
        ) -> std::result::Result<InstantiatedUnit, RawError> {
            Ok(InstantiatedUnit {
                exports: vec!["App".to_string()],
            })
        }
    }

    /// Boundary that acknowledges the handshake and then never responds
    struct SilentBoundary;

    impl SandboxBoundary for SilentBoundary {
        fn start(
            &self,
            mut requests: mpsc::Receiver<SandboxRequest>,
            responses: mpsc::Sender<SandboxResponse>,
        ) {
            tokio::spawn(async move {
                let _ = responses.send(SandboxResponse::SandboxReady).await;
                while requests.recv().await.is_some() {
                    // swallow every request
                }
            });
        }
    }

    /// Boundary that never even says ready
    struct DeadBoundary;

    impl SandboxBoundary for DeadBoundary {
        fn start(
            &self,
            _requests: mpsc::Receiver<SandboxRequest>,
            responses: mpsc::Sender<SandboxResponse>,
        ) {
            // Hold the sender so the channel stays open without a handshake
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                drop(responses);
            });
        }
    }

    fn in_process_boundary() -> Arc<dyn SandboxBoundary> {
        Arc::new(InProcessBoundary::new(
            Arc::new(PassthroughTranspiler),
            Arc::new(SingleExportHost),
            CapabilityTable::standard(),
        ))
    }

    #[tokio::test]
    async fn test_execute_code_success() {
        let sandbox = Sandbox::initialize(in_process_boundary(), &SandboxConfig::default())
            .await
            .unwrap();

        let reply = sandbox
            .execute_code("function App() { return null; }", Some("App"), &[])
            .await
            .unwrap();
        assert_eq!(reply.component, "App");
        assert_eq!(sandbox.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_oversized_code_rejected_locally() {
        let config = SandboxConfig {
            max_code_bytes: 16,
            ..SandboxConfig::default()
        };
        let sandbox = Sandbox::initialize(in_process_boundary(), &config)
            .await
            .unwrap();

        let error = sandbox
            .execute_code("function App() { return null; }", None, &[])
            .await
            .unwrap_err();
        assert_eq!(error.name, "ValidationError");
        assert_eq!(sandbox.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_evicts_pending_entry() {
        let config = SandboxConfig {
            timeout_ms: 100,
            ..SandboxConfig::default()
        };
        let sandbox = Sandbox::initialize(Arc::new(SilentBoundary), &config)
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let error = sandbox
            .execute_code("function App() {}", None, &[])
            .await
            .unwrap_err();

        assert_eq!(error.name, "TimeoutError");
        assert!(error.message.contains("100 ms"));
        // Paused clock: the timeout fired at exactly its deadline
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(sandbox.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_survives_timeout() {
        let config = SandboxConfig {
            timeout_ms: 50,
            ..SandboxConfig::default()
        };
        let sandbox = Sandbox::initialize(Arc::new(SilentBoundary), &config)
            .await
            .unwrap();

        let first = sandbox.execute_code("function A() {}", None, &[]).await;
        assert!(first.is_err());

        // The same boundary instance accepts further requests
        let second = sandbox.execute_code("function B() {}", None, &[]).await;
        assert!(second.is_err());
        assert_eq!(sandbox.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_missing_handshake_fails_initialization() {
        let config = SandboxConfig {
            ready_timeout_ms: 50,
            ..SandboxConfig::default()
        };
        let result = Sandbox::initialize(Arc::new(DeadBoundary), &config).await;
        assert!(matches!(result, Err(Error::SandboxNotReady(50))));
    }

    #[tokio::test]
    async fn test_unknown_response_id_ignored() {
        let pending: Arc<Mutex<HashMap<u64, Pending>>> = Arc::new(Mutex::new(HashMap::new()));
        dispatch(
            &pending,
            SandboxResponse::ExecutionSuccess {
                id: 999,
                payload: SuccessPayload {
                    component: "App".to_string(),
                },
            },
        );
        assert!(pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_increase_monotonically() {
        let sandbox = Sandbox::initialize(in_process_boundary(), &SandboxConfig::default())
            .await
            .unwrap();

        sandbox.execute_code("function A() {}", None, &[]).await.unwrap();
        sandbox.execute_code("function B() {}", None, &[]).await.unwrap();
        assert_eq!(sandbox.next_id.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_execution_error_crosses_boundary() {
        struct BrokenHost;

        impl ComponentHost for BrokenHost {
            fn instantiate(
                &self,
                _code: &str,
                _capabilities: &CapabilityTable,
            ) -> std::result::Result<InstantiatedUnit, RawError> {
                Err(RawError::new("ReferenceError", "window is not defined"))
            }
        }

        let boundary = Arc::new(InProcessBoundary::new(
            Arc::new(PassthroughTranspiler),
            Arc::new(BrokenHost),
            CapabilityTable::standard(),
        ));
        let sandbox = Sandbox::initialize(boundary, &SandboxConfig::default())
            .await
            .unwrap();

        let error = sandbox
            .execute_code("function App() {}", Some("App"), &[])
            .await
            .unwrap_err();
        assert_eq!(error.name, "ReferenceError");
        assert_eq!(error.message, "window is not defined");
    }
}
