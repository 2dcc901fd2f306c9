use async_trait::async_trait;
use serde_json::Value;

use crate::error::DeviceError;

/// The live full-duplex connection behind a registered device (§4.11:
/// "the transport (a live full-duplex connection)"). The gateway's WS
/// handler supplies a concrete implementation backed by an `axum` WS sink
/// when it calls `DeviceManager::register`.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send_json(&self, payload: Value) -> Result<(), DeviceError>;

    /// Cheap, non-blocking liveness check independent of the heartbeat
    /// timer — used to short-circuit sends to a transport that already
    /// knows it's closed.
    fn is_alive(&self) -> bool;
}
