//! Shared types, configuration, error taxonomy, and cross-cutting primitives
//! used by every Renfield crate: the clock abstraction, the circuit breaker,
//! and the permission taxonomy all live here because every subsystem needs
//! them without depending on each other.

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod permissions;
pub mod reminder;
pub mod types;
pub mod vector;

pub use circuit_breaker::{BreakerConfig, BreakerResult, CircuitBreaker, CircuitOpenError, CircuitState};
pub use clock::{Clock, SystemClock};
pub use config::RenfieldConfig;
pub use error::{RenfieldError, Result};
pub use permissions::{require_any_permission, require_permission, Permission, Role};
pub use reminder::{Reminder, ReminderStatus};
pub use types::{ConnId, DeviceId, RoomId, SessionKey, UserId, UserRole};
pub use vector::{cosine_similarity, decode_embedding, encode_embedding};
