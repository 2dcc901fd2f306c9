//! Wire types for the three WS transports: `/ws` chat, `/ws/device`
//! satellite/panel registration and config push, `/ws/satellite` wake-word
//! audio sessions. Kept free of any gateway runtime state — this crate only
//! defines what goes on the wire.

pub mod envelopes;
pub mod methods;
