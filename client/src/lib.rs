//! Client side of the Wanderchat chat core.
//!
//! [`session`] holds the per-surface state machine and is free of I/O.
//! [`api`] and [`realtime`] talk to the server, and [`chat`] wires them
//! to the sessions.

pub mod api;
pub mod chat;
pub mod realtime;
pub mod session;

pub use api::ChatApi;
pub use chat::{ChatClient, OpenError, SendFailure};
pub use realtime::{ConnectionStatus, RealtimeClient, RealtimeConfig};
pub use session::{ChatSession, Epoch, PendingDelete, PendingSend, SendOutcome, SessionState};
