//! # Broker Session
//!
//! Connection lifecycle and session state of the one broker session the client
//! keeps open.
//!
//! ## Module Architecture
//!
//! ```text
//! session/
//! ├── config.rs   - Construction inputs and the fixed post-connect handshake
//! ├── error.rs    - SessionError taxonomy
//! ├── manager.rs  - SessionManager state machine and completion handling
//! ├── message.rs  - Arrived messages and payload decoding
//! ├── pending.rs  - Per-call async resolution
//! └── state.rs    - ConnectionState, counters and status snapshots
//! ```
//!
//! ## Flow
//!
//! ```text
//! caller ──connect/subscribe/publish/disconnect──► SessionManager ──► Transport
//!   ▲                                                   │   ▲             │
//!   └────────────────────── Pending ◄───────────────────┘   └── events ───┘
//!                                                       │
//!                                                       └──► Sink (display)
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod message;
pub mod pending;
pub mod state;

pub use config::{SessionConfig, CONNECTED_ANNOUNCEMENT, DEFAULT_QOS, DEFAULT_TOPIC};
pub use error::SessionError;
pub use manager::SessionManager;
pub use message::{InboundMessage, EMPTY_MESSAGE};
pub use pending::{Outcome, Pending};
pub use state::{ConnectionState, SessionStats, SessionStatus};
