//! Relay engine
//!
//! Bridges one local byte stream to a relay message transport:
//!
//! - [`FlowController`]: cumulative byte accounting and eager acknowledgments
//! - [`Session`]: session identifier and connection phase
//! - [`RelayLoop`]: the two concurrent copy directions tying it all together
//! - [`LocalListener`]: accepts the single local client

pub mod config;
pub mod error;
pub mod flow;
pub mod listener;
pub mod relay;
pub mod session;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use flow::{FlowController, FlowStats};
pub use listener::LocalListener;
pub use relay::{RelayLoop, RelayReport, ShutdownReason};
pub use session::{Session, SessionPhase};
