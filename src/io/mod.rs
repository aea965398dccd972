//! I/O layer - process launching and the stdio duplex stream
//!
//! Nothing here knows about JSON-RPC:
//!
//! - **Process**: language server lifecycle, stderr forwarding, exit monitoring
//! - **Duplex**: one bidirectional stream over the child's stdin/stdout pipes

pub mod duplex;
pub mod process;

pub use duplex::DuplexStream;
pub use process::{ChildProcessManager, ProcessError, StopMode};
