//! Mock stdio and socket harnesses shared by the workspace's test suites,
//! modeled on the same mock-client/mock-server shape used elsewhere in
//! this codebase's integration tests.

mod mock_socket;
mod mock_stdio;

pub use mock_socket::{MockSocketConnection, MockSocketServer};
pub use mock_stdio::{MockStdioPeer, mock_stdio_pair};
