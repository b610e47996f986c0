use tokio::io::{DuplexStream, duplex};

const DEFAULT_BUFFER: usize = 64 * 1024;

/// One end of an in-memory stdio pair: reads what `peer` writes and vice
/// versa, standing in for the orchestrator's side of the module's real
/// stdin/stdout during tests.
pub struct MockStdioPeer {
    pub reader: DuplexStream,
    pub writer: DuplexStream,
}

/// Build a connected pair of in-memory stdio channels: `module` is what
/// the code under test reads/writes, `peer` is what the test drives to
/// stand in for the orchestrator.
pub fn mock_stdio_pair() -> (MockStdioPeer, MockStdioPeer) {
    let (module_writer, peer_reader) = duplex(DEFAULT_BUFFER);
    let (peer_writer, module_reader) = duplex(DEFAULT_BUFFER);
    (
        MockStdioPeer { reader: module_reader, writer: module_writer },
        MockStdioPeer { reader: peer_reader, writer: peer_writer },
    )
}
