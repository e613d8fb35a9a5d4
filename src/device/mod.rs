pub mod parser;
pub mod session;
pub mod transport;

pub use session::{SessionController, StreamEvent, StreamHandle};
pub use transport::{open_serial, LineTransport};
