mod handlers;
mod server;
mod session;
mod stats;

pub use server::{router, ServerState, StreamServer, StreamServerBuilder};
pub use session::{SessionState, StreamSession, BOUNDARY, PART_HEADER};
pub use stats::{StreamStats, StreamingStats};
