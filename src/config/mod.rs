pub mod paths;
pub mod tunnel;

pub use tunnel::{AuthMethod, DEFAULT_BUFFER_SIZE, DEFAULT_SSH_PORT, HostKeyPolicy, TunnelConfig};
