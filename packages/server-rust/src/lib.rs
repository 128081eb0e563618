//! `reel` server: an in-process RPC host with per-call instances, FIFO
//! admission, client-driven transactions and duplex result streaming.

pub mod client;
pub mod duplex;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod transaction;

pub use client::{Client, ClientError, ClientState};
pub use server::RpcServer;
pub use service::ServerConfig;
pub use shutdown::{LifecycleState, ShutdownController};
pub use transaction::TransactionScope;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
