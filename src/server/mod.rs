mod server;

pub use server::RaftRpcServer;
