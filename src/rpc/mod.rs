//! JSON-RPC 2.0 over a Unix domain socket: message types, line codec,
//! method dispatch, the daemon server and the client proxy.

pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod message;
pub mod methods;
pub mod server;
