//! Server-side core of a web-accessible multi-session terminal gateway:
//! local pseudo-terminal shells, ephemeral container-exec shells, and
//! pooled-SSH remote shells, multiplexed over a framed websocket protocol.

pub mod catalog;
pub mod config;
pub mod container;
pub mod cwd;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod local;
pub mod logger;
pub mod pool;
pub mod protocol;
pub mod remote;
pub mod server;
