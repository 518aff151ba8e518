#![deny(unsafe_code)]

extern crate self as barfi;

mod backend;
mod filename;
mod handler;
mod incoming;
mod listener;
mod registry;
mod server;

#[cfg(test)]
mod testutil;

pub use backend::{
    Backend, ListenHook, NetworkMode, NodeInfo, Peer, UserId, UserProfile, set_listen_hook,
};
pub use filename::PARTIAL_SUFFIX;
pub use handler::DropHandler;
pub use incoming::{IncomingFile, PartialFile};
pub use listener::DropListener;
pub use registry::ListenerSet;
pub use server::{DropConfig, DropServer, WaitingFile};
