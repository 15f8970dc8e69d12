//! A small, dependency-light MongoDB client core: BSON codec, OP_MSG wire
//! framing, an async composition kernel built on a single-threaded
//! cooperative event loop, and a connection pool.
//!
//! Modules are layered bottom-up: [`erased`] and [`checked`] are leaf
//! utilities; [`bson`] builds the document model on top of them; [`wire`]
//! frames BSON documents as MongoDB wire messages; [`async_core`] and
//! [`event_loop`] provide the scheduling primitives everything above them
//! runs on; [`tls`], [`handshake`] and [`pool`] compose those into a live
//! connection; [`client`] is the user-facing facade.

#[macro_use]
extern crate log;

pub mod async_core;
pub mod bson;
pub mod checked;
pub mod client;
pub mod config;
pub mod erased;
pub mod error;
pub mod event_loop;
pub mod handshake;
pub mod pool;
pub mod tls;
pub mod wire;

pub use bson::{Document, Value, ValueRef};
pub use client::{Client, Collection, Database};
pub use config::{ConnectParams, ConnectionConfiguration};
pub use error::{Error, Result};
