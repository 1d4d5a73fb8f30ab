//! Courier: a chat-command dispatcher.
//!
//! Listeners turn chat traffic into messages, parsers turn messages into
//! commands, and controllers handle commands and reply. The dispatcher
//! connects them through three streams.

pub mod auth;
pub mod clock;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod filter;
pub mod listener;
pub mod logging;
pub mod parser;
pub mod process;
pub mod rules;
pub mod service;
pub mod store;
pub mod transform;
