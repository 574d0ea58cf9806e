//! Text-line chat server.
//!
//! Clients connect over TCP and speak a one-command-per-line protocol:
//! `login`, `msg`, `privmsg`, `users`, `joke` and `help`. Modules, leaves first:
//!
//! - [`protocol`] splits inbound lines, names the command words, and encodes
//!   replies and delivered messages.
//! - [`session`] owns one connection: its read loop, its outbound queue, and
//!   an idempotent teardown.
//! - [`registry`] is the only shared state, a username directory used for
//!   claims, broadcast, and directed delivery.
//! - [`dispatcher`] is the per-line state machine that ties the two together.
//! - [`server`] runs the accept loop and shuts every session down on exit.
//! - [`jokes`] serves `joke` replies, [`client`] is a small terminal client,
//!   and [`cli`] parses the command line.

pub mod cli;
pub mod client;
pub mod dispatcher;
pub mod jokes;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
