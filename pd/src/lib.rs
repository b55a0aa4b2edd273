//! PinDaemon - coordinator for a shared ten-slot pin registry
//!
//! Several independent contexts (a command line, a host bridge, any number
//! of observers) share one persisted registry of pinned resources, each bound
//! to a digit slot. PinDaemon keeps that registry consistent:
//!
//! - commands are applied with optimistic compare-and-swap and bounded retry
//! - host notifications are reconciled one at a time off a queue
//! - a periodic sweep drops entries whose resource no longer exists
//! - every commit is broadcast as a full snapshot to observers
//!
//! # Modules
//!
//! - [`router`] - command interpretation and the optimistic update loop
//! - [`reconciler`] - host event handling and orphan sweeps
//! - [`sync`] - snapshot broadcasting and observer-side views
//! - [`host`] - host collaborator traits and the live resource table
//! - [`ipc`] - socket protocol, listener and client
//! - [`server`] - wiring of the above behind the socket
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod host;
pub mod ipc;
pub mod reconciler;
pub mod router;
pub mod server;
pub mod sync;

pub use config::Config;
pub use host::{
    ActivationError, HostError, LiveResource, ResourceActivator, ResourceEnumerator, ResourceEvent, ResourceTable,
};
pub use reconciler::{ReconcileError, Reconciler, ReconcilerHandle, ReconcilerInput, SweepReport};
pub use router::{Command, CommandError, CommandRouter, Phase, RetryPolicy};
pub use server::Server;
pub use sync::{Broadcaster, LocalView};
