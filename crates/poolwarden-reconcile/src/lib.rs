//! poolwarden-reconcile — decides and applies attach/detach actions.
//!
//! # Decision table
//!
//! ```text
//! coordinator role      proxy membership    action
//! ─────────────────     ────────────────    ──────────
//! primary | standby     != up               Attach
//! unknown               == up               Detach
//! anything else                             none
//! ```
//!
//! Every node is evaluated on every cycle against freshly queried proxy
//! state, even when the coordinator snapshot has not changed. The proxy can
//! drift on its own (operator action, failover quarantine), and a missed or
//! failed action is simply retried on the next cycle.

pub mod reconciler;

pub use reconciler::{decide, ReconcileReport, Reconciler};
