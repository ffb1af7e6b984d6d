//! `mediaflow`: a background worker that drains queued media-analysis
//! tasks, builds and runs their flow against a bounded DAG scheduler, and
//! persists the aggregated outcome back to the task queue.
//!
//! Module map mirrors the component design: [`model`] and [`config`] are
//! the shared data types; [`retry`], [`hashing`], [`upsert`], and
//! [`cache`] are the small pure/near-pure building blocks every step
//! executor composes; [`services`] and [`store`] are the outbound
//! interfaces (with real and in-memory adapters) collected behind
//! [`deps::Deps`]; [`steps`] dispatches to one executor per step kind;
//! [`flow`] assembles a task into a DAG, schedules it, and aggregates its
//! terminal result; and [`controller`] is the outer poll loop tying all of
//! the above together. [`cli`] is the worker binary's entrypoint.

pub mod cache;
pub mod cli;
pub mod config;
pub mod controller;
pub mod deps;
pub mod errors;
pub mod flow;
pub mod hashing;
pub mod model;
pub mod retry;
pub mod services;
pub mod steps;
pub mod store;
pub mod upsert;
pub mod validation;
