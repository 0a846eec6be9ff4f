//! A self-contained map-reduce orchestration engine.
//!
//! The [`orchestrator::Orchestrator`] drives one pipeline run through four
//! stages: fetch records from an [`source::InputSource`], fan map tasks out
//! over the bounded [`pool::WorkerPool`], group intermediate pairs with
//! [`shuffle`], fan reduce tasks out the same way, and hand the final
//! key-sorted mapping to a [`sink::ResultSink`]. Scheduling, retry and
//! cancellation live here; the map and reduce functions themselves come
//! from the `workload` crate.

pub mod orchestrator;
pub mod pool;
pub mod shuffle;
pub mod sink;
pub mod source;
pub mod task;
