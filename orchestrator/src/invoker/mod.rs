//! Capability Invoker
//!
//! Executes one subtask input against one agent. Backends implement
//! [`CapabilityAdapter`] and are looked up by the agent's declared protocol
//! in an [`AdapterRegistry`]. Raw backend errors are classified into an
//! [`Outcome`] so the orchestrator decides retry vs fallback by type.

mod adapter;
mod http;
mod invoker;
mod outcome;

pub use adapter::{
    AdapterRegistry, CapabilityAdapter, EchoCapabilityAdapter, SharedCapabilityAdapter,
};
pub use http::HttpCapabilityAdapter;
pub use invoker::{CapabilityInvoker, Invocation};
pub use outcome::{classify, CallError, Outcome};
