//! Dispatcher
//!
//! Central registry of processors and market ownership. Routes administrative
//! and export requests to the processor that owns the market, re-checking
//! ownership after each forwarded call.

pub mod client;
pub mod dispatcher_client;
pub mod registry;
pub mod server;
pub mod service;

pub use client::{HttpProcessorClient, HttpProcessorConnector, ProcessorClient, ProcessorConnector};
pub use dispatcher_client::DispatcherClient;
pub use registry::{AssignmentChange, MarketOwner, ProcessorRegistry, Registration, RegistrationOutcome};
pub use service::Dispatcher;
