//! Clients for the external services this backend consumes.
//!
//! Gateways are the only place upstream wire formats appear; everything
//! above them speaks the crate's own types.

pub mod generation;
pub mod rag;

use std::future::Future;
use std::pin::Pin;

pub use generation::{HttpGenerationGateway, TextGenerator};
pub use rag::{DocumentRetriever, HttpRagGateway, RetrievedDoc};

/// Boxed future type for gateway operations.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
