//! The `server` module answers requests arriving over the broker.
//!
//! [`gateway::Gateway`] owns the broker subscription, [`dispatcher::Dispatcher`]
//! authorizes and routes each request, and [`handlers`] hold the actions.

pub mod dispatcher;
pub mod gateway;
pub mod handlers;

pub use dispatcher::Dispatcher;
pub use gateway::Gateway;
pub use handlers::{Handler, RequestContext, Services};

#[cfg(test)]
mod tests;
