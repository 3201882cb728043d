//! Credential refresh for the sync push.
//!
//! [`SingleFlight`] collapses concurrent refresh attempts into one request;
//! [`TokenSource`] wires it to the refresh-token grant.

pub mod refresh;
pub mod single_flight;

pub use refresh::{Credentials, RefreshError, TokenRefresher, TokenSource};
pub use single_flight::{FlightState, SingleFlight};
