//! Backend connection lifecycle.
//!
//! [`ConnectionManager`] owns the single logical link to the backend. It
//! reconnects with bounded exponential backoff after unintentional closes,
//! drops (never queues) frames that arrive faster than the throttle interval,
//! and reports everything that happens on the link as a [`ConnectionEvent`].

mod manager;
mod throttle;


pub use manager::{
    ConnectionConfig, ConnectionEvent, ConnectionEvents, ConnectionManager, SendOutcome,
    parse_backend_url,
};
pub use throttle::SendThrottle;
