//! forward-core - the engine behind the forward dual-endpoint reverse proxy
//!
//! Each proxy instance listens on one port and relays every request to a
//! single upstream origin, tracing the request and the committed response.
//!
//! The main components are organized into the following modules:
//! - `upstream`: Upstream origin parsing and request target rewriting
//! - `utils`: Path and query composition helpers
//! - `headers`: Hop-by-hop stripping, `Host` clearing, `X-Forwarded-For`
//! - `proxy`: The forwarding service
//! - `capture`: Response status capture decorator
//! - `trace`: Console trace of requests and responses
//! - `server`: Listener and accept loop of one proxy instance
//! - `supervisor`: Joint lifecycle of several proxy instances

pub mod capture;
pub mod headers;
pub mod proxy;
pub mod server;
pub mod supervisor;
pub mod trace;
pub mod upstream;
pub mod utils;
pub use hyper;
