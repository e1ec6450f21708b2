//! HTTP admission layer: edge middleware, route limiters and response
//! shaping.

mod dispatcher;
mod gate;
pub mod response;
mod security;
mod server;
mod wrapper;

pub use dispatcher::{edge_dispatch, EdgeDispatcher, PathClass};
pub use gate::{Admission, AdmissionGate, AuthenticatedUser, Decision, RequestFacts};
pub use response::{rate_limit_headers, too_many_requests, with_rate_limit_headers, TooManyRequestsBody};
pub use security::SecurityHeaders;
pub use server::{public_router, AdmissionServer, AdmissionStack};
pub use wrapper::{wrap, RouteLimit, RouteLimitLayer, RouteLimiter};
