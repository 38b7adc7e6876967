//! Wire protocol between the dispatcher, processors and operators
//!
//! Every remote operation is a JSON request struct posted to a named route and
//! answered with a [`RemoteReply`] carrying a success flag plus error text.

pub mod http;
pub mod messages;
pub mod routes;

pub use http::RemoteCaller;
pub use messages::*;
pub use routes::*;
