pub(crate) mod method;
pub(crate) mod request;
pub(crate) mod response;

pub use method::{InvalidMethod, Method, METHOD_USE};
pub use request::{Body, Request};
pub use response::Response;
