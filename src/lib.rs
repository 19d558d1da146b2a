//! # Waypoint
//!
//! An Express-style HTTP router for Rust.
//!
//! ## Features
//!
//! - Ordered routing: routes and middleware run in registration order
//! - Path parameters (`:id`, `:id?`), greedy wildcards (`*`, `+`)
//! - Prefix middleware chained through `Ctx::next`
//! - Mountable sub-routers and route groups
//! - Prefix-indexed route tree, rebuilt only when routes change
//! - 404 / 405 with `Allow` out of the box
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use waypoint::{App, Routable, Router};
//!
//! fn main() {
//!     waypoint::logging::init("waypoint=info");
//!     let mut app = App::new();
//!
//!     app.middleware("/", |c| {
//!         c.set("X-Powered-By", "waypoint");
//!         c.next()
//!     });
//!     app.get("/", |c| c.send_string("Hello, World!"));
//!
//!     let mut users = Router::new();
//!     users.get("/:id", |c| {
//!         let id = c.param("id").to_owned();
//!         c.json(&waypoint::json!({ "id": id }))
//!     });
//!     app.mount("/users", users);
//!
//!     app.listen("127.0.0.1:3000").unwrap();
//! }
//! ```

pub mod app;
pub mod config;
pub mod ctx;
pub mod error;
pub mod handler;
pub mod http;
pub mod logging;
pub mod router;
pub extern crate serde_json;

pub use app::App;
pub use config::{Config, ConfigError};
pub use ctx::Ctx;
pub use error::{ServerError, ServerResult, TransportError};
pub use handler::{BoxedHandler, Handler};
pub use http::{Body, Method, Request, Response};
pub use router::route::Route;
pub use router::tree::TreeIndex;
pub use router::{Group, Routable, Router};

// Reexport serde_json
pub use serde_json::{json, Value};
