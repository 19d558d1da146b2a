use crate::ctx::Ctx;
use crate::error::ServerResult;
use std::sync::Arc;

/// A single step of a route's handler chain.
///
/// Handlers continue the chain by calling [`Ctx::next`]; returning without
/// calling it ends the request.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: &mut Ctx) -> ServerResult<()>;
}

impl<F> Handler for F
where
    F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
{
    fn call(&self, ctx: &mut Ctx) -> ServerResult<()> {
        (self)(ctx)
    }
}

/// Handlers are shared by reference between the per-method copies of a route.
pub type BoxedHandler = Arc<dyn Handler>;

pub fn handler<F>(f: F) -> BoxedHandler
where
    F: Fn(&mut Ctx) -> ServerResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Builds a handler list from closures.
///
/// ```rust
/// use waypoint::{handlers, Routable, Router};
///
/// let mut router = Router::new();
/// router.add("GET", "/", handlers![|c| c.next(), |c| c.send_string("done")]);
/// ```
#[macro_export]
macro_rules! handlers {
    () => {
        compile_error!("The handlers! macro requires at least one handler")
    };

    ($($handler:expr),+ $(,)?) => {
        vec![$($crate::handler::handler($handler)),+]
    };
}
