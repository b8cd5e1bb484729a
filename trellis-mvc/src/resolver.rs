//! Mapping requests to actions

use crate::descriptor::ActionDescriptor;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use trellis_core::{HttpContext, HttpMethod};

/// Selects the action a request should be dispatched to.
///
/// Route matching itself is outside the dispatcher; anything that can map a
/// request to a descriptor plugs in here. `None` passes the request on to the
/// next pipeline stage.
pub trait ActionResolver: Send + Sync {
    fn resolve(&self, ctx: &HttpContext) -> Option<Arc<ActionDescriptor>>;
}

impl<F> ActionResolver for F
where
    F: Fn(&HttpContext) -> Option<Arc<ActionDescriptor>> + Send + Sync,
{
    fn resolve(&self, ctx: &HttpContext) -> Option<Arc<ActionDescriptor>> {
        self(ctx)
    }
}

/// Exact `(method, path)` lookup table.
///
/// Paths compare case-insensitively and ignore a trailing slash.
#[derive(Debug, Default)]
pub struct ActionTable {
    routes: HashMap<(HttpMethod, String), Arc<ActionDescriptor>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, method: HttpMethod, path: &str, action: ActionDescriptor) -> &mut Self {
        self.add_arc(method, path, Arc::new(action))
    }

    pub fn add_arc(
        &mut self,
        method: HttpMethod,
        path: &str,
        action: Arc<ActionDescriptor>,
    ) -> &mut Self {
        debug!(
            method = %method,
            path,
            controller = action.controller().name(),
            action = action.name(),
            "Action mapped"
        );
        self.routes.insert((method, normalize(path)), action);
        self
    }

    pub fn get(&self, method: HttpMethod, path: &str) -> Option<&Arc<ActionDescriptor>> {
        self.routes.get(&(method, normalize(path)))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl ActionResolver for ActionTable {
    fn resolve(&self, ctx: &HttpContext) -> Option<Arc<ActionDescriptor>> {
        self.get(ctx.method(), ctx.path()).cloned()
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Controller;
    use trellis_core::{Error, HttpRequest, ScopedResolver};

    struct Pages;

    impl Controller for Pages {
        fn create(_: &ScopedResolver) -> Result<Self, Error> {
            Ok(Pages)
        }
    }

    fn action(name: &str) -> ActionDescriptor {
        ActionDescriptor::builder::<Pages>(name)
            .handler(|_, _| Ok(None))
            .unwrap()
    }

    fn ctx(method: HttpMethod, path: &str) -> HttpContext {
        HttpContext::new(HttpRequest::new(method, path))
    }

    #[test]
    fn test_table_matches_method_and_path() {
        let mut table = ActionTable::new();
        table
            .add(HttpMethod::GET, "/pages/about", action("about"))
            .add(HttpMethod::GET, "/", action("index"));

        let found = table.resolve(&ctx(HttpMethod::GET, "/Pages/About/?x=1")).unwrap();
        assert_eq!(found.name(), "about");
        assert_eq!(table.resolve(&ctx(HttpMethod::GET, "/")).unwrap().name(), "index");
        assert!(table.resolve(&ctx(HttpMethod::POST, "/pages/about")).is_none());
        assert!(table.resolve(&ctx(HttpMethod::GET, "/pages")).is_none());
    }

    #[test]
    fn test_closure_resolver() {
        let only = Arc::new(action("only"));
        let resolver = move |_: &HttpContext| Some(only.clone());
        assert_eq!(
            resolver.resolve(&ctx(HttpMethod::DELETE, "/x")).unwrap().name(),
            "only"
        );
    }
}
