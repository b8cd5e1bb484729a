//! View results rendered by an external engine

use crate::result::{ActionResult, ActionResultContext};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use trellis_core::{Error, Provider};

/// Renders a named view with a model.
///
/// Template lookup and rendering live outside the dispatcher; register an
/// engine in the container as a [`ViewEngineHandle`].
pub trait ViewEngine: Send + Sync {
    /// Render `view`, a `Controller/view` path, with `model`
    fn render(&self, view: &str, model: &Value) -> Result<String, Error>;
}

/// Container registration for the active view engine
#[derive(Clone)]
pub struct ViewEngineHandle(pub Arc<dyn ViewEngine>);

impl ViewEngineHandle {
    pub fn new(engine: impl ViewEngine + 'static) -> Self {
        Self(Arc::new(engine))
    }
}

impl Provider for ViewEngineHandle {}

/// Render a view through the registered [`ViewEngine`]
#[derive(Debug, Clone, Default)]
pub struct ViewResult {
    name: Option<String>,
    model: Value,
    status: Option<u16>,
}

impl ViewResult {
    /// The view named after the action, without a model
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model<T: Serialize>(model: &T) -> Result<Self, Error> {
        let model = serde_json::to_value(model).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Self {
            model,
            ..Self::default()
        })
    }

    /// Render `name` instead of the action's own view
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

#[async_trait]
impl ActionResult for ViewResult {
    async fn execute(self: Box<Self>, ctx: ActionResultContext<'_>) -> Result<(), Error> {
        let engine = ctx.resolver.resolve::<ViewEngineHandle>()?;
        let controller = ctx.action.controller().name();
        let folder = controller.strip_suffix("Controller").unwrap_or(controller);
        let view = self.name.as_deref().unwrap_or(ctx.action.name());
        let path = format!("{}/{}", folder, view);

        debug!(view = %path, "Rendering view");
        let html = engine.0.render(&path, &self.model)?;

        let mut response = ctx.context.response();
        if let Some(status) = self.status {
            response.status = status;
        }
        response
            .headers
            .insert("content-type".to_string(), "text/html; charset=utf-8".to_string());
        response.body = html.into_bytes();
        Ok(())
    }
}
