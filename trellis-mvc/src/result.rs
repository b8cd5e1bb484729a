//! Action return values and self-executing results

use crate::descriptor::{ActionDescriptor, Controller};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use trellis_core::{Error, HttpContext, Instance, ScopedResolver};

/// What an action produced once any deferred computation has completed
pub enum ActionOutput {
    /// A plain value, written as text
    Plain(String),
    /// A result that writes its own response
    SelfExecuting(Box<dyn ActionResult>),
}

impl ActionOutput {
    pub fn text(value: impl fmt::Display) -> Self {
        ActionOutput::Plain(value.to_string())
    }

    pub fn result(result: impl ActionResult + 'static) -> Self {
        ActionOutput::SelfExecuting(Box::new(result))
    }
}

impl fmt::Debug for ActionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutput::Plain(text) => f.debug_tuple("Plain").field(text).finish(),
            ActionOutput::SelfExecuting(_) => f.write_str("SelfExecuting"),
        }
    }
}

/// What an action handler returned
pub enum ActionReturn {
    /// Completed immediately; `None` is a null return
    Ready(Option<ActionOutput>),
    /// A computation to await; `None` on completion means no value
    Deferred(BoxFuture<'static, Result<Option<ActionOutput>, Error>>),
}

impl fmt::Debug for ActionReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionReturn::Ready(output) => f.debug_tuple("Ready").field(output).finish(),
            ActionReturn::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// Everything a result object may need to write its response
pub struct ActionResultContext<'a> {
    pub controller: Instance,
    pub action: Arc<ActionDescriptor>,
    pub context: Arc<HttpContext>,
    pub resolver: &'a ScopedResolver,
}

impl ActionResultContext<'_> {
    /// The controller instance, if it is a `C`
    pub fn controller<C: Controller>(&self) -> Option<Arc<C>> {
        self.controller.clone().downcast::<C>().ok()
    }
}

/// A result that knows how to write itself to the response
#[async_trait]
pub trait ActionResult: Send {
    async fn execute(self: Box<Self>, ctx: ActionResultContext<'_>) -> Result<(), Error>;
}

/// Text content with an optional status and content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentResult {
    pub content: String,
    pub content_type: Option<String>,
    pub status: Option<u16>,
}

impl ContentResult {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: None,
            status: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

#[async_trait]
impl ActionResult for ContentResult {
    async fn execute(self: Box<Self>, ctx: ActionResultContext<'_>) -> Result<(), Error> {
        let mut response = ctx.context.response();
        if let Some(status) = self.status {
            response.status = status;
        }
        if let Some(content_type) = self.content_type {
            response.headers.insert("content-type".to_string(), content_type);
        }
        response.body = self.content.into_bytes();
        Ok(())
    }
}

/// A value serialized as JSON
pub struct JsonResult<T> {
    value: T,
    status: Option<u16>,
}

impl<T: Serialize + Send> JsonResult<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

#[async_trait]
impl<T: Serialize + Send> ActionResult for JsonResult<T> {
    async fn execute(self: Box<Self>, ctx: ActionResultContext<'_>) -> Result<(), Error> {
        let body = serde_json::to_vec(&self.value).map_err(|e| Error::Serialization(e.to_string()))?;
        let mut response = ctx.context.response();
        if let Some(status) = self.status {
            response.status = status;
        }
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response.body = body;
        Ok(())
    }
}

/// A bare status code with no body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCodeResult(pub u16);

#[async_trait]
impl ActionResult for StatusCodeResult {
    async fn execute(self: Box<Self>, ctx: ActionResultContext<'_>) -> Result<(), Error> {
        ctx.context.set_status(self.0);
        Ok(())
    }
}
