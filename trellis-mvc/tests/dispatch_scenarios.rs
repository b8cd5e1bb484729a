//! End-to-end dispatch scenarios through the middleware pipeline.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trellis_core::{
    Container, Error, HttpContext, HttpMethod, HttpRequest, HttpResponse, Middleware,
    MiddlewareChain, Next, Provider, ScopedResolver,
};
use trellis_mvc::*;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct NewOrder {
    sku: String,
    quantity: u32,
    notes: Vec<String>,
}

/// Scoped unit of work counting how many instances were released
struct UnitOfWork {
    released: Arc<AtomicUsize>,
}

impl Provider for UnitOfWork {}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct OrdersController {
    work: Arc<UnitOfWork>,
}

impl Controller for OrdersController {
    fn create(resolver: &ScopedResolver) -> Result<Self, Error> {
        Ok(Self {
            work: resolver.resolve::<UnitOfWork>()?,
        })
    }
}

/// What a self-executing result saw when it ran
#[derive(Default)]
struct Observed {
    controller: Option<String>,
    action: Option<String>,
    path: Option<String>,
    order: Option<NewOrder>,
}

struct RecordingResult {
    order: NewOrder,
    observed: Arc<Mutex<Observed>>,
}

#[async_trait]
impl ActionResult for RecordingResult {
    async fn execute(self: Box<Self>, ctx: ActionResultContext<'_>) -> Result<(), Error> {
        let mut observed = self.observed.lock();
        observed.controller = ctx
            .controller::<OrdersController>()
            .map(|_| ctx.action.controller().name().to_string());
        observed.action = Some(ctx.action.name().to_string());
        observed.path = Some(ctx.context.path().to_string());
        observed.order = Some(self.order.clone());
        ctx.context.set_status(201);
        ctx.context.set_content("created");
        Ok(())
    }
}

/// Marks requests that reached the stage after dispatch
struct Fallthrough;

#[async_trait]
impl Middleware for Fallthrough {
    async fn handle(&self, ctx: Arc<HttpContext>, _next: Next) -> Result<(), Error> {
        ctx.set_header("x-fallthrough", "1");
        Ok(())
    }
}

struct App {
    chain: MiddlewareChain,
    released: Arc<AtomicUsize>,
    observed: Arc<Mutex<Observed>>,
}

fn app() -> App {
    let released = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(Mutex::new(Observed::default()));

    let mut container = Container::new();
    let counter = released.clone();
    container.register_scoped(move |_| {
        Ok(UnitOfWork {
            released: counter.clone(),
        })
    });

    let mut actions = ActionTable::new();
    actions
        .add(
            HttpMethod::GET,
            "/orders/greet",
            ActionDescriptor::builder::<OrdersController>("greet")
                .param(ParameterDescriptor::new::<String>("name").from_query())
                .handler(|_, mut args| {
                    let name = args.take::<String>("name")?;
                    Ok(Some(ActionOutput::text(format!("hello {}", name))))
                })
                .unwrap(),
        )
        .add(
            HttpMethod::GET,
            "/orders/find",
            ActionDescriptor::builder::<OrdersController>("find")
                .param(ParameterDescriptor::new::<i64>("id").from_query())
                .handler(|_, mut args| Ok(Some(ActionOutput::text(args.take::<i64>("id")?))))
                .unwrap(),
        )
        .add(HttpMethod::POST, "/orders", {
            let observed = observed.clone();
            ActionDescriptor::builder::<OrdersController>("create")
                .param(ParameterDescriptor::body::<NewOrder>("order"))
                .handler(move |_, mut args| {
                    let order = args.take::<NewOrder>("order")?;
                    Ok(Some(ActionOutput::result(RecordingResult {
                        order,
                        observed: observed.clone(),
                    })))
                })
                .unwrap()
        })
        .add(
            HttpMethod::POST,
            "/orders/flush",
            ActionDescriptor::builder::<OrdersController>("flush")
                .param(ParameterDescriptor::new::<UnitOfWork>("work"))
                .handler_async(|controller, mut args| async move {
                    let work = args.shared::<UnitOfWork>("work")?;
                    // scoped instance is shared between constructor and parameter
                    assert!(Arc::ptr_eq(&work, &controller.work));
                    Ok(None)
                })
                .unwrap(),
        )
        .add(
            HttpMethod::GET,
            "/orders/slow",
            ActionDescriptor::builder::<OrdersController>("slow")
                .handler_async(|_, _| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Some(ActionOutput::text("late")))
                })
                .unwrap(),
        )
        .add(
            HttpMethod::POST,
            "/orders/upload",
            ActionDescriptor::builder::<OrdersController>("upload")
                .param(ParameterDescriptor::body::<NewOrder>("order"))
                .param(ParameterDescriptor::new::<String>("tag"))
                .handler(|_, _| Ok(Some(ActionOutput::text("uploaded"))))
                .unwrap(),
        )
        .add(
            HttpMethod::DELETE,
            "/orders",
            ActionDescriptor::builder::<OrdersController>("delete")
                .handler(|_, _| Err(Error::Internal("storage offline".into())))
                .unwrap(),
        );

    let mut chain = MiddlewareChain::new();
    chain.use_middleware(DispatchMiddleware::new(Arc::new(container), actions));
    chain.use_middleware(Fallthrough);

    App {
        chain,
        released,
        observed,
    }
}

async fn send(app: &App, ctx: HttpContext) -> HttpResponse {
    let ctx = Arc::new(ctx);
    app.chain.run(ctx.clone()).await.unwrap();
    ctx.take_response()
}

fn request(method: HttpMethod, path: &str) -> HttpContext {
    HttpContext::new(HttpRequest::new(method, path))
}

// =============================================================================
// Binding scenarios
// =============================================================================

#[tokio::test]
async fn test_query_string_bound_verbatim() {
    let app = app();
    let response = send(&app, request(HttpMethod::GET, "/orders/greet?name=alice")).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "hello alice");
}

#[tokio::test]
async fn test_unparseable_integer_is_internal_fault() {
    let app = app();
    let response = send(&app, request(HttpMethod::GET, "/orders/find?id=abc")).await;

    assert_eq!(response.status, 500);
    assert!(response.body.is_empty());
    assert!(!response.headers.contains_key("x-fallthrough"));
}

#[tokio::test]
async fn test_integer_parsed() {
    let app = app();
    let response = send(&app, request(HttpMethod::GET, "/orders/find?ID=-12")).await;
    assert_eq!(response.body_text(), "-12");
}

#[tokio::test]
async fn test_body_bound_and_result_context_populated() {
    let app = app();
    let ctx = HttpContext::new(
        HttpRequest::new(HttpMethod::POST, "/orders")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"sku":"A-7","quantity":3,"notes":["gift","fragile"]}"#),
    );
    let response = send(&app, ctx).await;

    assert_eq!(response.status, 201);
    assert_eq!(response.body_text(), "created");

    let observed = app.observed.lock();
    assert_eq!(observed.controller.as_deref(), Some("OrdersController"));
    assert_eq!(observed.action.as_deref(), Some("create"));
    assert_eq!(observed.path.as_deref(), Some("/orders"));
    assert_eq!(
        observed.order,
        Some(NewOrder {
            sku: "A-7".into(),
            quantity: 3,
            notes: vec!["gift".into(), "fragile".into()],
        })
    );
}

#[tokio::test]
async fn test_malformed_body_faults() {
    let app = app();
    let ctx = HttpContext::new(
        HttpRequest::new(HttpMethod::POST, "/orders").with_body(r#"{"sku":"A-7","quantity":"#),
    );
    let response = send(&app, ctx).await;

    assert_eq!(response.status, 500);
    assert!(app.observed.lock().order.is_none());
}

// =============================================================================
// Pipeline behavior
// =============================================================================

#[tokio::test]
async fn test_unresolved_request_passes_through_untouched() {
    let app = app();
    let response = send(&app, request(HttpMethod::GET, "/invoices")).await;

    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
    assert_eq!(response.headers.get("x-fallthrough").map(String::as_str), Some("1"));
    assert_eq!(app.released.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_async_action_without_value_writes_empty_content() {
    let app = app();
    let ctx = request(HttpMethod::POST, "/orders/flush");
    ctx.set_content("stale");
    let response = send(&app, ctx).await;

    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_action_error_maps_to_fault_status() {
    let app = app();
    let response = send(&app, request(HttpMethod::DELETE, "/orders")).await;
    assert_eq!(response.status, 500);
}

// =============================================================================
// Scope lifetime
// =============================================================================

#[tokio::test]
async fn test_scope_released_on_success_and_failure() {
    let app = app();

    send(&app, request(HttpMethod::GET, "/orders/greet?name=bo")).await;
    assert_eq!(app.released.load(Ordering::SeqCst), 1);

    send(&app, request(HttpMethod::GET, "/orders/find?id=x")).await;
    assert_eq!(app.released.load(Ordering::SeqCst), 2);

    send(&app, request(HttpMethod::DELETE, "/orders")).await;
    assert_eq!(app.released.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_scopes_are_isolated_between_concurrent_requests() {
    let app = Arc::new(app());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            send(&app, request(HttpMethod::POST, "/orders/flush")).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().status, 200);
    }

    // one scoped unit of work per dispatch, each released exactly once
    assert_eq!(app.released.load(Ordering::SeqCst), 8);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelled_while_awaiting_action() {
    let app = app();
    let cancel = CancellationToken::new();
    let ctx = HttpContext::with_cancellation(
        HttpRequest::new(HttpMethod::GET, "/orders/slow"),
        cancel.clone(),
    );

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let response = send(&app, ctx).await;
    trigger.await.unwrap();

    assert_eq!(response.status, 500);
    assert_ne!(response.body_text(), "late");
    assert_eq!(app.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_while_reading_body() {
    let app = app();
    let cancel = CancellationToken::new();
    let body = futures_util::stream::pending::<Result<bytes::Bytes, std::io::Error>>();
    let ctx = HttpContext::with_cancellation(
        HttpRequest::new(HttpMethod::POST, "/orders/upload?tag=t").with_body_stream(body),
        cancel.clone(),
    );

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let response = send(&app, ctx).await;
    trigger.await.unwrap();

    assert_eq!(response.status, 500);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_already_cancelled_never_invokes() {
    let app = app();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = HttpContext::with_cancellation(
        HttpRequest::new(HttpMethod::GET, "/orders/greet?name=zed"),
        cancel,
    );

    let response = send(&app, ctx).await;
    assert_eq!(response.status, 500);
    assert!(response.body.is_empty());
}

// =============================================================================
// Options
// =============================================================================

#[tokio::test]
async fn test_custom_fault_status_and_coercion() {
    let mut container = Container::new();
    container.register_scoped(|_| {
        Ok(UnitOfWork {
            released: Arc::new(AtomicUsize::new(0)),
        })
    });

    let mut actions = ActionTable::new();
    actions.add(
        HttpMethod::GET,
        "/level",
        ActionDescriptor::builder::<OrdersController>("level")
            .param(ParameterDescriptor::new::<u8>("level"))
            .handler(|_, mut args| Ok(Some(ActionOutput::text(args.take::<u8>("level")?))))
            .unwrap(),
    );

    let mut coercion = CoercionRegistry::new();
    coercion.register_converter::<u8, _, _>(|raw: &str| match raw {
        "low" => Ok(1),
        "high" => Ok(9),
        other => Err(format!("unknown level '{}'", other)),
    });

    let mut chain = MiddlewareChain::new();
    chain.use_middleware(
        DispatchMiddleware::new(Arc::new(container), actions)
            .with_coercion(coercion)
            .with_options(DispatchOptions {
                fault_status: 400,
                ..DispatchOptions::default()
            }),
    );

    let ok = Arc::new(request(HttpMethod::GET, "/level?level=high"));
    chain.run(ok.clone()).await.unwrap();
    assert_eq!(ok.take_response().body_text(), "9");

    let bad = Arc::new(request(HttpMethod::GET, "/level?level=7"));
    chain.run(bad.clone()).await.unwrap();
    assert_eq!(bad.take_response().status, 400);
}
