// HTTP request, response and per-request context types

use crate::form::parse_form_map;
use crate::logging::trace;
use crate::{Error, HttpMethod, HttpStatus, Provider};
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Ordered key to multi-value mapping with case-insensitive key lookup.
///
/// Used for query strings, headers and decoded form bodies. Keys keep the
/// casing of their first occurrence; later values for an equal key (ignoring
/// ASCII case) are appended to the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: Vec<(String, SmallVec<[String; 1]>)>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query string (`a=1&b=two%20words`), percent-decoding keys and values
    pub fn from_query(query: &str) -> Self {
        let mut map = Self::new();
        for part in query.trim_start_matches('?').split('&') {
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            map.append(decode_component(key), decode_component(value));
        }
        map
    }

    /// Append a value, merging into an existing key regardless of case
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(index) => self.entries[index].1.push(value),
            None => {
                let mut values = SmallVec::new();
                values.push(value);
                self.entries.push((key, values));
            }
        }
    }

    /// Builder-style `append`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(key, value);
        self
    }

    /// First value recorded for `key`
    pub fn first(&self, key: &str) -> Option<&str> {
        self.position(key)
            .and_then(|index| self.entries[index].1.first())
            .map(String::as_str)
    }

    /// Every value recorded for `key`, in arrival order
    pub fn get_all(&self, key: &str) -> &[String] {
        match self.position(key) {
            Some(index) => &self.entries[index].1,
            None => &[],
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(key))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParamMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.append(key, value);
        }
        map
    }
}

fn decode_component(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(Cow::into_owned)
        .unwrap_or(plus_decoded)
}

/// Boxed stream of body chunks supplied by the transport
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Request body that is read at most once and cached afterwards
pub struct RequestBody {
    buffered: OnceCell<Bytes>,
    pending: tokio::sync::Mutex<PendingBody>,
}

/// Stream not yet drained, plus the chunks taken from it so far.
///
/// Chunks live here rather than in the reading future, so an interrupted
/// read leaves them in place for the next one to resume from.
#[derive(Default)]
struct PendingBody {
    stream: Option<BodyStream>,
    collected: BytesMut,
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            buffered: OnceCell::new_with(Some(bytes.into())),
            pending: tokio::sync::Mutex::new(PendingBody::default()),
        }
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        Self {
            buffered: OnceCell::new(),
            pending: tokio::sync::Mutex::new(PendingBody {
                stream: Some(Box::pin(stream)),
                collected: BytesMut::new(),
            }),
        }
    }

    /// Collect the whole body, draining the stream on first call.
    ///
    /// A read that is dropped part way keeps what it collected; the next call
    /// continues from there.
    pub async fn bytes(&self) -> Result<Bytes, Error> {
        let bytes = self
            .buffered
            .get_or_try_init(|| async {
                let mut guard = self.pending.lock().await;
                let pending = &mut *guard;
                if let Some(stream) = pending.stream.as_mut() {
                    while let Some(chunk) = stream.next().await {
                        pending.collected.extend_from_slice(&chunk?);
                    }
                }
                pending.stream = None;
                let body = std::mem::take(&mut pending.collected).freeze();
                trace!(bytes = body.len(), "Request body buffered");
                Ok::<_, Error>(body)
            })
            .await?;
        Ok(bytes.clone())
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("buffered", &self.buffered.get().map(Bytes::len))
            .finish()
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

/// HTTP request as handed over by the transport layer
#[derive(Debug)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: ParamMap,
    pub query: ParamMap,
    pub body: RequestBody,
}

impl HttpRequest {
    /// Create a request; a `?query` suffix on `path` is split off and parsed
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), ParamMap::from_query(q)),
            None => (path, ParamMap::new()),
        };
        Self {
            method,
            path,
            headers: ParamMap::new(),
            query,
            body: RequestBody::empty(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::from_bytes(body);
        self
    }

    pub fn with_body_stream<S>(mut self, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        self.body = RequestBody::from_stream(stream);
        self
    }

    /// Get a header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.first(name)
    }

    /// Get a query parameter by name (case-insensitive)
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.first(name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// HTTP response wrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Body decoded as UTF-8 (lossy)
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new(HttpStatus::Ok.code())
    }
}

/// Per-request context: the inbound request, the outbound response slot
/// and the cancellation signal for the request.
///
/// The context is shared as `Arc<HttpContext>` between the pipeline, the
/// scoped resolver and result objects. Only the response slot is mutable.
pub struct HttpContext {
    request: HttpRequest,
    response: Mutex<HttpResponse>,
    cancellation: CancellationToken,
    form: OnceCell<ParamMap>,
}

impl Provider for HttpContext {}

impl HttpContext {
    pub fn new(request: HttpRequest) -> Self {
        Self::with_cancellation(request, CancellationToken::new())
    }

    pub fn with_cancellation(request: HttpRequest, cancellation: CancellationToken) -> Self {
        Self {
            request,
            response: Mutex::new(HttpResponse::default()),
            cancellation,
            form: OnceCell::new(),
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn method(&self) -> HttpMethod {
        self.request.method
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    /// Token cancelled when the caller aborts the request
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Read the full body as UTF-8 text
    pub async fn read_body_text(&self, cancel: &CancellationToken) -> Result<String, Error> {
        let bytes = cancellable(cancel, "reading request body", self.request.body.bytes()).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::BadRequest(format!("Request body is not valid UTF-8: {}", e)))
    }

    /// Read and decode a urlencoded form body.
    ///
    /// A body declared with any other content type decodes to an empty form.
    /// The decoded form is cached, so later reads do not touch the body again.
    ///
    /// ```
    /// use trellis_core::{HttpContext, HttpMethod, HttpRequest};
    ///
    /// # tokio_test::block_on(async {
    /// let ctx = HttpContext::new(
    ///     HttpRequest::new(HttpMethod::POST, "/login")
    ///         .with_header("Content-Type", "application/x-www-form-urlencoded")
    ///         .with_body("user=ann&remember=true"),
    /// );
    /// let cancel = ctx.cancellation().clone();
    /// let form = ctx.read_form(&cancel).await.unwrap();
    /// assert_eq!(form.first("USER"), Some("ann"));
    /// # });
    /// ```
    pub async fn read_form(&self, cancel: &CancellationToken) -> Result<&ParamMap, Error> {
        self.form
            .get_or_try_init(|| async {
                if let Some(content_type) = self.request.content_type() {
                    if !is_urlencoded(content_type) {
                        trace!(content_type, "Skipping form decode for non-form content");
                        return Ok(ParamMap::new());
                    }
                }
                let bytes =
                    cancellable(cancel, "reading form body", self.request.body.bytes()).await?;
                parse_form_map(&bytes)
            })
            .await
    }

    pub fn set_status(&self, status: u16) {
        self.response.lock().status = status;
    }

    /// Replace the full response body with `content`
    pub fn set_content(&self, content: impl Into<String>) {
        self.response.lock().body = content.into().into_bytes();
    }

    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.response.lock().headers.insert(name.into(), value.into());
    }

    /// Lock the response slot for direct writes
    pub fn response(&self) -> MutexGuard<'_, HttpResponse> {
        self.response.lock()
    }

    pub fn response_status(&self) -> u16 {
        self.response.lock().status
    }

    /// Take the response out of the slot, leaving a default one behind
    pub fn take_response(&self) -> HttpResponse {
        std::mem::take(&mut *self.response.lock())
    }
}

impl fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContext")
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

fn is_urlencoded(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// Await `fut` unless `cancel` fires first
pub async fn cancellable<F, T>(cancel: &CancellationToken, what: &str, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled(format!("cancelled while {}", what))),
        out = fut => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_map_case_insensitive_first() {
        let map = ParamMap::new()
            .with("Name", "alice")
            .with("name", "bob")
            .with("other", "x");

        assert_eq!(map.first("NAME"), Some("alice"));
        assert_eq!(map.get_all("name"), &["alice".to_string(), "bob".to_string()]);
        assert_eq!(map.len(), 2);
        assert!(map.first("missing").is_none());
    }

    #[test]
    fn test_from_query_decodes() {
        let map = ParamMap::from_query("?q=two%20words&plus=a+b&flag");
        assert_eq!(map.first("q"), Some("two words"));
        assert_eq!(map.first("plus"), Some("a b"));
        assert_eq!(map.first("flag"), Some(""));
    }

    #[test]
    fn test_request_splits_query() {
        let req = HttpRequest::new(HttpMethod::GET, "/users?page=2");
        assert_eq!(req.path, "/users");
        assert_eq!(req.query_param("PAGE"), Some("2"));
    }

    #[tokio::test]
    async fn test_stream_body_is_read_once() {
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);
        let ctx = HttpContext::new(HttpRequest::new(HttpMethod::POST, "/").with_body_stream(chunks));
        let token = CancellationToken::new();

        assert_eq!(ctx.read_body_text(&token).await.unwrap(), "hello world");
        assert_eq!(ctx.read_body_text(&token).await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_cancelled_read_resumes_without_losing_chunks() {
        let chunks = futures_util::stream::once(async { Ok(Bytes::from_static(b"hello ")) })
            .chain(futures_util::stream::once(async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok(Bytes::from_static(b"world"))
            }));
        let ctx = HttpContext::new(HttpRequest::new(HttpMethod::POST, "/").with_body_stream(chunks));

        let impatient = CancellationToken::new();
        let trigger = impatient.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let err = ctx.read_body_text(&impatient).await.unwrap_err();
        assert!(err.is_cancelled());

        let text = ctx.read_body_text(&CancellationToken::new()).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn test_read_form_skips_json_bodies() {
        let req = HttpRequest::new(HttpMethod::POST, "/")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"a":1}"#);
        let ctx = HttpContext::new(req);

        let form = ctx.read_form(&CancellationToken::new()).await.unwrap();
        assert!(form.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_read_fails() {
        let ctx = HttpContext::new(HttpRequest::new(HttpMethod::POST, "/").with_body("x"));
        let token = CancellationToken::new();
        token.cancel();

        let err = ctx.read_body_text(&token).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_response_slot() {
        let ctx = HttpContext::new(HttpRequest::new(HttpMethod::GET, "/"));
        ctx.set_status(201);
        ctx.set_content("done");

        let response = ctx.take_response();
        assert_eq!(response.status, 201);
        assert_eq!(response.body_text(), "done");
        assert_eq!(ctx.response_status(), 200);
    }
}
