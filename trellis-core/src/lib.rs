// Core library for the Trellis MVC dispatcher
// Request context, dependency container, scoped resolution and the middleware pipeline

pub mod container;
pub mod error;
pub mod form;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod scope;
pub mod status;
pub mod traits;

// Re-export commonly used types
pub use container::*;
pub use error::*;
pub use form::*;
pub use http::*;
pub use middleware::*;
pub use scope::*;
pub use status::*;
pub use traits::*;
