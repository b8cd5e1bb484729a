//! Parameter value binding
//!
//! [`ValueBinder`] produces a value for one parameter following a fixed
//! priority chain:
//!
//! 1. A body-exclusive parameter is deserialized from the JSON body and
//!    nothing else is consulted.
//! 2. Otherwise the first raw value found in the eligible request sources
//!    (query, then header, then form) is taken. Strings bind verbatim; other
//!    types go through the [`CoercionRegistry`].
//! 3. If that yields nothing, the type is looked up in the request scope.
//! 4. Finally the declared default, then null for nullable types. A value
//!    that failed to parse and was not replaced by any of these is reported
//!    as a coercion failure.

use crate::arguments::BoundValue;
use crate::coercion::{Coercion, CoercionRegistry};
use crate::descriptor::ParameterDescriptor;
use crate::fault::BindingError;
use crate::options::DispatchOptions;
use crate::source::ParameterSource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use trellis_core::{Error, ScopedResolver};

/// Outcome of binding a single parameter
#[derive(Debug)]
pub enum BindingOutcome {
    Created(BoundValue),
    Failed(BindingError),
}

impl BindingOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, BindingOutcome::Created(_))
    }

    pub fn into_result(self) -> Result<BoundValue, BindingError> {
        match self {
            BindingOutcome::Created(value) => Ok(value),
            BindingOutcome::Failed(err) => Err(err),
        }
    }
}

/// Binds parameter values against one request scope
pub struct ValueBinder<'a> {
    registry: &'a CoercionRegistry,
    options: &'a DispatchOptions,
    scope: &'a ScopedResolver,
}

impl<'a> ValueBinder<'a> {
    pub fn new(
        registry: &'a CoercionRegistry,
        options: &'a DispatchOptions,
        scope: &'a ScopedResolver,
    ) -> Self {
        Self {
            registry,
            options,
            scope,
        }
    }

    /// Produce a value for `parameter`
    pub async fn bind(
        &self,
        parameter: &ParameterDescriptor,
        cancel: &CancellationToken,
    ) -> BindingOutcome {
        let name = parameter.name();
        let ty = parameter.ty();

        let sources = match parameter.sources() {
            Ok(sources) => sources,
            Err(conflict) => {
                warn!(
                    parameter = name,
                    annotation = %conflict.annotation,
                    conflicts_with = %conflict.conflicts_with,
                    "Conflicting parameter source annotations"
                );
                return BindingOutcome::Failed(BindingError::SourceConflict {
                    parameter: name.to_string(),
                    conflict,
                });
            }
        };

        if sources.is_body_only() {
            return self.bind_body(parameter, cancel).await;
        }

        let raw = match self.find_raw(parameter, cancel).await {
            Ok(raw) => raw,
            Err(source) => {
                return BindingOutcome::Failed(BindingError::Source {
                    parameter: name.to_string(),
                    source,
                });
            }
        };

        let mut declined = None;
        if let Some((source, raw)) = raw {
            if ty.is_string() {
                self.trace_bound(name, source.as_str());
                return BindingOutcome::Created(BoundValue::Owned(Box::new(raw)));
            }

            match self.registry.coerce(ty, &raw) {
                Coercion::Parsed(value) => {
                    self.trace_bound(name, source.as_str());
                    return BindingOutcome::Created(BoundValue::Owned(value));
                }
                Coercion::Rejected(cause) => {
                    warn!(
                        parameter = name,
                        r#type = ty.name(),
                        %source,
                        %cause,
                        "Value conversion failed"
                    );
                    return BindingOutcome::Failed(BindingError::Coercion {
                        parameter: name.to_string(),
                        type_name: ty.name(),
                        cause,
                    });
                }
                Coercion::Declined => {
                    warn!(
                        parameter = name,
                        r#type = ty.name(),
                        %source,
                        "Value could not be parsed, trying other sources"
                    );
                    declined = Some(format!("'{}' from {} is not a valid value", raw, source));
                }
                Coercion::Exhausted => {
                    trace!(
                        parameter = name,
                        r#type = ty.name(),
                        "No coercion registered, trying other sources"
                    );
                }
            }
        }

        match self.scope.try_resolve_any(ty.id()) {
            Ok(Some(instance)) => {
                self.trace_bound(name, "services");
                return BindingOutcome::Created(BoundValue::Shared(instance));
            }
            Ok(None) => {}
            Err(source) => {
                return BindingOutcome::Failed(BindingError::Source {
                    parameter: name.to_string(),
                    source,
                });
            }
        }

        if let Some(value) = parameter.default_value() {
            self.trace_bound(name, "default");
            return BindingOutcome::Created(BoundValue::Owned(value));
        }

        if ty.is_nullable() {
            self.trace_bound(name, "null");
            return BindingOutcome::Created(BoundValue::Null);
        }

        match declined {
            Some(cause) => BindingOutcome::Failed(BindingError::Coercion {
                parameter: name.to_string(),
                type_name: ty.name(),
                cause,
            }),
            None => BindingOutcome::Failed(BindingError::Unresolvable {
                parameter: name.to_string(),
                type_name: ty.name(),
            }),
        }
    }

    async fn bind_body(
        &self,
        parameter: &ParameterDescriptor,
        cancel: &CancellationToken,
    ) -> BindingOutcome {
        let name = parameter.name();
        let ty = parameter.ty();

        let Some(read) = ty.json_reader() else {
            return BindingOutcome::Failed(BindingError::Coercion {
                parameter: name.to_string(),
                type_name: ty.name(),
                cause: "type cannot be read from a JSON body".to_string(),
            });
        };

        let text = match self.scope.context().read_body_text(cancel).await {
            Ok(text) => text,
            Err(source) => {
                return BindingOutcome::Failed(BindingError::Source {
                    parameter: name.to_string(),
                    source,
                });
            }
        };

        match read(&text) {
            Ok(value) => {
                self.trace_bound(name, "body");
                BindingOutcome::Created(BoundValue::Owned(value))
            }
            Err(e) => {
                warn!(parameter = name, r#type = ty.name(), error = %e, "Request body is not valid JSON for parameter");
                BindingOutcome::Failed(BindingError::Coercion {
                    parameter: name.to_string(),
                    type_name: ty.name(),
                    cause: e.to_string(),
                })
            }
        }
    }

    /// First raw value in source priority order
    async fn find_raw(
        &self,
        parameter: &ParameterDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Option<(ParameterSource, String)>, Error> {
        let sources = parameter.sources().unwrap_or_default();
        let ctx = self.scope.context();
        let request = ctx.request();
        let name = parameter.name();

        for source in sources.request_sources() {
            let found = match source {
                ParameterSource::Query => request.query.first(name).map(str::to_string),
                ParameterSource::Header => request.headers.first(name).map(str::to_string),
                ParameterSource::Form if self.options.allows_form(request.method) => ctx
                    .read_form(cancel)
                    .await?
                    .first(name)
                    .map(str::to_string),
                ParameterSource::Form | ParameterSource::Body => None,
            };
            if let Some(raw) = found {
                return Ok(Some((source, raw)));
            }
        }
        Ok(None)
    }

    fn trace_bound(&self, parameter: &str, source: &str) {
        if self.options.log_bindings {
            debug!(parameter, source, "Parameter bound");
        } else {
            trace!(parameter, source, "Parameter bound");
        }
    }
}
