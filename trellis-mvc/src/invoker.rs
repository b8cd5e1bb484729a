//! Action invocation
//!
//! A dispatch moves through
//! `Resolving -> Binding -> Invoking -> ResultHandling -> Done`, with any
//! step able to enter the absorbing `Faulted` state. [`ActionInvoker`] drives
//! the last three steps for one controller instance.

use crate::arguments::ActionArguments;
use crate::binder::ValueBinder;
use crate::coercion::CoercionRegistry;
use crate::descriptor::ActionDescriptor;
use crate::fault::{BindingError, DispatchFault};
use crate::options::DispatchOptions;
use crate::result::{ActionOutput, ActionResultContext, ActionReturn};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, trace};
use trellis_core::{cancellable, Error, Instance, ScopedResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Resolving,
    Binding,
    Invoking,
    ResultHandling,
    Done,
    Faulted,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Done | DispatchState::Faulted)
    }
}

/// Tracks the state of a single dispatch
#[derive(Debug)]
pub struct DispatchProgress {
    state: DispatchState,
}

impl DispatchProgress {
    pub fn new() -> Self {
        Self {
            state: DispatchState::Resolving,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Move to `next`; terminal states never change
    pub fn advance(&mut self, next: DispatchState) {
        if self.state.is_terminal() {
            return;
        }
        trace!(from = ?self.state, to = ?next, "Dispatch state change");
        self.state = next;
    }

    /// Enter `Faulted`, recording the state the failure happened in
    pub fn fault(&mut self, error: impl Into<Error>) -> DispatchFault {
        let phase = self.state;
        self.state = DispatchState::Faulted;
        DispatchFault::new(phase, error)
    }
}

impl Default for DispatchProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds arguments, calls the action and handles its result
pub struct ActionInvoker<'a> {
    registry: &'a CoercionRegistry,
    options: &'a DispatchOptions,
}

impl<'a> ActionInvoker<'a> {
    pub fn new(registry: &'a CoercionRegistry, options: &'a DispatchOptions) -> Self {
        Self { registry, options }
    }

    pub async fn invoke(
        &self,
        progress: &mut DispatchProgress,
        action: &Arc<ActionDescriptor>,
        controller: Instance,
        scope: &ScopedResolver,
    ) -> Result<(), DispatchFault> {
        let cancel = scope.context().cancellation().clone();

        progress.advance(DispatchState::Binding);
        let args = match self.bind_arguments(action, scope).await {
            Ok(args) => args,
            Err(err) => return Err(progress.fault(err)),
        };

        progress.advance(DispatchState::Invoking);
        let returned = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            action.invoke(controller.clone(), args)
        })) {
            Ok(Ok(returned)) => returned,
            Ok(Err(err)) => return Err(progress.fault(err)),
            Err(_) => return Err(progress.fault(Error::Internal("action panicked".to_string()))),
        };

        let output = match returned {
            ActionReturn::Ready(Some(output)) => Some(output),
            ActionReturn::Ready(None) => return Err(progress.fault(BindingError::NullResult)),
            ActionReturn::Deferred(pending) => {
                trace!(action = action.name(), "Awaiting deferred action result");
                let completed = cancellable(&cancel, "awaiting action", async {
                    AssertUnwindSafe(pending)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(Error::Internal("action panicked".to_string())))
                })
                .await;
                match completed {
                    Ok(output) => output,
                    Err(err) => return Err(progress.fault(err)),
                }
            }
        };

        progress.advance(DispatchState::ResultHandling);
        let context = scope.context().clone();
        let handled = match output {
            None => {
                context.set_content("");
                Ok(())
            }
            Some(ActionOutput::Plain(text)) => {
                context.set_content(text);
                Ok(())
            }
            Some(ActionOutput::SelfExecuting(result)) => {
                result
                    .execute(ActionResultContext {
                        controller,
                        action: action.clone(),
                        context,
                        resolver: scope,
                    })
                    .await
            }
        };
        if let Err(err) = handled {
            return Err(progress.fault(err));
        }

        progress.advance(DispatchState::Done);
        Ok(())
    }

    /// Bind every parameter in declaration order
    async fn bind_arguments(
        &self,
        action: &ActionDescriptor,
        scope: &ScopedResolver,
    ) -> Result<ActionArguments, Error> {
        let cancel = scope.context().cancellation().clone();
        let binder = ValueBinder::new(self.registry, self.options, scope);
        let mut args = ActionArguments::new();

        for parameter in action.parameters() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(format!(
                    "cancelled before binding '{}'",
                    parameter.name()
                )));
            }
            let value = binder.bind(parameter, &cancel).await.into_result()?;
            args.push(parameter.name(), value);
        }

        debug!(
            action = action.name(),
            bound = args.len(),
            "Action arguments bound"
        );
        Ok(args)
    }
}
