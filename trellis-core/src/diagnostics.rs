//! Diagnostics Sink
//!
//! Non-fatal warnings (evaluation errors, runaway update cycles, misuse of
//! `set`/`delete` on root state) all funnel through [`report`]. By default
//! they are emitted as `tracing` warnings; tests and hosts can install
//! their own sink per thread.
//!
//! With the `diagnostics` feature disabled, `report` does nothing.

use std::cell::RefCell;
use std::fmt;

use crate::config::Config;

/// A single reported warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Human readable message.
    pub message: String,
    /// Name of the owning context, if the source had one.
    pub context: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} (found in <{}>)", self.message, context),
            None => f.write_str(&self.message),
        }
    }
}

type Sink = Box<dyn Fn(&Diagnostic)>;

thread_local! {
    static SINK: RefCell<Option<Sink>> = const { RefCell::new(None) };
}

/// Install a sink for diagnostics reported on this thread.
pub fn set_sink<F>(sink: F)
where
    F: Fn(&Diagnostic) + 'static,
{
    SINK.with(|slot| *slot.borrow_mut() = Some(Box::new(sink)));
}

/// Restore the default `tracing` sink on this thread.
pub fn clear_sink() {
    SINK.with(|slot| slot.borrow_mut().take());
}

/// Report a non-fatal warning.
#[cfg(feature = "diagnostics")]
pub fn report(message: impl Into<String>, context: Option<&str>) {
    if Config::get().silent {
        return;
    }

    let diagnostic = Diagnostic {
        message: message.into(),
        context: context.map(str::to_owned),
    };

    // The sink is taken out while it runs so that a sink which itself
    // triggers a report does not hit an outstanding borrow.
    let sink = SINK.with(|slot| slot.borrow_mut().take());
    match sink {
        Some(sink) => {
            sink(&diagnostic);
            SINK.with(|slot| {
                let mut slot = slot.borrow_mut();
                if slot.is_none() {
                    *slot = Some(sink);
                }
            });
        }
        None => tracing::warn!(context = ?diagnostic.context, "{}", diagnostic.message),
    }
}

/// Report a non-fatal warning.
#[cfg(not(feature = "diagnostics"))]
#[inline]
pub fn report(_message: impl Into<String>, _context: Option<&str>) {}

/// Report an evaluation error, unless expression warnings are switched off.
pub(crate) fn report_expression_error(what: &str, expression: &str, err: &dyn fmt::Display, context: Option<&str>) {
    if Config::get().warn_expression_errors {
        report(format!("error when {what} \"{expression}\": {err}"), context);
    }
}
