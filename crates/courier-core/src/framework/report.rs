//! Dispatch reports and the receiver listing.

use serde::Serialize;

use crate::foundation::EventRef;

/// The completion report of one fired event instance.
///
/// Emitted on [`Dispatcher::completions`](crate::Dispatcher::completions)
/// once every chain matched by the fire has finished.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// The fired instance.
    pub event: EventRef,
    /// Name of the fired event type.
    pub event_name: &'static str,
    /// Number of matched entry points.
    pub matched: usize,
    /// Chains whose receiver call returned normally.
    pub delivered: usize,
    /// Chains that were short-circuited, coalesced or abandoned.
    pub skipped: usize,
    /// Chains that failed or panicked.
    pub failures: Vec<ReceiverFailure>,
}

impl DispatchReport {
    pub(crate) fn new(event: EventRef, event_name: &'static str, matched: usize) -> Self {
        Self {
            event,
            event_name,
            matched,
            delivered: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    /// Returns `true` if no chain failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One failed chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverFailure {
    /// `Receiver::entry` of the failed chain.
    pub receiver: String,
    /// The error or panic message.
    pub error: String,
}

/// Describes one registered entry point and its resolved bindings.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiverReport {
    /// Receiver type name.
    pub receiver: String,
    /// Module the receiver was declared in.
    pub module: String,
    /// Entry point name.
    pub entry: String,
    /// Accepted event type.
    pub event: String,
    /// Whether the entry is gated by ordered dispatch.
    pub ordered: bool,
    /// Decorator tags, outermost first.
    pub decorators: Vec<String>,
    /// Observer tags, in call order before the chain.
    pub observers: Vec<String>,
}

impl std::fmt::Display for ReceiverReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}({})", self.receiver, self.entry, self.event)?;
        if self.ordered {
            f.write_str(" [ordered]")?;
        }
        for tag in &self.decorators {
            write!(f, " {tag}")?;
        }
        if !self.observers.is_empty() {
            write!(f, " | {}", self.observers.join(" "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_report_display() {
        let report = ReceiverReport {
            receiver: "Audit".into(),
            module: "app".into(),
            entry: "on_login".into(),
            event: "Login".into(),
            ordered: true,
            decorators: vec!["@timed(warn_after_ms=5)".into()],
            observers: vec!["@logged".into()],
        };
        assert_eq!(
            report.to_string(),
            "Audit::on_login(Login) [ordered] @timed(warn_after_ms=5) | @logged"
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["decorators"][0], "@timed(warn_after_ms=5)");
    }
}
