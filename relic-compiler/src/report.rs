//! Central diagnostic collection with fatal/continuation semantics.
//!
//! Every pass reports into one [`Report`]. Non-fatal errors accumulate and
//! abort compilation between passes via [`Report::validate`]; fatal errors
//! abort immediately. A diagnostic flagged `CONTINUED` chains the next
//! diagnostic onto it as a note (or as a second fatal line when the primary
//! was fatal), which is how "previously reserved here" style follow-ups are
//! rendered.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use relic_types::SourceLocation;

bitflags! {
    /// Flags altering how an error is counted and rendered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReportErrorFlags: u8 {
        /// Abort the current pass once the diagnostic chain completes.
        const FATAL = 0x01;
        /// The next diagnostic continues this one.
        const CONTINUED = 0x02;
        /// An invariant violation inside the compiler; always fatal.
        const INTERNAL_ERROR = 0x04;
    }
}

/// Rendered severity of one diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Error,
    InternalError,
    Note,
}

impl Severity {
    /// The `<severity>:` prefix used in rendered diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::InternalError => "internal error",
            Severity::Note => "note",
        }
    }
}

/// One diagnostic line.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: SourceLocation,
}

impl core::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.location.is_empty() {
            write!(f, "{}: {}", self.severity.label(), self.message)
        } else {
            write!(
                f,
                "{}: {}: {}",
                self.location,
                self.severity.label(),
                self.message
            )
        }
    }
}

/// Receives finished diagnostics. Hosts render these to a TTY, an LSP
/// client, or a test buffer.
pub trait DiagnosticSink {
    /// Called once per diagnostic line, in order.
    fn diagnostic(&mut self, diagnostic: &Diagnostic);
    /// Out-of-band progress/summary text, e.g. the final failure notice.
    fn notice(&mut self, message: &str);
}

/// A sink that keeps everything in memory, shared with the test that wants
/// to assert on it.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    inner: Rc<RefCell<CollectedDiagnostics>>,
}

/// Storage behind [`CollectingSink`].
#[derive(Debug, Default)]
pub struct CollectedDiagnostics {
    pub diagnostics: Vec<Diagnostic>,
    pub notices: Vec<String>,
}

impl CollectingSink {
    /// A fresh, empty sink.
    pub fn new() -> CollectingSink {
        CollectingSink::default()
    }

    /// All diagnostics captured so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.borrow().diagnostics.clone()
    }

    /// Rendered `<path>:<line>: <severity>: <message>` lines.
    pub fn rendered(&self) -> Vec<String> {
        self.inner
            .borrow()
            .diagnostics
            .iter()
            .map(|diagnostic| diagnostic.to_string())
            .collect()
    }
}

impl DiagnosticSink for CollectingSink {
    fn diagnostic(&mut self, diagnostic: &Diagnostic) {
        self.inner.borrow_mut().diagnostics.push(diagnostic.clone());
    }

    fn notice(&mut self, message: &str) {
        self.inner.borrow_mut().notices.push(message.to_owned());
    }
}

/// A sink that forwards diagnostics to `tracing`, for embedding the
/// compiler in services that already have a subscriber installed.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn diagnostic(&mut self, diagnostic: &Diagnostic) {
        match diagnostic.severity {
            Severity::Note => tracing::info!(target: "relic", "{}", diagnostic),
            _ => tracing::error!(target: "relic", "{}", diagnostic),
        }
    }

    fn notice(&mut self, message: &str) {
        tracing::info!(target: "relic", "{}", message);
    }
}

/// Central error collector. See the module docs for the abort rules.
pub struct Report {
    sink: Box<dyn DiagnosticSink>,
    aborted: bool,
    errors: usize,
    previous_flags: ReportErrorFlags,
}

impl Report {
    /// Error count at which compilation gives up wholesale.
    pub const MAX_ERRORS: usize = 64;

    /// A report writing into `sink`.
    pub fn new(sink: Box<dyn DiagnosticSink>) -> Report {
        Report {
            sink,
            aborted: false,
            errors: 0,
            previous_flags: ReportErrorFlags::empty(),
        }
    }

    fn severity(&self, flags: ReportErrorFlags) -> Severity {
        if flags.contains(ReportErrorFlags::INTERNAL_ERROR) {
            Severity::InternalError
        } else if flags.contains(ReportErrorFlags::FATAL) {
            Severity::Fatal
        } else if self.previous_flags.contains(ReportErrorFlags::CONTINUED) {
            Severity::Note
        } else {
            Severity::Error
        }
    }

    /// Records one diagnostic. `CONTINUED` keeps the chain open; `FATAL`
    /// (on this line or carried from the chain's primary) aborts once the
    /// chain closes.
    pub fn error(&mut self, message: String, location: SourceLocation, flags: ReportErrorFlags) {
        if self.aborted {
            return;
        }
        let severity = self.severity(flags);
        self.sink.diagnostic(&Diagnostic {
            severity,
            message,
            location: location.clone(),
        });

        let mut aborting = flags.contains(ReportErrorFlags::FATAL)
            || self.previous_flags.contains(ReportErrorFlags::FATAL);
        self.previous_flags =
            flags | (self.previous_flags & ReportErrorFlags::FATAL);

        if flags.contains(ReportErrorFlags::CONTINUED) {
            aborting = false;
        } else {
            self.errors += 1;
        }

        if self.errors >= Report::MAX_ERRORS {
            self.sink.diagnostic(&Diagnostic {
                severity: Severity::Fatal,
                message: "too many errors encountered. stopping.".into(),
                location,
            });
            aborting = true;
        }

        if aborting {
            self.abort();
        }
    }

    /// Reports with no flags.
    pub fn plain_error(&mut self, message: String, location: SourceLocation) {
        self.error(message, location, ReportErrorFlags::empty());
    }

    /// Aborts if any error accumulated; returns whether compilation may
    /// continue. Called between passes.
    pub fn validate(&mut self) -> bool {
        if self.errors > 0 {
            self.abort();
        }
        self.alive()
    }

    /// Whether compilation has not yet aborted.
    pub fn alive(&self) -> bool {
        !self.aborted
    }

    /// Number of counted (non-continuation) errors.
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Out-of-band message.
    pub fn notice(&mut self, message: &str) {
        self.sink.notice(message);
    }

    fn abort(&mut self) {
        if !self.aborted {
            let message = format!("failed with {} error(s).", self.errors);
            self.sink.notice(&message);
            self.aborted = true;
        }
    }
}

impl core::fmt::Debug for Report {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Report")
            .field("aborted", &self.aborted)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> (Report, CollectingSink) {
        let sink = CollectingSink::new();
        (Report::new(Box::new(sink.clone())), sink)
    }

    #[test]
    fn continuation_renders_as_note() {
        let (mut report, sink) = report();
        report.error(
            "overlap conflict".into(),
            SourceLocation::line("a.wiz", 3),
            ReportErrorFlags::CONTINUED,
        );
        report.error(
            "previously reserved here".into(),
            SourceLocation::line("a.wiz", 1),
            ReportErrorFlags::empty(),
        );
        let rendered = sink.rendered();
        assert_eq!(rendered[0], "a.wiz:3: error: overlap conflict");
        assert_eq!(rendered[1], "a.wiz:1: note: previously reserved here");
        assert!(report.alive());
        assert!(!report.validate());
    }

    #[test]
    fn fatal_primary_forces_fatal_chain_then_aborts() {
        let (mut report, sink) = report();
        report.error(
            "bank overflow".into(),
            SourceLocation::line("a.wiz", 3),
            ReportErrorFlags::FATAL | ReportErrorFlags::CONTINUED,
        );
        report.error(
            "while writing data".into(),
            SourceLocation::line("a.wiz", 3),
            ReportErrorFlags::empty(),
        );
        assert!(!report.alive());
        let rendered = sink.rendered();
        assert!(rendered[0].contains("fatal:"));
        // The continuation inherits the fatal severity of the chain.
        assert!(rendered[1].contains("fatal:"));
        // Further errors after abort are dropped.
        report.plain_error("ignored".into(), SourceLocation::empty());
        assert_eq!(sink.rendered().len(), 2);
    }

    #[test]
    fn error_threshold_escalates() {
        let (mut report, sink) = report();
        for index in 0..Report::MAX_ERRORS {
            report.plain_error(format!("error {}", index), SourceLocation::empty());
        }
        assert!(!report.alive());
        let rendered = sink.rendered();
        assert!(rendered
            .last()
            .unwrap()
            .contains("too many errors encountered"));
    }
}
