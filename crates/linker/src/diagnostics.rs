//! The Diagnostic contract (§6, §7): every diagnostic is a `(severity, id,
//! args)` triple, fatal ones set the module failure flag, and warnings are
//! gated by named groups.
//!
//! Grounded in `examples/original_source/include/eld/Diagnostics/` for the
//! severity taxonomy and `ferrum-errors::error!`'s doc-linked codes for the
//! concrete message rendering (`crate::elf64::Error`, etc. already use that
//! macro; this module is the engine-side bookkeeping that sits above it).

use std::sync::atomic::{AtomicBool, Ordering};

/// Severity of a diagnostic (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Verbose,
    Note,
    Warning,
    /// A warning the project has chosen to treat as important even though it
    /// doesn't set the failure flag.
    CriticalWarning,
    Error,
    Fatal,
    /// An invariant violation: aborts in debug builds, reported as fatal in
    /// release (§7 taxonomy).
    Internal,
}

impl Severity {
    /// Whether this severity sets the module's failure flag (§7
    /// "Propagation").
    pub fn is_failing(self) -> bool {
        matches!(self, Self::Error | Self::Fatal | Self::Internal)
    }
}

/// Named warning groups a diagnostic may belong to (§6), each independently
/// togglable by `LinkerConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningGroup {
    LinkerScript,
    ArchiveFile,
    CommandLine,
    ZeroSizedSections,
    AttributeMix,
    WholeArchive,
    LinkerScriptMemory,
    BadDotAssignments,
}

/// One diagnostic, carrying enough context to be attributed to a specific
/// input/section/symbol by the caller (the `context` string is free-form,
/// since the exact formatting is a driver concern out of scope per §1).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// The `ferrum-errors` diagnostic code, e.g. `"E007"`.
    pub code: &'static str,
    pub message: String,
    pub group: Option<WarningGroup>,
}

impl Diagnostic {
    /// Build a new diagnostic not gated by any warning group.
    pub fn new(severity: Severity, code: &'static str, message: impl Into<String>) -> Self {
        Self { severity, code, message: message.into(), group: None }
    }

    /// Attach a warning group.
    pub fn in_group(mut self, group: WarningGroup) -> Self {
        self.group = Some(group);
        self
    }
}

/// Accumulates diagnostics for one link and tracks the module failure flag
/// (§5 "Cancellation": workers check it at loop heads and exit promptly).
///
/// Emission is conceptually behind one mutex (§5); since the pipeline
/// barriers between parallel phases, a plain `Vec` behind `&mut self`
/// suffices here the same way `NamePool` does — callers on worker threads
/// collect their own diagnostics and merge them at the barrier rather than
/// contending on a shared lock per emission.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    failed: AtomicBool,
    disabled_groups: Vec<WarningGroup>,
}

impl DiagnosticEngine {
    /// Create an empty engine with every warning group enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable a warning group: diagnostics gated by it are dropped silently.
    pub fn disable_group(&mut self, group: WarningGroup) {
        self.disabled_groups.push(group);
    }

    /// Emit one diagnostic. Warnings gated by a disabled group are dropped;
    /// anything else is recorded, and the failure flag is set for
    /// [`Severity::is_failing`] severities.
    pub fn emit(&mut self, diagnostic: Diagnostic) {
        if let Some(group) = diagnostic.group {
            if self.disabled_groups.contains(&group) {
                return;
            }
        }

        if diagnostic.severity.is_failing() {
            self.failed.store(true, Ordering::SeqCst);
        }

        self.diagnostics.push(diagnostic);
    }

    /// Whether any emitted diagnostic was fatal enough to abort the link.
    /// Checked "at loop heads" by worker phases per §5.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Every diagnostic emitted so far, in emission order. Warnings are
    /// always returned alongside errors (§7: "accumulated warnings are
    /// always emitted").
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_sets_the_failure_flag() {
        let mut engine = DiagnosticEngine::new();
        assert!(!engine.has_failed());

        engine.emit(Diagnostic::new(Severity::Warning, "E000", "just a warning"));
        assert!(!engine.has_failed());

        engine.emit(Diagnostic::new(Severity::Error, "E007", "multiple definition of `f`"));
        assert!(engine.has_failed());
        assert_eq!(engine.diagnostics().len(), 2);
    }

    #[test]
    fn disabled_group_is_dropped() {
        let mut engine = DiagnosticEngine::new();
        engine.disable_group(WarningGroup::ZeroSizedSections);

        engine.emit(
            Diagnostic::new(Severity::Warning, "E000", "zero-sized section")
                .in_group(WarningGroup::ZeroSizedSections),
        );

        assert!(engine.diagnostics().is_empty());
    }
}
