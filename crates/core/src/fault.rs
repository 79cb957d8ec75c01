//! Engine fault classification

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::{EngineFault, FaultKind};

/// What to do about a non-fatal fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonFatalAction {
    /// Log only
    Ignore,
    /// Nudge the engine to keep loading (continue video-only)
    RestartLoading,
    /// Jump over a buffer hole
    SkipStall,
}

/// How to recover from a recoverable-fatal fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    RestartLoading,
    RecoverMedia,
    /// No self-heal exists; build a new binding
    Rebuild,
}

/// Classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    NonFatal(NonFatalAction),
    RecoverableFatal(RecoveryAction),
    HardFatal,
}

/// Classify an engine fault
pub fn classify(fault: &EngineFault) -> FaultClass {
    if !fault.fatal {
        return FaultClass::NonFatal(match fault.kind {
            FaultKind::AudioTrackLoadTimeout => NonFatalAction::RestartLoading,
            FaultKind::BufferStalled => NonFatalAction::SkipStall,
            _ => NonFatalAction::Ignore,
        });
    }

    match fault.kind {
        FaultKind::Network | FaultKind::ManifestLoad => {
            FaultClass::RecoverableFatal(RecoveryAction::RestartLoading)
        }
        FaultKind::Media | FaultKind::BufferAppend | FaultKind::BufferStalled => {
            FaultClass::RecoverableFatal(RecoveryAction::RecoverMedia)
        }
        FaultKind::LevelLoad | FaultKind::LevelParsing => {
            FaultClass::RecoverableFatal(RecoveryAction::Rebuild)
        }
        FaultKind::ManifestParsing
        | FaultKind::AudioTrackLoadTimeout
        | FaultKind::KeySystem
        | FaultKind::Mux
        | FaultKind::Unsupported
        | FaultKind::Other => FaultClass::HardFatal,
    }
}

/// Session-level error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    NonFatal,
    RecoverableFatal,
    HardFatal,
    RetryExhausted,
    /// No usable descriptor; surfaced before any binding exists
    ResolutionFailure,
}

/// Last error recorded on a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFault {
    pub category: FaultCategory,
    pub message: String,
}

impl SessionFault {
    pub fn new(category: FaultCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::new(FaultCategory::RecoverableFatal, message)
    }

    pub fn hard(message: impl Into<String>) -> Self {
        Self::new(FaultCategory::HardFatal, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(FaultCategory::ResolutionFailure, message)
    }

    pub fn is_resolution_failure(&self) -> bool {
        self.category == FaultCategory::ResolutionFailure
    }
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_fatal_faults() {
        let audio = EngineFault::non_fatal(FaultKind::AudioTrackLoadTimeout, "audioTrackLoadTimeOut");
        assert_eq!(classify(&audio), FaultClass::NonFatal(NonFatalAction::RestartLoading));

        let stall = EngineFault::non_fatal(FaultKind::BufferStalled, "bufferStalledError");
        assert_eq!(classify(&stall), FaultClass::NonFatal(NonFatalAction::SkipStall));

        let append = EngineFault::non_fatal(FaultKind::BufferAppend, "bufferAppendError");
        assert_eq!(classify(&append), FaultClass::NonFatal(NonFatalAction::Ignore));
    }

    #[test]
    fn test_recoverable_faults() {
        assert_eq!(
            classify(&EngineFault::manifest_not_found()),
            FaultClass::RecoverableFatal(RecoveryAction::RestartLoading)
        );
        assert_eq!(
            classify(&EngineFault::fatal(FaultKind::Media, "bufferAppendError")),
            FaultClass::RecoverableFatal(RecoveryAction::RecoverMedia)
        );
        assert_eq!(
            classify(&EngineFault::fatal(FaultKind::LevelParsing, "levelParsingError")),
            FaultClass::RecoverableFatal(RecoveryAction::Rebuild)
        );
    }

    #[test]
    fn test_hard_fatal() {
        let fault = EngineFault::fatal(FaultKind::Unsupported, "no MSE");
        assert_eq!(classify(&fault), FaultClass::HardFatal);
    }
}
