//! Domain-specific error types for sandbox operations.
//!
//! Typed errors let the orchestrator tell a vanished container apart from
//! any other Docker failure without parsing message strings.

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Docker daemon is not running or not accessible.
    #[error("Docker is not available: {message}")]
    DockerUnavailable { message: String },

    /// The image build reported an error.
    #[error("Image build failed for {tag}: {message}")]
    BuildFailed { tag: String, message: String },

    /// The declared files could not be materialized into a build context.
    #[error("Invalid build context: {message}")]
    InvalidBuildContext { message: String },

    /// The container disappeared (exited and was auto-removed, or was killed).
    #[error("Container is gone: {name}")]
    ContainerGone { name: String },

    /// Container operation failed (create, start, attach, stats, etc.).
    #[error("Container operation failed: {message}")]
    ContainerFailed { message: String },
}

impl SandboxError {
    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates a `BuildFailed` error.
    pub fn build_failed(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BuildFailed {
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// Creates an `InvalidBuildContext` error.
    pub fn invalid_build_context(message: impl Into<String>) -> Self {
        Self::InvalidBuildContext {
            message: message.into(),
        }
    }

    /// Creates a `ContainerGone` error.
    pub fn container_gone(name: impl Into<String>) -> Self {
        Self::ContainerGone { name: name.into() }
    }

    /// Creates a `ContainerFailed` error.
    pub fn container_failed(message: impl Into<String>) -> Self {
        Self::ContainerFailed {
            message: message.into(),
        }
    }

    /// Returns true if the container vanished.
    pub fn is_container_gone(&self) -> bool {
        matches!(self, Self::ContainerGone { .. })
    }
}

/// Returns true if any error in the chain reports a vanished container.
pub(crate) fn is_container_gone(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<SandboxError>())
        .any(SandboxError::is_container_gone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_docker_unavailable_error() {
        let err = SandboxError::docker_unavailable("daemon not running");
        assert!(!err.is_container_gone());
        assert_eq!(
            err.to_string(),
            "Docker is not available: daemon not running"
        );
    }

    #[test]
    fn test_build_failed_error() {
        let err = SandboxError::build_failed("findtheflag", "COPY failed");
        assert!(matches!(err, SandboxError::BuildFailed { .. }));
        assert_eq!(
            err.to_string(),
            "Image build failed for findtheflag: COPY failed"
        );
    }

    #[test]
    fn test_container_gone_error() {
        let err = SandboxError::container_gone("challenge_sandbox_from_pid1_worker0");
        assert!(err.is_container_gone());
        assert_eq!(
            err.to_string(),
            "Container is gone: challenge_sandbox_from_pid1_worker0"
        );
    }

    #[test]
    fn test_container_failed_error() {
        let err = SandboxError::container_failed("failed to start");
        assert!(!err.is_container_gone());
        assert_eq!(
            err.to_string(),
            "Container operation failed: failed to start"
        );
    }

    #[test]
    fn test_is_container_gone_through_context() {
        let result: anyhow::Result<()> =
            Err(SandboxError::container_gone("box")).context("while acting");
        assert!(is_container_gone(&result.unwrap_err()));

        let other = anyhow::Error::new(SandboxError::invalid_build_context("bad path"));
        assert!(!is_container_gone(&other));
    }
}
