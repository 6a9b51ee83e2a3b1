//! Engine error types

use thiserror::Error;

use crate::backend::{BackendError, ResourceKind, ShaderStage, UniformKind};
use crate::scene::NodeId;

/// Errors surfaced by the engine layers above the backend
#[derive(Error, Debug)]
pub enum RenderError {
    /// GPU object allocation failed
    #[error("failed to create {kind}: {message}")]
    ResourceCreation { kind: ResourceKind, message: String },
    /// A shader stage failed to compile
    #[error("{stage:?} shader of `{label}` failed to compile:\n{log}")]
    ShaderCompile {
        label: String,
        stage: ShaderStage,
        log: String,
    },
    /// Compiled stages failed to link
    #[error("program `{label}` failed to link: {log}")]
    ProgramLink { label: String, log: String },
    /// Use of a destroyed or never-created handle
    #[error("invalid binding: {kind} {id} is not live")]
    InvalidBinding { kind: ResourceKind, id: u64 },
    /// Re-parenting would make a node its own ancestor
    #[error("setting parent of {node:?} to {parent:?} would create a cycle")]
    SceneGraphCycle { node: NodeId, parent: NodeId },
    #[error("unknown scene node {0:?}")]
    UnknownNode(NodeId),
    #[error("uniform `{name}` is {expected:?}, got {found:?}")]
    UniformTypeMismatch {
        name: String,
        expected: UniformKind,
        found: UniformKind,
    },
    /// A pass failed earlier and stays halted until rebuilt
    #[error("pass `{name}` is halted: {reason}")]
    PassHalted { name: String, reason: String },
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Lift a backend creation failure into the engine taxonomy
    pub(crate) fn from_creation(kind: ResourceKind, err: BackendError) -> Self {
        match err {
            BackendError::InvalidHandle(kind, id) => RenderError::InvalidBinding { kind, id },
            BackendError::BufferCreationFailed(message)
            | BackendError::TextureCreationFailed(message)
            | BackendError::FramebufferCreationFailed(message)
            | BackendError::VertexLayoutCreationFailed(message) => {
                RenderError::ResourceCreation { kind, message }
            }
            other => RenderError::ResourceCreation {
                kind,
                message: other.to_string(),
            },
        }
    }

    /// Lift any other backend failure, keeping stale handles distinct
    pub(crate) fn from_backend(err: BackendError) -> Self {
        match err {
            BackendError::InvalidHandle(kind, id) => RenderError::InvalidBinding { kind, id },
            BackendError::InvalidOperation(message) => RenderError::InvalidOperation(message),
            other => RenderError::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderError::InvalidBinding {
            kind: ResourceKind::Buffer,
            id: 7,
        };
        assert_eq!(err.to_string(), "invalid binding: buffer 7 is not live");

        let err = RenderError::from_creation(
            ResourceKind::Texture,
            BackendError::TextureCreationFailed("zero-sized".into()),
        );
        assert_eq!(err.to_string(), "failed to create texture: zero-sized");
    }
}
