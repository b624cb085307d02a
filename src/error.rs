//! Render graph error types.

use thiserror::Error;

use crate::backend::DeviceError;
use crate::render_graph::{ResourceRef, ResourceState};

/// Errors raised while building, compiling or executing a render graph.
///
/// Everything except [`GraphError::Device`] and [`GraphError::Submission`]
/// is a bug in the code describing the graph, not a runtime condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("pass '{pass}' references unregistered resource {resource}")]
    DanglingReference { pass: String, resource: ResourceRef },

    #[error("external resource '{path}' is already mapped to {existing}, cannot map it to {requested}")]
    ExternalMappingMismatch {
        path: String,
        existing: String,
        requested: String,
    },

    #[error("pass '{pass}': binding '{binding}' cannot use {resource}: {reason}")]
    InvalidBinding {
        pass: String,
        binding: String,
        resource: ResourceRef,
        reason: String,
    },

    #[error("raster pass '{pass}' declares no render-target attachments")]
    MissingAttachments { pass: String },

    #[error("pass '{pass}' requires {resource} in both {first:?} and {second:?}")]
    ConflictingUsage {
        pass: String,
        resource: ResourceRef,
        first: ResourceState,
        second: ResourceState,
    },

    #[error("{context}: {source}")]
    Device {
        context: String,
        #[source]
        source: DeviceError,
    },

    #[error("transients {first} and {second} are alive together but share memory")]
    LayoutViolation {
        first: ResourceRef,
        second: ResourceRef,
    },

    #[error("transient {resource} placed at offset {offset}, not a multiple of {alignment}")]
    MisalignedOffset {
        resource: ResourceRef,
        offset: u64,
        alignment: u64,
    },

    #[error("transient {resource} ({size} bytes, aligned to {alignment}) does not fit in a 64-bit memory block")]
    LayoutOverflow {
        resource: ResourceRef,
        size: u64,
        alignment: u64,
    },

    #[error("submission failed: {0}")]
    Submission(#[source] DeviceError),
}

pub type GraphResult<T> = Result<T, GraphError>;

impl GraphError {
    pub(crate) fn device(context: impl Into<String>, source: DeviceError) -> Self {
        Self::Device {
            context: context.into(),
            source,
        }
    }
}
