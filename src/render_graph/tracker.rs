//! Dependency tracking between passes and resources.

use std::collections::HashMap;

use crate::backend::TransitionTarget;
use crate::error::{GraphError, GraphResult};

use super::resource::ResourceRef;
use super::state::{Access, ResourceState};

/// One pass's use of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub pass_index: usize,
    pub pass_name: String,
    pub access: Access,
}

/// What an external path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalMapping {
    pub target: TransitionTarget,
    pub input_state: ResourceState,
    pub output_state: ResourceState,
}

/// Map from resource reference to the passes that use it.
///
/// Also owns the external path table, which catches two subsystems
/// importing the same logical resource with incompatible mappings.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    declarations: HashMap<ResourceRef, Vec<Declaration>>,
    externals: HashMap<String, (ResourceRef, ExternalMapping)>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that pass `pass_name` (at `pass_index`) uses `resource`.
    ///
    /// A second declaration by the same pass merges the access.
    pub fn declare(
        &mut self,
        pass_index: usize,
        pass_name: &str,
        resource: ResourceRef,
        access: Access,
    ) {
        let entries = self.declarations.entry(resource).or_default();
        if let Some(last) = entries.last_mut() {
            if last.pass_index == pass_index {
                last.access = merge(last.access, access);
                return;
            }
        }
        entries.push(Declaration {
            pass_index,
            pass_name: pass_name.to_string(),
            access,
        });
    }

    pub fn contains(&self, resource: ResourceRef) -> bool {
        self.declarations.contains_key(&resource)
    }

    /// Name of the first pass that declared `resource`.
    pub fn lookup_name(&self, resource: ResourceRef) -> Option<&str> {
        self.declarations
            .get(&resource)
            .and_then(|entries| entries.first())
            .map(|declaration| declaration.pass_name.as_str())
    }

    /// Every declaration of `resource`, in pass order.
    pub fn declarations(&self, resource: ResourceRef) -> &[Declaration] {
        self.declarations
            .get(&resource)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Most recent pass that wrote `resource`.
    pub fn last_writer(&self, resource: ResourceRef) -> Option<&Declaration> {
        self.declarations(resource)
            .iter()
            .rev()
            .find(|declaration| declaration.access.is_write())
    }

    /// `[first, last]` pass indices that use `resource`.
    pub fn interval(&self, resource: ResourceRef) -> Option<(usize, usize)> {
        let entries = self.declarations(resource);
        Some((entries.first()?.pass_index, entries.last()?.pass_index))
    }

    /// Resolve an external `path`.
    ///
    /// The first mapping of a path mints a reference through `mint`. Mapping
    /// it again with an identical target and states returns the same
    /// reference; anything else is an [`GraphError::ExternalMappingMismatch`].
    pub fn map_external(
        &mut self,
        path: &str,
        mapping: ExternalMapping,
        mint: impl FnOnce() -> ResourceRef,
    ) -> GraphResult<ResourceRef> {
        if let Some((existing_ref, existing)) = self.externals.get(path) {
            if *existing == mapping {
                return Ok(*existing_ref);
            }
            let err = GraphError::ExternalMappingMismatch {
                path: path.to_string(),
                existing: format!("{existing:?}"),
                requested: format!("{mapping:?}"),
            };
            log::error!("{err}");
            return Err(err);
        }
        let resource = mint();
        self.externals.insert(path.to_string(), (resource, mapping));
        Ok(resource)
    }

    /// Reference an external path was mapped to.
    pub fn external(&self, path: &str) -> Option<ResourceRef> {
        self.externals.get(path).map(|(resource, _)| *resource)
    }
}

fn merge(a: Access, b: Access) -> Access {
    match (a.is_read() || b.is_read(), a.is_write() || b.is_write()) {
        (true, true) => Access::ReadWrite,
        (false, _) => Access::Write,
        (true, false) => Access::Read,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ImageHandle;
    use crate::render_graph::resource::ImageRef;

    fn mapping(raw: u64) -> ExternalMapping {
        ExternalMapping {
            target: TransitionTarget::Image(ImageHandle::from_raw(raw)),
            input_state: ResourceState::Undefined,
            output_state: ResourceState::Present,
        }
    }

    #[test]
    fn test_declare_and_lookup() {
        let mut tracker = DependencyTracker::new();
        let image = ImageRef::from_index(0).raw();
        assert!(!tracker.contains(image));

        tracker.declare(0, "gbuffer", image, Access::Write);
        tracker.declare(1, "lighting", image, Access::Read);

        assert!(tracker.contains(image));
        assert_eq!(tracker.lookup_name(image), Some("gbuffer"));
        assert_eq!(tracker.declarations(image).len(), 2);
        assert_eq!(tracker.interval(image), Some((0, 1)));
        assert_eq!(tracker.last_writer(image).unwrap().pass_name, "gbuffer");
    }

    #[test]
    fn test_same_pass_merges_access() {
        let mut tracker = DependencyTracker::new();
        let image = ImageRef::from_index(0).raw();
        tracker.declare(2, "blur", image, Access::Read);
        tracker.declare(2, "blur", image, Access::Write);
        let declarations = tracker.declarations(image);
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0].access, Access::ReadWrite);
    }

    #[test]
    fn test_unknown_resource() {
        let tracker = DependencyTracker::new();
        let image = ImageRef::from_index(5).raw();
        assert_eq!(tracker.lookup_name(image), None);
        assert!(tracker.declarations(image).is_empty());
        assert_eq!(tracker.interval(image), None);
    }

    #[test]
    fn test_same_external_mapping_is_shared() {
        let mut tracker = DependencyTracker::new();
        let first = tracker
            .map_external("swapchain", mapping(1), || ImageRef::from_index(0).raw())
            .unwrap();
        let second = tracker
            .map_external("swapchain", mapping(1), || ImageRef::from_index(1).raw())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(tracker.external("swapchain"), Some(first));
    }

    #[test]
    fn test_mismatched_external_mapping_is_rejected() {
        let mut tracker = DependencyTracker::new();
        tracker
            .map_external("swapchain", mapping(1), || ImageRef::from_index(0).raw())
            .unwrap();
        let err = tracker
            .map_external("swapchain", mapping(2), || ImageRef::from_index(1).raw())
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::ExternalMappingMismatch { ref path, .. } if path == "swapchain"
        ));
    }
}
