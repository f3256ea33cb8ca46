use anyhow::Result;
use std::path::Path;

use crate::{
    backends::BackendError,
    models::{
        BuildOptions, Composition, Container, ContainerId, ContainerName, ContainerSpec, Image,
        ImageBuildSpec, ImageId, ImageName,
    },
};

pub trait ComposerFrontend {
    fn composition(&mut self, project_name: &str, project_file_path: Option<&Path>)
        -> Result<Composition>;
}

/// The operations the controller needs from a container runtime.
///
/// Methods returning `BackendError` let callers tell a missing object or a
/// name collision apart from every other runtime failure.
pub trait ContainerBackend {
    fn get_image(&mut self, name: &ImageName) -> Result<Option<Image>, BackendError>;

    fn build_image(
        &mut self,
        spec: &ImageBuildSpec,
        options: BuildOptions,
    ) -> Result<ImageId, BackendError>;

    fn inspect_container(&mut self, name: &ContainerName)
        -> Result<Option<Container>, BackendError>;

    fn run_container(&mut self, spec: &ContainerSpec) -> Result<ContainerId, BackendError>;

    fn stop_container(&mut self, name: &ContainerName, timeout: u32) -> Result<(), BackendError>;

    fn remove_container(&mut self, name: &ContainerName, force: bool) -> Result<(), BackendError>;

    fn remove_image(&mut self, name: &ImageName, force: bool) -> Result<(), BackendError>;
}
