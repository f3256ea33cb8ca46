use anyhow::{anyhow, Context, Result};
use log::{info, warn};

use crate::{
    backends::BackendError,
    hasher,
    models::{
        BuildOptions, Composition, Container, ContainerId, ContainerSpec, Image, ImageId,
    },
    services::ContainerBackend,
};

pub const LABEL_PROJECT: &str = "io.terminbot.project";
pub const LABEL_HASH: &str = "io.terminbot.hash";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Create,
    Stop,
    RemoveContainer,
    RemoveImage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Skipped(String),
}

#[derive(Clone, Debug)]
pub struct Status {
    pub image: Option<Image>,
    pub container: Option<Container>,
    /// Whether the container was created from the current project description.
    pub up_to_date: Option<bool>,
}

pub struct Controller {
    backend: Box<dyn ContainerBackend>,
    composition: Composition,
    project_name: String,
}

impl Controller {
    pub fn init<B, P>(project_name: P, backend: B, composition: Composition) -> Controller
    where
        B: 'static + ContainerBackend,
        P: Into<String>,
    {
        Controller {
            backend: Box::new(backend),
            composition,
            project_name: project_name.into(),
        }
    }

    pub fn composition(&self) -> &Composition {
        &self.composition
    }

    pub fn build_image(&mut self, options: BuildOptions) -> Result<ImageId> {
        let spec = &self.composition.image;
        info!(
            "building {} from {:?} in {:?}",
            spec.name.0, spec.dockerfile, spec.context
        );

        let id = self
            .backend
            .build_image(spec, options)
            .with_context(|| format!("failed to build image {}", spec.name.0))?;

        Ok(id)
    }

    /// Starts the container. An existing container with the same name is an
    /// error; it is neither renamed nor replaced.
    pub fn run_container(&mut self) -> Result<ContainerId> {
        let name = self.composition.container.name.clone();

        if self.backend.inspect_container(&name)?.is_some() {
            return Err(already_exists(&name.0));
        }

        let spec = self.labeled_spec();
        match self.backend.run_container(&spec) {
            Ok(id) => {
                info!("started container {} ({})", name.0, id.0);
                Ok(id)
            }
            Err(BackendError::Conflict(_)) => Err(already_exists(&name.0)),
            Err(err) => Err(err).with_context(|| format!("failed to run container {}", name.0)),
        }
    }

    /// Returns `false` when there was no container to stop.
    pub fn stop_container(&mut self, timeout: u32) -> Result<bool> {
        let name = &self.composition.container.name;

        match self.backend.stop_container(name, timeout) {
            Ok(()) => Ok(true),
            Err(BackendError::NotFound(message)) => {
                info!("nothing to stop: {}", message);
                Ok(false)
            }
            Err(err) => Err(err).with_context(|| format!("failed to stop container {}", name.0)),
        }
    }

    /// Force-removes the container. Never fails: whatever the runtime
    /// reports is logged and the step is marked as skipped.
    pub fn remove_container(&mut self) -> Outcome {
        let name = &self.composition.container.name;

        match self.backend.remove_container(name, true) {
            Ok(()) => Outcome::Done,
            Err(err) => skipped(&format!("container {}", name.0), err),
        }
    }

    pub fn remove_image(&mut self) -> Outcome {
        let name = &self.composition.image.name;

        match self.backend.remove_image(name, true) {
            Ok(()) => Outcome::Done,
            Err(err) => skipped(&format!("image {}", name.0), err),
        }
    }

    pub fn apply(&mut self, operation: Operation, timeout: u32) -> Result<Outcome> {
        match operation {
            Operation::Create => self.run_container().map(|_| Outcome::Done),
            Operation::Stop => self.stop_container(timeout).map(|stopped| {
                if stopped {
                    Outcome::Done
                } else {
                    Outcome::Skipped("not found".into())
                }
            }),
            Operation::RemoveContainer => Ok(self.remove_container()),
            Operation::RemoveImage => Ok(self.remove_image()),
        }
    }

    pub fn status(&mut self) -> Result<Status> {
        let image = self.backend.get_image(&self.composition.image.name)?;
        let container = self
            .backend
            .inspect_container(&self.composition.container.name)?;

        let expected = spec_hash(&self.composition.container);
        let up_to_date = container.as_ref().map(|container| {
            container.labels.get(LABEL_HASH).map(String::as_str) == Some(expected.as_str())
        });

        Ok(Status {
            image,
            container,
            up_to_date,
        })
    }

    fn labeled_spec(&self) -> ContainerSpec {
        let mut spec = self.composition.container.clone();
        let hash = spec_hash(&spec);

        spec.labels
            .insert(LABEL_PROJECT.into(), self.project_name.clone());
        spec.labels.insert(LABEL_HASH.into(), hash);
        spec
    }
}

fn spec_hash(spec: &ContainerSpec) -> String {
    let mut spec = spec.clone();
    spec.labels.remove(LABEL_PROJECT);
    spec.labels.remove(LABEL_HASH);
    hasher::digest(&spec)
}

fn already_exists(name: &str) -> anyhow::Error {
    anyhow!(
        "a container named {:?} already exists, remove it first (e.g. with `terminbot-compose clean`)",
        name
    )
}

fn skipped(what: &str, err: BackendError) -> Outcome {
    if err.is_not_found() {
        info!("{} not present: {}", what, err);
        Outcome::Skipped("not present".into())
    } else {
        warn!("ignoring failure to remove {}: {}", what, err);
        Outcome::Skipped(err.to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::{
        ContainerName, ContainerStatus, ImageBuildSpec, ImageName, Mount, RestartPolicy,
    };
    use std::{
        cell::RefCell,
        collections::BTreeMap as Map,
        os::unix::process::ExitStatusExt,
        path::PathBuf,
        process::ExitStatus,
        rc::Rc,
    };

    #[derive(Default)]
    struct Runtime {
        images: Map<String, Image>,
        containers: Map<String, Container>,
        calls: Vec<String>,
        daemon_down: bool,
        hidden_from_inspect: bool,
    }

    #[derive(Clone, Default)]
    struct FakeBackend(Rc<RefCell<Runtime>>);

    impl FakeBackend {
        fn check(&self, call: String) -> Result<(), BackendError> {
            let mut runtime = self.0.borrow_mut();
            runtime.calls.push(call.clone());
            if runtime.daemon_down {
                Err(BackendError::Command {
                    command: call,
                    status: ExitStatus::from_raw(1 << 8),
                    stderr: "Cannot connect to the Docker daemon".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl ContainerBackend for FakeBackend {
        fn get_image(&mut self, name: &ImageName) -> Result<Option<Image>, BackendError> {
            self.check(format!("image inspect {}", name.0))?;
            Ok(self.0.borrow().images.get(&name.0).cloned())
        }

        fn build_image(
            &mut self,
            spec: &ImageBuildSpec,
            _options: BuildOptions,
        ) -> Result<ImageId, BackendError> {
            self.check(format!("build {}", spec.name.0))?;
            let id = ImageId(format!("sha256:{}", spec.name.0));
            self.0.borrow_mut().images.insert(
                spec.name.0.clone(),
                Image {
                    id: id.clone(),
                    labels: spec.labels.clone(),
                },
            );
            Ok(id)
        }

        fn inspect_container(
            &mut self,
            name: &ContainerName,
        ) -> Result<Option<Container>, BackendError> {
            self.check(format!("container inspect {}", name.0))?;
            let runtime = self.0.borrow();
            if runtime.hidden_from_inspect {
                return Ok(None);
            }
            Ok(runtime.containers.get(&name.0).cloned())
        }

        fn run_container(&mut self, spec: &ContainerSpec) -> Result<ContainerId, BackendError> {
            self.check(format!("run {}", spec.name.0))?;
            let mut runtime = self.0.borrow_mut();
            if runtime.containers.contains_key(&spec.name.0) {
                return Err(BackendError::Conflict(format!(
                    "The container name \"/{}\" is already in use",
                    spec.name.0
                )));
            }
            if !runtime.images.contains_key(&spec.image_name.0) {
                return Err(BackendError::NotFound(format!(
                    "Unable to find image '{}:latest' locally",
                    spec.image_name.0
                )));
            }

            let id = ContainerId(format!("id-{}", spec.name.0));
            runtime.containers.insert(
                spec.name.0.clone(),
                Container {
                    id: id.clone(),
                    name: spec.name.clone(),
                    status: ContainerStatus::Running,
                    restart_policy: spec.restart_policy,
                    mounts: spec.mounts.clone(),
                    labels: spec.labels.clone(),
                },
            );
            Ok(id)
        }

        fn stop_container(
            &mut self,
            name: &ContainerName,
            _timeout: u32,
        ) -> Result<(), BackendError> {
            self.check(format!("stop {}", name.0))?;
            match self.0.borrow_mut().containers.get_mut(&name.0) {
                Some(container) => {
                    container.status = ContainerStatus::Exited;
                    Ok(())
                }
                None => Err(BackendError::NotFound(format!(
                    "No such container: {}",
                    name.0
                ))),
            }
        }

        fn remove_container(
            &mut self,
            name: &ContainerName,
            _force: bool,
        ) -> Result<(), BackendError> {
            self.check(format!("rm {}", name.0))?;
            match self.0.borrow_mut().containers.remove(&name.0) {
                Some(_) => Ok(()),
                None => Err(BackendError::NotFound(format!(
                    "No such container: {}",
                    name.0
                ))),
            }
        }

        fn remove_image(&mut self, name: &ImageName, _force: bool) -> Result<(), BackendError> {
            self.check(format!("rmi {}", name.0))?;
            match self.0.borrow_mut().images.remove(&name.0) {
                Some(_) => Ok(()),
                None => Err(BackendError::NotFound(format!("No such image: {}", name.0))),
            }
        }
    }

    fn composition() -> Composition {
        Composition {
            image: ImageBuildSpec {
                name: ImageName("terminbot".into()),
                context: PathBuf::from("/srv/bot"),
                dockerfile: PathBuf::from("Dockerfile"),
                target: None,
                build_args: Map::new(),
                labels: Map::new(),
            },
            container: ContainerSpec {
                name: ContainerName("terminbot".into()),
                image_name: ImageName("terminbot".into()),
                restart_policy: RestartPolicy::UnlessStopped,
                mounts: vec![
                    Mount {
                        source: PathBuf::from("/srv/bot/menu.yaml"),
                        target: PathBuf::from("/app/menu.yaml"),
                        read_only: false,
                    },
                    Mount {
                        source: PathBuf::from("/srv/bot/bot_main.py"),
                        target: PathBuf::from("/app/bot_main.py"),
                        read_only: false,
                    },
                ],
                ports: vec![],
                env_file: None,
                environment: Map::new(),
                labels: Map::new(),
            },
        }
    }

    fn clean(controller: &mut Controller) -> (Outcome, Outcome) {
        let container = controller.apply(Operation::RemoveContainer, 0).unwrap();
        let image = controller.apply(Operation::RemoveImage, 0).unwrap();
        (container, image)
    }

    fn controller() -> (Controller, FakeBackend) {
        let backend = FakeBackend::default();
        let controller = Controller::init("bot", backend.clone(), composition());
        (controller, backend)
    }

    #[test]
    fn build_tags_the_image() {
        let (mut controller, backend) = controller();

        let id = controller.build_image(BuildOptions::default()).unwrap();

        assert_eq!(id, ImageId("sha256:terminbot".into()));
        assert!(backend.0.borrow().images.contains_key("terminbot"));
    }

    #[test]
    fn run_starts_one_labeled_container() {
        let (mut controller, backend) = controller();
        controller.build_image(BuildOptions::default()).unwrap();

        controller.run_container().unwrap();

        let runtime = backend.0.borrow();
        assert_eq!(runtime.containers.len(), 1);
        let container = &runtime.containers["terminbot"];
        assert_eq!(container.status, ContainerStatus::Running);
        assert_eq!(container.restart_policy, RestartPolicy::UnlessStopped);
        let targets = container
            .mounts
            .iter()
            .map(|mount| mount.target.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(targets, vec!["/app/menu.yaml", "/app/bot_main.py"]);
        assert_eq!(
            container.labels.get(LABEL_PROJECT).map(String::as_str),
            Some("bot")
        );
    }

    #[test]
    fn second_run_fails_without_replacing() {
        let (mut controller, backend) = controller();
        controller.build_image(BuildOptions::default()).unwrap();
        controller.run_container().unwrap();

        let err = controller.run_container().unwrap_err();

        assert!(err.to_string().contains("already exists"));
        let runtime = backend.0.borrow();
        assert_eq!(runtime.containers.len(), 1);
        assert_eq!(
            runtime.calls.iter().filter(|call| call.starts_with("run ")).count(),
            1
        );
    }

    #[test]
    fn runtime_conflict_is_reported_as_existing_container() {
        let (mut controller, backend) = controller();
        controller.build_image(BuildOptions::default()).unwrap();
        controller.run_container().unwrap();
        backend.0.borrow_mut().hidden_from_inspect = true;

        let err = controller.run_container().unwrap_err();

        assert!(err.to_string().contains("already exists"));
        assert_eq!(backend.0.borrow().containers.len(), 1);
    }

    #[test]
    fn clean_is_idempotent() {
        let (mut controller, backend) = controller();

        let (container, image) = clean(&mut controller);

        assert_eq!(container, Outcome::Skipped("not present".into()));
        assert_eq!(image, Outcome::Skipped("not present".into()));
        assert_eq!(backend.0.borrow().calls, vec!["rm terminbot", "rmi terminbot"]);
    }

    #[test]
    fn clean_after_run_removes_everything() {
        let (mut controller, backend) = controller();
        controller.build_image(BuildOptions::default()).unwrap();
        controller.run_container().unwrap();

        assert_eq!(clean(&mut controller), (Outcome::Done, Outcome::Done));

        let runtime = backend.0.borrow();
        assert!(runtime.containers.is_empty());
        assert!(runtime.images.is_empty());
    }

    #[test]
    fn clean_survives_a_broken_runtime() {
        let (mut controller, backend) = controller();
        backend.0.borrow_mut().daemon_down = true;

        let (container, image) = clean(&mut controller);

        assert!(matches!(container, Outcome::Skipped(ref reason) if reason.contains("daemon")));
        assert!(matches!(image, Outcome::Skipped(_)));
    }

    #[test]
    fn stop_without_container_is_skipped() {
        let (mut controller, _backend) = controller();

        let outcome = controller.apply(Operation::Stop, 5).unwrap();

        assert_eq!(outcome, Outcome::Skipped("not found".into()));
    }

    #[test]
    fn stop_reports_an_unreachable_runtime() {
        let (mut controller, backend) = controller();
        backend.0.borrow_mut().daemon_down = true;

        let err = controller.apply(Operation::Stop, 5).unwrap_err();

        assert!(err.to_string().contains("failed to stop container terminbot"));
    }

    #[test]
    fn status_reports_an_unreachable_runtime() {
        let (mut controller, backend) = controller();
        backend.0.borrow_mut().daemon_down = true;

        let err = controller.status().unwrap_err();

        assert!(err.to_string().contains("Cannot connect to the Docker daemon"));
    }

    #[test]
    fn status_tracks_the_spec_hash() {
        let (mut controller, backend) = controller();
        assert!(controller.status().unwrap().up_to_date.is_none());

        controller.build_image(BuildOptions::default()).unwrap();
        controller.run_container().unwrap();
        let status = controller.status().unwrap();
        assert!(status.image.is_some());
        assert_eq!(status.up_to_date, Some(true));

        backend
            .0
            .borrow_mut()
            .containers
            .get_mut("terminbot")
            .unwrap()
            .labels
            .insert(LABEL_HASH.into(), "stale".into());
        assert_eq!(controller.status().unwrap().up_to_date, Some(false));
    }

    #[test]
    fn run_without_image_propagates_the_failure() {
        let (mut controller, _backend) = controller();

        let err = controller.run_container().unwrap_err();

        assert!(err.to_string().contains("failed to run container terminbot"));
    }
}
