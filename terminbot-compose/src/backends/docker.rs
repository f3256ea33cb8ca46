use log::{debug, info};
use serde::Deserialize;
use std::{
    collections::BTreeMap as Map,
    env,
    ffi::OsString,
    path::PathBuf,
    process::{Command, Output, Stdio},
};

use super::BackendError;
use crate::{
    context::ContextArchive,
    models::{
        BuildOptions, Container, ContainerId, ContainerName, ContainerSpec, ContainerStatus,
        Image, ImageBuildSpec, ImageId, ImageName, Mount, RestartPolicy,
    },
    services::ContainerBackend,
};

/// Drives the `docker` command line tool, or anything that speaks its
/// dialect (`podman`), one blocking invocation per operation.
pub struct DockerBackend {
    runtime: PathBuf,
}

impl DockerBackend {
    pub fn new<P: Into<PathBuf>>(runtime: P) -> DockerBackend {
        DockerBackend {
            runtime: runtime.into(),
        }
    }

    /// Uses `$DOCKER` when set, `docker` from the `PATH` otherwise.
    pub fn from_env() -> DockerBackend {
        let runtime = env::var_os("DOCKER")
            .filter(|runtime| !runtime.is_empty())
            .unwrap_or_else(|| OsString::from("docker"));

        DockerBackend::new(runtime)
    }

    fn command(&self, args: &[OsString]) -> Command {
        let mut command = Command::new(&self.runtime);
        command.args(args);
        command
    }

    fn describe(&self, args: &[OsString]) -> String {
        let mut line = self.runtime.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    fn output(&self, args: Vec<OsString>) -> Result<Output, BackendError> {
        debug!("running {}", self.describe(&args));

        let output = self
            .command(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| BackendError::Spawn {
                runtime: self.runtime.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(BackendError::from_failure(
                self.describe(&args),
                output.status,
                &String::from_utf8_lossy(&output.stderr),
            ))
        }
    }

    fn inspect<T>(&self, kind: &str, name: &str) -> Result<Option<T>, BackendError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let args: Vec<OsString> = vec![kind.into(), "inspect".into(), name.into()];
        let command = self.describe(&args);

        let output = match self.output(args) {
            Ok(output) => output,
            Err(BackendError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut objects: Vec<T> =
            serde_json::from_slice(&output.stdout).map_err(|err| BackendError::Output {
                command,
                message: err.to_string(),
            })?;

        Ok(if objects.is_empty() {
            None
        } else {
            Some(objects.swap_remove(0))
        })
    }
}

impl ContainerBackend for DockerBackend {
    fn get_image(&mut self, name: &ImageName) -> Result<Option<Image>, BackendError> {
        let image: Option<ImageInspect> = self.inspect("image", &name.0)?;

        Ok(image.map(|image| Image {
            id: ImageId(image.id),
            labels: image
                .config
                .and_then(|config| config.labels)
                .unwrap_or_else(Default::default),
        }))
    }

    fn build_image(
        &mut self,
        spec: &ImageBuildSpec,
        options: BuildOptions,
    ) -> Result<ImageId, BackendError> {
        let archive = ContextArchive::create(&spec.context).map_err(|err| BackendError::Output {
            command: format!("archive {}", spec.context.display()),
            message: err.to_string(),
        })?;

        println!("Archived build context ({})", archive.describe_size());

        let args = build_args(spec, options);
        let command = self.describe(&args);
        debug!("running {} < {:?}", command, archive.path());

        let stdin = archive.open().map_err(|err| BackendError::Output {
            command: command.clone(),
            message: err.to_string(),
        })?;

        // Build output goes straight to the terminal.
        let status = self
            .command(&args)
            .stdin(Stdio::from(stdin))
            .status()
            .map_err(|source| BackendError::Spawn {
                runtime: self.runtime.clone(),
                source,
            })?;

        if !status.success() {
            return Err(BackendError::Command {
                command,
                status,
                stderr: String::new(),
            });
        }

        if let Err(err) = archive.close() {
            debug!("could not remove build context archive: {}", err);
        }

        let image = self
            .get_image(&spec.name)?
            .ok_or_else(|| BackendError::NotFound(format!("built image {} vanished", spec.name.0)))?;
        info!("built image {} ({})", spec.name.0, image.id.0);

        Ok(image.id)
    }

    fn inspect_container(
        &mut self,
        name: &ContainerName,
    ) -> Result<Option<Container>, BackendError> {
        let container: Option<ContainerInspect> = self.inspect("container", &name.0)?;
        Ok(container.map(ContainerInspect::into_container))
    }

    fn run_container(&mut self, spec: &ContainerSpec) -> Result<ContainerId, BackendError> {
        let output = self.output(run_args(spec))?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_owned();

        Ok(ContainerId(id))
    }

    fn stop_container(&mut self, name: &ContainerName, timeout: u32) -> Result<(), BackendError> {
        self.output(vec![
            "stop".into(),
            "--time".into(),
            timeout.to_string().into(),
            name.0.clone().into(),
        ])?;

        Ok(())
    }

    fn remove_container(&mut self, name: &ContainerName, force: bool) -> Result<(), BackendError> {
        let mut args: Vec<OsString> = vec!["rm".into()];
        if force {
            args.push("--force".into());
        }
        args.push(name.0.clone().into());

        self.output(args)?;
        Ok(())
    }

    fn remove_image(&mut self, name: &ImageName, force: bool) -> Result<(), BackendError> {
        let mut args: Vec<OsString> = vec!["rmi".into()];
        if force {
            args.push("--force".into());
        }
        args.push(name.0.clone().into());

        self.output(args)?;
        Ok(())
    }
}

/// `build` arguments reading the context as a tar stream from stdin.
pub(crate) fn build_args(spec: &ImageBuildSpec, options: BuildOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "build".into(),
        "--tag".into(),
        spec.name.0.clone().into(),
        "--file".into(),
        spec.dockerfile.clone().into_os_string(),
    ];

    if let Some(target) = &spec.target {
        args.push("--target".into());
        args.push(target.into());
    }

    for (key, value) in spec.build_args.iter() {
        args.push("--build-arg".into());
        args.push(format!("{}={}", key, value).into());
    }

    for (key, value) in spec.labels.iter() {
        args.push("--label".into());
        args.push(format!("{}={}", key, value).into());
    }

    if options.no_cache {
        args.push("--no-cache".into());
    }

    if options.pull {
        args.push("--pull".into());
    }

    args.push("-".into());
    args
}

pub(crate) fn run_args(spec: &ContainerSpec) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "run".into(),
        "--detach".into(),
        "--name".into(),
        spec.name.0.clone().into(),
        "--restart".into(),
        spec.restart_policy.as_str().into(),
    ];

    for mount in spec.mounts.iter() {
        args.push("--volume".into());
        args.push(mount.to_volume_arg().into());
    }

    for port in spec.ports.iter() {
        args.push("--publish".into());
        args.push(port.into());
    }

    if let Some(env_file) = &spec.env_file {
        args.push("--env-file".into());
        args.push(env_file.clone().into_os_string());
    }

    for (key, value) in spec.environment.iter() {
        args.push("--env".into());
        args.push(format!("{}={}", key, value).into());
    }

    for (key, value) in spec.labels.iter() {
        args.push("--label".into());
        args.push(format!("{}={}", key, value).into());
    }

    args.push(spec.image_name.0.clone().into());
    args
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageInspect {
    id: String,
    config: Option<LabelsConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LabelsConfig {
    labels: Option<Map<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    name: String,
    state: ContainerState,
    host_config: Option<HostConfig>,
    #[serde(default)]
    mounts: Vec<MountInspect>,
    config: Option<LabelsConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    restart_policy: Option<RestartPolicyInspect>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RestartPolicyInspect {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountInspect {
    source: String,
    destination: String,
    #[serde(rename = "RW", default = "default_rw")]
    rw: bool,
}

fn default_rw() -> bool {
    true
}

impl ContainerInspect {
    fn into_container(self) -> Container {
        let restart_policy = self
            .host_config
            .and_then(|config| config.restart_policy)
            .and_then(|policy| match policy.name.parse() {
                Ok(policy) => Some(policy),
                Err(err) => {
                    debug!("{}", err);
                    None
                }
            })
            .unwrap_or(RestartPolicy::No);

        let mounts = self
            .mounts
            .into_iter()
            .map(|mount| Mount {
                source: PathBuf::from(mount.source),
                target: PathBuf::from(mount.destination),
                read_only: !mount.rw,
            })
            .collect();

        Container {
            id: ContainerId(self.id),
            name: ContainerName(self.name.trim_start_matches('/').to_owned()),
            status: ContainerStatus::parse(&self.state.status),
            restart_policy,
            mounts,
            labels: self
                .config
                .and_then(|config| config.labels)
                .unwrap_or_else(Default::default),
        }
    }
}
