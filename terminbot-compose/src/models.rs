use std::{collections::BTreeMap as Map, fmt, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Error};

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ImageId(pub String);

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ImageName(pub String);

#[derive(Clone, Debug, Hash)]
pub struct Image {
    pub id: ImageId,
    pub labels: Map<String, String>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ImageBuildSpec {
    pub name: ImageName,
    pub context: PathBuf,
    /// Relative to `context`.
    pub dockerfile: PathBuf,
    pub target: Option<String>,
    pub build_args: Map<String, String>,
    pub labels: Map<String, String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub no_cache: bool,
    pub pull: bool,
}

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ContainerId(pub String);

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ContainerName(pub String);

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::UnlessStopped => "unless-stopped",
            RestartPolicy::OnFailure => "on-failure",
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::UnlessStopped
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestartPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "no" => Ok(RestartPolicy::No),
            "always" => Ok(RestartPolicy::Always),
            "unless-stopped" => Ok(RestartPolicy::UnlessStopped),
            "on-failure" => Ok(RestartPolicy::OnFailure),
            other => Err(anyhow!("unknown restart policy: {:?}", other)),
        }
    }
}

/// A bind mount from the host into the container.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub read_only: bool,
}

impl Mount {
    pub fn to_volume_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.source.display(), self.target.display());
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Container {
    pub id: ContainerId,
    pub name: ContainerName,
    pub status: ContainerStatus,
    pub restart_policy: RestartPolicy,
    pub mounts: Vec<Mount>,
    pub labels: Map<String, String>,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Unknown,
}

impl ContainerStatus {
    pub fn parse(status: &str) -> ContainerStatus {
        match status {
            "created" | "configured" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "restarting" => ContainerStatus::Restarting,
            "paused" => ContainerStatus::Paused,
            "exited" | "stopped" | "dead" => ContainerStatus::Exited,
            _ => ContainerStatus::Unknown,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: ContainerName,
    pub image_name: ImageName,
    pub restart_policy: RestartPolicy,
    pub mounts: Vec<Mount>,
    pub ports: Vec<String>,
    pub env_file: Option<PathBuf>,
    pub environment: Map<String, String>,
    pub labels: Map<String, String>,
}

#[derive(Clone, Debug)]
pub struct Composition {
    pub image: ImageBuildSpec,
    pub container: ContainerSpec,
}
