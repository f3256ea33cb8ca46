use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::Deserialize;
use std::{
    collections::BTreeMap as Map,
    env,
    fs,
    path::{Component, Path, PathBuf},
};

use crate::{
    models::{
        Composition, ContainerName, ContainerSpec, ImageBuildSpec, ImageName, Mount, RestartPolicy,
    },
    services::ComposerFrontend,
};

pub const DEFAULT_IMAGE_NAME: &str = "terminbot";
pub const DEFAULT_CONTAINER_NAME: &str = "terminbot";
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";
pub const DEFAULT_VOLUMES: &[&str] = &[
    "./menu.yaml:/app/menu.yaml",
    "./bot_main.py:/app/bot_main.py",
];

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectFile {
    image: Option<String>,

    container_name: Option<String>,

    build: Option<Build>,

    restart: Option<String>,

    volumes: Option<Vec<String>>,

    #[serde(default)]
    ports: Vec<String>,

    env_file: Option<String>,

    #[serde(default)]
    environment: MapList,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Build {
    Short(String),
    Extended {
        #[serde(default = "default_context")]
        context: String,

        dockerfile: Option<String>,

        #[serde(default)]
        args: MapList,

        #[serde(default)]
        labels: MapList,

        target: Option<String>,
    },
}

fn default_context() -> String {
    ".".into()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum MapList {
    Map(Map<String, String>),
    List(Vec<String>),
}

impl Default for MapList {
    fn default() -> Self {
        MapList::List(Vec::new())
    }
}

impl MapList {
    fn into_map(self) -> Map<String, String> {
        match self {
            MapList::Map(map) => map,
            MapList::List(list) => list.into_iter().map(MapList::split_value).collect(),
        }
    }

    fn split_value(value: String) -> (String, String) {
        match value.find('=') {
            Some(split_index) => {
                let (key, value) = value.split_at(split_index);
                (key.into(), value[1..].into())
            }
            None => (value, String::new()),
        }
    }
}

/// Values that beat the project file, the way `make IMAGE_NAME=...` beats
/// the Makefile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    pub image_name: Option<String>,
    pub container_name: Option<String>,
    pub dockerfile: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Overrides {
        let var = |name: &str| env::var(name).ok().filter(|value| !value.is_empty());

        Overrides {
            image_name: var("IMAGE_NAME"),
            container_name: var("CONTAINER_NAME"),
            dockerfile: var("DOCKERFILE"),
        }
    }
}

pub struct ProjectFileFrontend {
    work_directory: PathBuf,
    overrides: Overrides,
}

impl ProjectFileFrontend {
    pub fn new<P: Into<PathBuf>>(work_directory: P, overrides: Overrides) -> ProjectFileFrontend {
        ProjectFileFrontend {
            work_directory: work_directory.into(),
            overrides,
        }
    }

    fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            return path.to_owned();
        }

        path.components()
            .filter(|component| *component != Component::CurDir)
            .fold(self.work_directory.clone(), |resolved, component| {
                resolved.join(component)
            })
    }

    fn parse_volume(&self, volume: &str) -> Result<Mount> {
        let parts = volume.split(':').collect::<Vec<_>>();

        let (source, target, read_only) = match parts.as_slice() {
            [source, target] => (source, target, false),
            [source, target, "ro"] => (source, target, true),
            [source, target, "rw"] => (source, target, false),
            _ => return Err(anyhow!("invalid volume {:?}, expected SOURCE:TARGET[:ro|rw]", volume)),
        };

        if source.is_empty() || target.is_empty() {
            return Err(anyhow!("invalid volume {:?}, expected SOURCE:TARGET[:ro|rw]", volume));
        }

        Ok(Mount {
            source: self.resolve(source),
            target: PathBuf::from(target),
            read_only,
        })
    }

    fn build(&self, project_name: &str, file: ProjectFile) -> Result<Composition> {
        let image_name = self
            .overrides
            .image_name
            .clone()
            .or(file.image)
            .unwrap_or_else(|| DEFAULT_IMAGE_NAME.into());
        let image_name = ImageName(image_name);

        let container_name = self
            .overrides
            .container_name
            .clone()
            .or(file.container_name)
            .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.into());

        let (context, dockerfile, build_args, labels, target) = match file.build {
            None => (default_context(), None, Map::new(), Map::new(), None),
            Some(Build::Short(context)) => (context, None, Map::new(), Map::new(), None),
            Some(Build::Extended {
                context,
                dockerfile,
                args,
                labels,
                target,
            }) => (context, dockerfile, args.into_map(), labels.into_map(), target),
        };

        let dockerfile = self
            .overrides
            .dockerfile
            .clone()
            .or(dockerfile)
            .unwrap_or_else(|| DEFAULT_DOCKERFILE.into());

        let image = ImageBuildSpec {
            name: image_name.clone(),
            context: self.resolve(context),
            dockerfile: PathBuf::from(dockerfile),
            target,
            build_args,
            labels,
        };

        let restart_policy = match file.restart {
            Some(restart) => restart
                .parse::<RestartPolicy>()
                .with_context(|| format!("in project {:?}", project_name))?,
            None => RestartPolicy::UnlessStopped,
        };

        let mounts = match file.volumes {
            Some(volumes) => volumes
                .iter()
                .map(|volume| self.parse_volume(volume))
                .collect::<Result<Vec<_>>>()?,
            None => DEFAULT_VOLUMES
                .iter()
                .map(|volume| self.parse_volume(volume))
                .collect::<Result<Vec<_>>>()?,
        };

        let container = ContainerSpec {
            name: ContainerName(container_name),
            image_name,
            restart_policy,
            mounts,
            ports: file.ports,
            env_file: file.env_file.map(|env_file| self.resolve(env_file)),
            environment: file.environment.into_map(),
            labels: Map::new(),
        };

        Ok(Composition { image, container })
    }
}

impl ComposerFrontend for ProjectFileFrontend {
    fn composition(
        &mut self,
        project_name: &str,
        project_file_path: Option<&Path>,
    ) -> Result<Composition> {
        let file = match project_file_path {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("could not read {:?}", path))?;
                if contents.trim().is_empty() {
                    ProjectFile::default()
                } else {
                    serde_yaml::from_str(&contents)
                        .with_context(|| format!("could not parse {:?}", path))?
                }
            }
            None => {
                debug!("no project file, using defaults");
                ProjectFile::default()
            }
        };

        self.build(project_name, file)
    }
}
