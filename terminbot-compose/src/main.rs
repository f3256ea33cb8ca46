use anyhow::{anyhow, Result};
use crossterm::{
    cursor,
    style::{self, Colorize, Styler},
    QueueableCommand,
};
use log::info;
use std::{
    env,
    io::{stdout, Write},
    path::{Path, PathBuf},
};
use structopt::StructOpt;

use backends::DockerBackend;
use controller::{Controller, Operation, Outcome, Status};
use frontends::{Overrides, ProjectFileFrontend};
use models::BuildOptions;
use services::ComposerFrontend;

mod backends;
mod context;
mod controller;
mod frontends;
mod hasher;
mod models;
mod services;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "terminbot-compose",
    about = "Builds, runs and cleans up the terminbot container."
)]
enum Opt {
    /// Builds the image from the Dockerfile.
    Build {
        #[structopt(long)]
        /// Do not use the cache when building the image.
        no_cache: bool,

        #[structopt(long)]
        /// Always attempt to pull a newer version of the base image.
        pull: bool,
    },
    /// Starts a detached container that restarts unless stopped. Fails if a
    /// container with the same name exists.
    Run,
    /// Stops the running container.
    Stop {
        #[structopt(long, default_value = "5")]
        timeout: u32,
    },
    /// Removes the container and the image, ignoring whatever is missing.
    Clean,
    /// Shows the state of the image and the container.
    Status,
}

fn find_project_file<P: AsRef<Path>>(path: P) -> Option<PathBuf> {
    for path in path.as_ref().ancestors() {
        let project_file_path = path.join("terminbot.yml");
        if project_file_path.exists() {
            return Some(project_file_path);
        }

        let project_file_path = path.join("terminbot.yaml");
        if project_file_path.exists() {
            return Some(project_file_path);
        }
    }

    None
}

fn main() -> Result<()> {
    pretty_env_logger::init_custom_env("LOG");

    let opt = Opt::from_args();

    let mut stdout = stdout();

    let current_dir = env::current_dir()?;
    let project_file_path = find_project_file(&current_dir);

    let work_directory = match &project_file_path {
        Some(project_file_path) => {
            info!("found project file {:?}", project_file_path);
            project_file_path
                .parent()
                .ok_or_else(|| anyhow!("Project file has no parent."))?
                .to_owned()
        }
        None => current_dir,
    };
    info!("work directory {:?}", work_directory);

    env::set_current_dir(&work_directory)?;

    let project_name = work_directory
        .file_name()
        .and_then(|path| path.to_str())
        .unwrap_or("terminbot")
        .to_owned();
    info!("project name {:?}", project_name);

    let mut frontend = ProjectFileFrontend::new(&work_directory, Overrides::from_env());
    let composition = frontend.composition(&project_name, project_file_path.as_deref())?;
    info!("parsed project description");

    let backend = DockerBackend::from_env();
    let mut controller = Controller::init(project_name, backend, composition);

    match opt {
        Opt::Build { no_cache, pull } => {
            controller.build_image(BuildOptions { no_cache, pull })?;
        }
        Opt::Run => {
            let name = controller.composition().container.name.0.clone();
            apply(&mut controller, &mut stdout, vec![(name, Operation::Create)], 0)?;
        }
        Opt::Stop { timeout } => {
            let name = controller.composition().container.name.0.clone();
            apply(&mut controller, &mut stdout, vec![(name, Operation::Stop)], timeout)?;
        }
        Opt::Clean => {
            let container = controller.composition().container.name.0.clone();
            let image = controller.composition().image.name.0.clone();
            apply(
                &mut controller,
                &mut stdout,
                vec![
                    (container, Operation::RemoveContainer),
                    (image, Operation::RemoveImage),
                ],
                0,
            )?;
        }
        Opt::Status => {
            let status = controller.status()?;
            print_status(&controller, &status, &mut stdout)?;
        }
    }

    Ok(())
}

fn apply(
    controller: &mut Controller,
    stdout: &mut impl Write,
    operations: Vec<(String, Operation)>,
    timeout: u32,
) -> Result<()> {
    fn operation_verb(operation: Operation) -> &'static str {
        match operation {
            Operation::Create => "Creating",
            Operation::Stop => "Stopping",
            Operation::RemoveContainer => "Removing container",
            Operation::RemoveImage => "Removing image",
        }
    }

    let lines = operations
        .iter()
        .map(|(name, operation)| format!("{} {}", operation_verb(*operation), name))
        .collect::<Vec<_>>();

    let longest_line = lines.iter().map(|line| line.len()).max().unwrap_or(0);

    for line in lines.iter() {
        stdout.queue(style::Print(line))?;

        let padding = longest_line - line.len() + 1;
        stdout
            .queue(cursor::MoveRight(padding as u16))?
            .queue(style::Print("...\n"))?;
    }

    stdout.flush()?;

    for (line, (_, operation)) in operations.into_iter().enumerate() {
        let result = controller.apply(operation, timeout);

        let label = match &result {
            Ok(Outcome::Done) => "done".green().bold(),
            Ok(Outcome::Skipped(_)) => "skipped".yellow().bold(),
            Err(_) => "error".red().bold(),
        };

        stdout
            .queue(cursor::SavePosition)?
            .queue(cursor::MoveToPreviousLine((lines.len() - line) as u16))?
            .queue(cursor::MoveRight(longest_line as u16 + 5))?
            .queue(style::PrintStyledContent(label))?
            .queue(cursor::RestorePosition)?
            .flush()?;

        result?;
    }

    Ok(())
}

fn print_status(controller: &Controller, status: &Status, stdout: &mut impl Write) -> Result<()> {
    let composition = controller.composition();

    stdout.queue(style::PrintStyledContent("image     ".cyan().bold()))?;
    match &status.image {
        Some(image) => stdout.queue(style::Print(format!(
            "{} ({})\n",
            composition.image.name.0,
            short_id(&image.id.0)
        )))?,
        None => stdout.queue(style::Print(format!(
            "{} (not built)\n",
            composition.image.name.0
        )))?,
    };

    stdout.queue(style::PrintStyledContent("container ".cyan().bold()))?;
    match &status.container {
        Some(container) => {
            stdout.queue(style::Print(format!(
                "{} {} ({:?}, restart {})\n",
                container.name.0,
                short_id(&container.id.0),
                container.status,
                container.restart_policy
            )))?;

            for mount in container.mounts.iter() {
                stdout.queue(style::Print(format!(
                    "          {} -> {}\n",
                    mount.source.display(),
                    mount.target.display()
                )))?;
            }

            if status.up_to_date == Some(false) {
                stdout
                    .queue(style::PrintStyledContent("INFO: ".cyan().bold()))?
                    .queue(style::Print(
                        "the container was created from a different configuration, clean and run it again to apply changes.\n",
                    ))?;
            }
        }
        None => {
            stdout.queue(style::Print(format!(
                "{} (not created)\n",
                composition.container.name.0
            )))?;
        }
    }

    stdout.flush()?;
    Ok(())
}

fn short_id(id: &str) -> &str {
    let id = id.trim_start_matches("sha256:");
    &id[..id.len().min(12)]
}
