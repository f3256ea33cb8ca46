use anyhow::{anyhow, Result};
use ignore::WalkBuilder;
use log::debug;
use number_prefix::NumberPrefix;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};
use tar::Builder as TarBuilder;
use tempfile::TempDir;

/// A build context packed into a tar file that lives as long as this value.
pub struct ContextArchive {
    dir: TempDir,
    path: PathBuf,
    pub size: u64,
}

impl ContextArchive {
    /// Packs `context`, skipping whatever its `.dockerignore` excludes.
    pub fn create<P: AsRef<Path>>(context: P) -> Result<ContextArchive> {
        let context = context.as_ref();
        if !context.is_dir() {
            return Err(anyhow!("build context {:?} is not a directory", context));
        }

        let dir = TempDir::new()?;
        let path = dir.path().join("context.tar");
        let file = {
            let mut options = OpenOptions::new();
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            options.write(true).create(true).open(&path)?
        };

        let mut tar = TarBuilder::new(file);
        let walk = WalkBuilder::new(context)
            .add_custom_ignore_filename(".dockerignore")
            .ignore(false)
            .git_global(false)
            .git_ignore(false)
            .git_exclude(false)
            .hidden(false)
            .parents(false)
            .build();

        let mut size = 0;
        for entry in walk {
            let entry = entry?;
            let relative = entry.path().strip_prefix(context)?;
            if relative.as_os_str().is_empty() {
                continue;
            }

            debug!("adding {:?} to build context", relative);
            tar.append_path_with_name(entry.path(), relative)?;
            let metadata = entry.metadata()?;
            if metadata.is_file() {
                size += metadata.len();
            }
        }

        tar.finish()?;

        Ok(ContextArchive { dir, path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> Result<File> {
        Ok(File::open(&self.path)?)
    }

    pub fn describe_size(&self) -> String {
        match NumberPrefix::binary(self.size as f32) {
            NumberPrefix::Standalone(bytes) => format!("{} bytes", bytes),
            NumberPrefix::Prefixed(prefix, n) => format!("{:.1} {}B", n, prefix),
        }
    }

    pub fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}
