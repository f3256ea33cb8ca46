pub use self::project_file::{Overrides, ProjectFileFrontend};

mod project_file;
