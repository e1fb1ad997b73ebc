// Copyright 2021 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use fs::{ProjectFilesystem, RelativePath};

///
/// One build action. Rules return an ordered sequence of these; the scheduler executes
/// them in order against the project filesystem.
///
pub trait Step: Send + Sync {
    fn describe(&self) -> String;

    fn execute(&self, filesystem: &ProjectFilesystem) -> Result<(), String>;
}

pub struct MkdirStep {
    pub path: RelativePath,
}

impl Step for MkdirStep {
    fn describe(&self) -> String {
        format!("mkdir -p {}", self.path)
    }

    fn execute(&self, filesystem: &ProjectFilesystem) -> Result<(), String> {
        filesystem.mkdirs(&self.path)
    }
}

pub struct WriteFileStep {
    pub contents: String,
    pub path: RelativePath,
}

impl Step for WriteFileStep {
    fn describe(&self) -> String {
        format!("write {}", self.path)
    }

    fn execute(&self, filesystem: &ProjectFilesystem) -> Result<(), String> {
        filesystem.write_contents_to_path(&self.contents, &self.path)
    }
}

///
/// Runs a shell command with the project root as its working directory.
///
pub struct ShellCommandStep {
    pub command: String,
}

impl Step for ShellCommandStep {
    fn describe(&self) -> String {
        self.command.clone()
    }

    fn execute(&self, filesystem: &ProjectFilesystem) -> Result<(), String> {
        let status = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(filesystem.root())
            .status()
            .map_err(|e| format!("Failed to spawn `{}`: {e}", self.command))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("Command `{}` exited with {status}", self.command))
        }
    }
}
