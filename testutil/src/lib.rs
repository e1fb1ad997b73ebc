// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub mod file;

pub fn make_file(path: &Path, contents: &[u8], mode: u32) {
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(contents).unwrap();
    let mut permissions = std::fs::metadata(path).unwrap().permissions();
    permissions.set_mode(mode);
    file.set_permissions(permissions).unwrap();
}
