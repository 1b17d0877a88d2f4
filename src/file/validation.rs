use std::ffi::OsString;
use std::path::{Path, PathBuf};

use hashbrown::HashSet;

use crate::error::{Error, Result};
use crate::secret::Password;

/// Checks the inputs and output of an encryption before any work starts.
///
/// Returns the archive name of every input, in order.
///
/// # Errors
///
/// - [`Error::InvalidInputPath`] if there are no inputs, an input is missing, or two inputs share a name
/// - [`Error::InvalidOutputPath`] if the output exists or its parent directory does not
pub fn validate_encryption(inputs: &[PathBuf], output: &Path) -> Result<Vec<OsString>> {
    if inputs.is_empty() {
        return Err(Error::InvalidInputPath { path: PathBuf::new(), reason: "no input paths given" });
    }

    let mut names = Vec::with_capacity(inputs.len());
    let mut seen = HashSet::with_capacity(inputs.len());
    for input in inputs {
        if input.symlink_metadata().is_err() {
            return Err(Error::InvalidInputPath { path: input.clone(), reason: "path does not exist" });
        }
        let name = archive_name(input)?;
        if !seen.insert(name.clone()) {
            return Err(Error::InvalidInputPath { path: input.clone(), reason: "another input has the same name" });
        }
        names.push(name);
    }

    if output.symlink_metadata().is_ok() {
        return Err(Error::InvalidOutputPath { path: output.to_path_buf(), reason: "output already exists" });
    }
    if !parent_dir(output).is_dir() {
        return Err(Error::InvalidOutputPath { path: output.to_path_buf(), reason: "parent directory does not exist" });
    }
    let resolved = resolve_output(output)?;
    for input in inputs.iter().filter(|input| input.is_dir()) {
        let root = input.canonicalize()?;
        if resolved.starts_with(&root) {
            return Err(Error::InvalidOutputPath { path: output.to_path_buf(), reason: "output lies inside an input directory" });
        }
    }

    Ok(names)
}

/// Checks the container and destination of a decryption before any work starts.
///
/// # Errors
///
/// - [`Error::InvalidInputPath`] if the input is not a regular file
/// - [`Error::InvalidOutputPath`] if the output directory does not exist
pub fn validate_decryption(input: &Path, output_dir: &Path) -> Result<()> {
    if !input.is_file() {
        return Err(Error::InvalidInputPath { path: input.to_path_buf(), reason: "not a file" });
    }
    if !output_dir.is_dir() {
        return Err(Error::InvalidOutputPath { path: output_dir.to_path_buf(), reason: "not an existing directory" });
    }
    Ok(())
}

/// # Errors
///
/// Returns [`Error::InvalidPasswordLength`] if `password` is shorter than `min` bytes.
pub fn validate_password(password: &Password, min: usize) -> Result<()> {
    if password.len() < min {
        return Err(Error::InvalidPasswordLength { len: password.len(), min });
    }
    Ok(())
}

/// Name an input root is stored under inside the archive.
///
/// # Errors
///
/// Returns [`Error::InvalidInputPath`] if the path has no final component, even once resolved.
pub fn archive_name(path: &Path) -> Result<OsString> {
    if let Some(name) = path.file_name() {
        return Ok(name.to_os_string());
    }
    path.canonicalize()
        .ok()
        .and_then(|resolved| resolved.file_name().map(ToOwned::to_owned))
        .ok_or_else(|| Error::InvalidInputPath { path: path.to_path_buf(), reason: "path has no file name" })
}

/// Absolute, symlink-free form of a not yet existing output path.
fn resolve_output(output: &Path) -> Result<PathBuf> {
    let parent = parent_dir(output).canonicalize()?;
    Ok(match output.file_name() {
        Some(name) => parent.join(name),
        None => parent,
    })
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
