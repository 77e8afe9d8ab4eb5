use std::path::{Component, Path};

use crate::TransferError;

/// Validates that `name` is a single, plain path component.
///
/// Transfer ids, chunk file names, and assembled file names are joined onto
/// the store root, so none of them may escape it.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent (`..`) and current (`.`) directory references
/// - Anything with more than one component (`a/b`)
/// - Embedded NUL bytes
pub fn validate_path_component(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty name".into()));
    }
    if name.contains('\0') {
        return Err(TransferError::InvalidPath(format!(
            "NUL byte not allowed: {name:?}"
        )));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {name}"
        )));
    }
    if name.contains('/') {
        return Err(TransferError::InvalidPath(format!(
            "expected a single path component: {name}"
        )));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) => Err(TransferError::InvalidPath(format!(
            "parent directory traversal not allowed: {name}"
        ))),
        (Some(Component::RootDir | Component::Prefix(_)), _) => Err(TransferError::InvalidPath(
            format!("absolute path not allowed: {name}"),
        )),
        _ => Err(TransferError::InvalidPath(format!(
            "expected a single path component: {name}"
        ))),
    }
}
