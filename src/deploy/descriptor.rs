//! File descriptors: the unit of work of a deployment.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::transfer::remote_join;

/// Mode applied when the descriptor leaves the permission blank.
pub const DEFAULT_PERMISSIONS: &str = "755";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("Local path is empty")]
    EmptyLocalPath,

    #[error("Container path is empty")]
    EmptyContainerPath,

    #[error("Invalid permission spec: {0}")]
    InvalidPermissions(String),

    #[error("Local path has no file name: {0}")]
    NoFileName(String),
}

/// One file to deploy: where it is, where it goes, and its mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    local_path: PathBuf,
    container_path: String,
    permissions: String,
}

impl FileDescriptor {
    /// Validate and build a descriptor. A blank permission spec becomes
    /// [`DEFAULT_PERMISSIONS`].
    pub fn new(
        local_path: impl Into<PathBuf>,
        container_path: impl Into<String>,
        permissions: impl Into<String>,
    ) -> Result<Self, DescriptorError> {
        let local_path = local_path.into();
        let container_path = container_path.into().trim().to_string();
        let permissions = permissions.into().trim().to_string();

        if local_path.as_os_str().is_empty() {
            return Err(DescriptorError::EmptyLocalPath);
        }
        if container_path.is_empty() {
            return Err(DescriptorError::EmptyContainerPath);
        }
        if local_path.file_name().is_none() {
            return Err(DescriptorError::NoFileName(local_path.display().to_string()));
        }

        let permissions = if permissions.is_empty() {
            DEFAULT_PERMISSIONS.to_string()
        } else if is_valid_mode(&permissions) {
            permissions
        } else {
            return Err(DescriptorError::InvalidPermissions(permissions));
        };

        Ok(Self {
            local_path,
            container_path,
            permissions,
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn container_path(&self) -> &str {
        &self.container_path
    }

    pub fn permissions(&self) -> &str {
        &self.permissions
    }

    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.local_path.display(),
            self.container_path,
            self.permissions
        )
    }
}

/// A descriptor paired with its staging location for one pipeline run.
#[derive(Debug, Clone)]
pub struct TransferJob<'a> {
    pub descriptor: &'a FileDescriptor,
    pub staging_path: String,
}

impl<'a> TransferJob<'a> {
    pub fn new(descriptor: &'a FileDescriptor, staging_base: &str) -> Self {
        Self {
            descriptor,
            staging_path: remote_join(staging_base, &descriptor.file_name()),
        }
    }
}

/// Octal (`644`, `0755`) or symbolic (`u+x,go-w`) chmod mode.
fn is_valid_mode(mode: &str) -> bool {
    let octal = (3..=4).contains(&mode.len()) && mode.chars().all(|c| ('0'..='7').contains(&c));
    octal || mode.split(',').all(is_symbolic_clause)
}

fn is_symbolic_clause(clause: &str) -> bool {
    let rest = clause.trim_start_matches(['u', 'g', 'o', 'a']);
    let mut chars = rest.chars().peekable();
    let mut saw_op = false;
    while let Some(c) = chars.next() {
        if !matches!(c, '+' | '-' | '=') {
            return false;
        }
        saw_op = true;
        while let Some(p) = chars.peek() {
            if matches!(p, 'r' | 'w' | 'x' | 'X' | 's' | 't') {
                chars.next();
            } else {
                break;
            }
        }
    }
    saw_op
}
