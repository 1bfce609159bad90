//! Installed-tool probe used by the status plan and the cluster prerequisites.

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use stagehand_types::{ReadinessState, ResourceKind, ResourceRef};
use stagehand_util::config::ToolPaths;

use super::{Probe, ProbeError};

pub struct ToolProbe {
    paths: ToolPaths,
}

impl ToolProbe {
    pub fn new(paths: ToolPaths) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl Probe for ToolProbe {
    fn name(&self) -> &str {
        "tool"
    }

    async fn check(&self, resource: &ResourceRef) -> Result<ReadinessState, ProbeError> {
        if resource.kind != ResourceKind::Tool {
            return Ok(ReadinessState::Absent);
        }
        let binary = self.paths.resolve(&resource.name);
        Ok(match find_on_path(binary, env::var_os("PATH")) {
            Some(_) => ReadinessState::Ready,
            None => ReadinessState::Absent,
        })
    }
}

/// Locate a binary the way a shell would. Names containing a separator are checked directly.
pub fn find_on_path(binary: &str, search_path: Option<OsString>) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let search_path = search_path?;
    env::split_paths(&search_path)
        .map(|directory| directory.join(binary))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
