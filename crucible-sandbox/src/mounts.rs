//! Bind-mount computation for session containers.
//!
//! The container sees exactly three host locations, and only one of them
//! read-write:
//!
//! | host | container | mode |
//! |---|---|---|
//! | `<cwd>/.scratch/<sessionId>` | `/scratch` | rw |
//! | `<HOME>/.claude/projects/<cache-name>` (if it exists) | `/claude-cache/projects/<cache-name>` | ro |
//! | `<cwd>/.claude/skills` (if it exists) | `/skills` | ro |

use std::path::{Path, PathBuf};

use bollard::models::{Mount, MountTypeEnum};

/// The computed bind mounts for one session.
#[derive(Debug, Clone, Default)]
pub struct MountSet {
    /// Host directory backing `/scratch`. Created on demand.
    pub scratch_host: PathBuf,
    mounts: Vec<Mount>,
}

impl MountSet {
    /// Compute the mounts for a session rooted at `cwd`.
    ///
    /// The scratch directory is created if missing; the read-only sources
    /// are mounted if and only if they already exist on the host.
    pub fn for_session(cwd: &Path, home: Option<&Path>, session_id: &str) -> std::io::Result<Self> {
        let scratch_host = cwd.join(".scratch").join(session_id);
        std::fs::create_dir_all(&scratch_host)?;

        let mut mounts = vec![bind_mount(&scratch_host, "/scratch", false)];

        if let Some(home) = home {
            let cache_name = cache_name_for(cwd);
            let cache_host = home.join(".claude").join("projects").join(&cache_name);
            if cache_host.is_dir() {
                mounts.push(bind_mount(
                    &cache_host,
                    &format!("/claude-cache/projects/{cache_name}"),
                    true,
                ));
            }
        }

        let skills_host = cwd.join(".claude").join("skills");
        if skills_host.is_dir() {
            mounts.push(bind_mount(&skills_host, "/skills", true));
        }

        Ok(Self { scratch_host, mounts })
    }

    /// The bollard mount descriptors.
    pub fn mounts(&self) -> Vec<Mount> {
        self.mounts.clone()
    }
}

/// Project cache directory name: the working directory with `/` replaced
/// by `-` (`/work/demo` -> `-work-demo`).
pub fn cache_name_for(cwd: &Path) -> String {
    cwd.display().to_string().replace('/', "-")
}

fn bind_mount(source: &Path, target: &str, read_only: bool) -> Mount {
    Mount {
        source: Some(source.display().to_string()),
        target: Some(target.to_string()),
        typ: Some(MountTypeEnum::BIND),
        read_only: Some(read_only),
        ..Default::default()
    }
}
