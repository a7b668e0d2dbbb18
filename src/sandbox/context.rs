//! Materializes an environment's declared files into a Docker build context.

use anyhow::{Context, Result};
use base64::Engine;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Builder;

use super::SandboxError;
use crate::config::EnvironmentConfig;

/// Write every declared file under `root/docker_build_<fingerprint>`.
///
/// Re-materializing the same config lands in the same directory with the
/// same content, so repeated builds are idempotent.
pub(crate) fn materialize(env: &EnvironmentConfig, root: &Path) -> Result<PathBuf> {
    let fingerprint = env.fingerprint()?;
    let context_dir = root.join(format!("docker_build_{fingerprint}"));
    fs::create_dir_all(&context_dir).with_context(|| {
        format!(
            "Failed to create build context: {}",
            context_dir.display()
        )
    })?;

    for (name, content) in &env.files {
        write_file(&context_dir, name, content.as_bytes())?;
    }

    for (name, encoded) in &env.files_b64 {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| {
                SandboxError::invalid_build_context(format!("'{name}' is not valid base64: {e}"))
            })?;
        write_file(&context_dir, name, &decoded)?;
    }

    Ok(context_dir)
}

/// Pack a build context directory into an in-memory tarball.
pub(crate) fn tarball(context_dir: &Path) -> Result<Vec<u8>> {
    let mut tar_buf = Vec::new();
    {
        let mut tar = Builder::new(&mut tar_buf);
        tar.append_dir_all(".", context_dir)
            .context("Failed to create tarball from build context")?;
        tar.finish().context("Failed to finalize tarball")?;
    }
    Ok(tar_buf)
}

fn write_file(context_dir: &Path, name: &str, content: &[u8]) -> Result<()> {
    let path = context_dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, content)
        .with_context(|| format!("Failed to write build file: {}", path.display()))
}
