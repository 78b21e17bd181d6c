use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use tokio::fs;

/// Writes `contents` to `path` through a sibling temp file and a rename, so
/// readers never observe a half-written file. Missing parent directories are
/// created.
pub async fn write_file_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    fs::write(tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp_path))?;
    fs::rename(tmp_path, path)
        .await
        .with_context(|| format!("Failed to replace {:?}", path))?;
    debug!("Wrote {} bytes to {:?}", contents.len(), path);
    Ok(())
}
