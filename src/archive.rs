use std::fs::{self, File};
use std::path::Path;

use anyhow::Context;
use tar::Builder;
use zstd::stream::write::Encoder as ZstdEncoder;

const ZSTD_LEVEL: i32 = 3;

/// Pack a directory into a tar.zst archive
pub fn pack_dir(dir: &Path, archive: &Path) -> anyhow::Result<()> {
    if let Some(parent) = archive.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file = File::create(archive)
        .with_context(|| format!("Failed to create archive {:?}", archive))?;
    let stream = ZstdEncoder::new(file, ZSTD_LEVEL)?;

    let mut builder = Builder::new(stream);
    builder
        .append_dir_all(".", dir)
        .with_context(|| format!("Failed to pack {:?} into {:?}", dir, archive))?;
    builder
        .into_inner()
        .and_then(|stream| stream.finish())
        .with_context(|| format!("Failed to finish archive {:?}", archive))?;

    Ok(())
}
