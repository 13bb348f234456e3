use std::{env, path::PathBuf};

use anyhow::Context;
use fs_extra::dir::{CopyOptions, copy};

/// Copies `assets/` into the build output and exposes the copy as `ASSET_DIR`.
fn main() -> anyhow::Result<()> {
    println!("cargo:rerun-if-changed=assets");

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let source = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?).join("assets");
    if !source.exists() {
        return Ok(());
    }

    let options = CopyOptions::new().overwrite(true);
    copy(&source, &out_dir, &options)
        .with_context(|| format!("copying {} into {}", source.display(), out_dir.display()))?;
    println!("cargo:rustc-env=ASSET_DIR={}", out_dir.join("assets").display());
    Ok(())
}
