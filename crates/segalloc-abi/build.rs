//! Restrict the cdylib's exported symbols to the `seg_*` entry points.

use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=version_scripts/segalloc.map");
    let Some(manifest_dir) = std::env::var_os("CARGO_MANIFEST_DIR") else {
        return;
    };
    let script = PathBuf::from(manifest_dir).join("version_scripts/segalloc.map");
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "linux" && script.exists() {
        println!(
            "cargo:rustc-cdylib-link-arg=-Wl,--version-script={}",
            script.display()
        );
    }
}
