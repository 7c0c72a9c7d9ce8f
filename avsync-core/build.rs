//! Stamps `avsync-sim` with the source revision it was built from.
//!
//! `AVSYNC_REVISION` is the short commit hash, suffixed with `-dirty` when the
//! working tree has uncommitted changes, or `unknown` outside a git checkout.
//! `AVSYNC_BUILT` holds the UTC build time and cargo profile.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok().map(|s| s.trim().to_string())
}

fn main() {
    let revision = match git(&["rev-parse", "--short=8", "HEAD"]) {
        Some(hash) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).is_some_and(|s| !s.is_empty());
            if dirty {
                format!("{}-dirty", hash)
            } else {
                hash
            }
        }
        None => "unknown".to_string(),
    };

    let built = format!(
        "{} {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%MZ"),
        std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string())
    );

    println!("cargo:rustc-env=AVSYNC_REVISION={}", revision);
    println!("cargo:rustc-env=AVSYNC_BUILT={}", built);
}
