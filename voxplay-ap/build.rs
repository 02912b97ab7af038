//! Build script for voxplay-ap
//!
//! Embeds build identification for `GET /build_info` and `--version` output:
//! `VOXPLAY_GIT_REV`, `VOXPLAY_BUILD_TIMESTAMP`, `VOXPLAY_BUILD_PROFILE`.

use std::process::Command;

fn git_rev() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let rev = String::from_utf8(output.stdout).ok()?;
    Some(rev.trim().to_string())
}

fn main() {
    let rev = git_rev().unwrap_or_else(|| "unknown".to_string());
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=VOXPLAY_GIT_REV={}", rev);
    println!("cargo:rustc-env=VOXPLAY_BUILD_TIMESTAMP={}", timestamp);
    println!("cargo:rustc-env=VOXPLAY_BUILD_PROFILE={}", profile);

    // Only re-run when HEAD moves; the timestamp is the time of that build.
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");
}
