use std::process::Command;

// Stamp the binary with `<version>+<short sha>` when built from a checkout
fn main() {
    let version = env!("CARGO_PKG_VERSION");
    let sha = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .filter(|sha| !sha.is_empty());

    match sha {
        Some(sha) => println!("cargo:rustc-env=APP_VERSION={}+{}", version, sha),
        None => println!("cargo:rustc-env=APP_VERSION={}", version),
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
}
