use std::process::Command;

/// Short commit id, with `-dirty` when the tree has local changes.
fn describe_head() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=12"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    (!described.is_empty()).then(|| described.to_string())
}

fn main() {
    println!("cargo::rerun-if-changed=../../.git/HEAD");
    println!("cargo::rerun-if-changed=../../.git/index");
    println!("cargo::rerun-if-env-changed=GIT_COMMIT_HASH");

    // Packagers building outside a checkout pass the id in explicitly.
    let commit = std::env::var("GIT_COMMIT_HASH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(describe_head)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo::rustc-env=GIT_COMMIT_HASH={}", commit);
}
