use std::path::PathBuf;

/// Returns an empty per-test directory under the system temp dir.
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("umbra_tests")
        .join(format!("{}_{}", name, std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).expect("Failed to clear scratch directory");
    }
    std::fs::create_dir_all(&dir).expect("Failed to create scratch directory");
    dir
}
