//! Helper executable discovery
//!
//! Finds companion executables (e.g. out-of-process plugin checkers) by
//! base name, trying each candidate directory against each architecture
//! tag appropriate to the host: a tagged name like `basename-64` first,
//! then the bare name.

use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    NativeArchitectureOnly,
    AllArchitectures,
}

/// One discovered helper: its path and the architecture tag it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperExec {
    pub executable: PathBuf,
    pub tag: String,
}

pub struct HelperExecPath {
    search_type: SearchType,
}

impl HelperExecPath {
    pub fn new(search_type: SearchType) -> Self {
        HelperExecPath { search_type }
    }

    /// Architecture tags in preference order for this host.
    pub fn tags(&self) -> Vec<String> {
        if cfg!(target_pointer_width = "32") {
            return vec!["32".to_string(), String::new()];
        }

        if cfg!(target_os = "macos") {
            if cfg!(target_arch = "aarch64") {
                match self.search_type {
                    SearchType::NativeArchitectureOnly => {
                        vec!["arm64".to_string(), String::new()]
                    }
                    SearchType::AllArchitectures => vec![
                        "arm64".to_string(),
                        String::new(),
                        "x86_64".to_string(),
                        "translated".to_string(),
                    ],
                }
            } else {
                vec!["x86_64".to_string(), String::new()]
            }
        } else {
            match self.search_type {
                SearchType::NativeArchitectureOnly => vec!["64".to_string(), String::new()],
                SearchType::AllArchitectures => vec![
                    "64".to_string(),
                    String::new(),
                    "32".to_string(),
                    "translated".to_string(),
                ],
            }
        }
    }

    /// Candidate directories in search order: an explicit override, the
    /// bundled helpers directory, then our own binary directory.
    pub fn helper_dir_paths(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Ok(override_dir) = env::var("ANNOPIPE_HELPER_DIR") {
            if !override_dir.is_empty() {
                dirs.push(PathBuf::from(override_dir));
            }
        }
        if let Ok(exe) = env::current_exe() {
            if let Some(parent) = exe.parent() {
                dirs.push(parent.join("helpers"));
                dirs.push(parent.to_path_buf());
            }
        }
        dirs
    }

    /// All matching helpers for a base name, best candidates first.
    pub fn helper_executables(&self, basename: &str) -> Vec<HelperExec> {
        let mut found = Vec::new();
        for dir in self.helper_dir_paths() {
            for tag in self.tags() {
                let name = if tag.is_empty() {
                    basename.to_string()
                } else {
                    format!("{}-{}", basename, tag)
                };
                let candidate = dir.join(executable_name(&name));
                if is_good(&candidate) {
                    debug!(path = %candidate.display(), tag, "found helper");
                    found.push(HelperExec {
                        executable: candidate,
                        tag,
                    });
                }
            }
        }
        found
    }

    /// The single best helper for a base name, if any.
    pub fn helper_executable(&self, basename: &str) -> Option<PathBuf> {
        self.helper_executables(basename)
            .into_iter()
            .next()
            .map(|h| h.executable)
    }
}

fn executable_name(base: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

#[cfg(unix)]
fn is_good(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_good(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn make_executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[test]
    fn test_tags_end_with_untagged_fallback() {
        let tags = HelperExecPath::new(SearchType::NativeArchitectureOnly).tags();
        assert!(tags.len() >= 2);
        assert!(tags.contains(&String::new()));
    }

    #[test]
    #[serial]
    fn test_search_respects_tag_order() {
        let dir = TempDir::new().unwrap();
        let lookup = HelperExecPath::new(SearchType::NativeArchitectureOnly);
        let first_tag = lookup.tags().remove(0);

        make_executable(dir.path(), "checker");
        make_executable(dir.path(), &format!("checker-{}", first_tag));

        std::env::set_var("ANNOPIPE_HELPER_DIR", dir.path());
        let found = lookup.helper_executables("checker");
        std::env::remove_var("ANNOPIPE_HELPER_DIR");

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].tag, first_tag);
        assert_eq!(found[1].tag, "");
    }

    #[test]
    #[serial]
    fn test_no_match_is_empty() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("ANNOPIPE_HELPER_DIR", dir.path());
        let lookup = HelperExecPath::new(SearchType::AllArchitectures);
        let found = lookup.helper_executables("nothing-here");
        std::env::remove_var("ANNOPIPE_HELPER_DIR");
        assert!(found.is_empty());
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_non_executable_files_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tool"), "data").unwrap();

        std::env::set_var("ANNOPIPE_HELPER_DIR", dir.path());
        let lookup = HelperExecPath::new(SearchType::NativeArchitectureOnly);
        let found = lookup.helper_executables("tool");
        std::env::remove_var("ANNOPIPE_HELPER_DIR");
        assert!(found.is_empty());
    }
}
