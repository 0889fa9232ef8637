//! File-path naming convention.
//!
//! Maps a repository-relative path to the `(package, class)` identity the
//! call graph uses, and classifies it as test, source, resource, or
//! unsupported. The mapping is a pure function of the path, so the same
//! path resolves to the same identity on every commit.
//!
//! | Path                                      | Kind     | Package / class     |
//! |-------------------------------------------|----------|---------------------|
//! | `…/src/main/java/io/app/Foo.java`         | source   | `io.app` / `Foo`    |
//! | `…/src/test/kotlin/io/app/FooTest.kt`     | test     | `io.app` / `FooTest`|
//! | `…/src/main/resources/app.yaml`           | resource | file `app.yaml`     |
//! | anything else                             | unsupported              |

use serde::{Deserialize, Serialize};

/// Language roots recognised under `src/main/` and `src/test/`, with the
/// file extension each one holds.
const LANGUAGE_ROOTS: &[(&str, &str)] = &[("java", "java"), ("kotlin", "kt"), ("scala", "scala")];

const RESOURCE_ROOTS: &[&str] = &["src/main/resources/", "src/test/resources/"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Source,
    Test,
    Resource,
    Unsupported,
}

/// Identity of a changed file in call-graph terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileNode {
    pub pkg: String,
    pub class: String,
    /// Always empty for file-level nodes; kept for symmetry with graph nodes.
    pub method: String,
    /// Base name of the file (used to match resource nodes).
    pub file: String,
    pub kind: FileKind,
}

impl FileNode {
    fn unsupported(file: &str) -> Self {
        Self {
            pkg: String::new(),
            class: String::new(),
            method: String::new(),
            file: file.to_string(),
            kind: FileKind::Unsupported,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.kind != FileKind::Unsupported
    }

    pub fn is_test(&self) -> bool {
        self.kind == FileKind::Test
    }

    pub fn is_source(&self) -> bool {
        self.kind == FileKind::Source
    }

    pub fn is_resource(&self) -> bool {
        self.kind == FileKind::Resource
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Resolve one path.
pub fn parse_file(path: &str) -> FileNode {
    let normalized = path.trim().replace('\\', "/");
    let base = normalized.rsplit('/').next().unwrap_or_default();

    if RESOURCE_ROOTS
        .iter()
        .any(|root| find_root(&normalized, root).is_some())
    {
        return FileNode {
            pkg: String::new(),
            class: String::new(),
            method: String::new(),
            file: base.to_string(),
            kind: FileKind::Resource,
        };
    }

    for (lang, ext) in LANGUAGE_ROOTS {
        for (set, kind) in [("main", FileKind::Source), ("test", FileKind::Test)] {
            let root = format!("src/{set}/{lang}/");
            let Some(rest) = find_root(&normalized, &root) else {
                continue;
            };
            return parse_class_path(rest, ext, kind).unwrap_or_else(|| FileNode::unsupported(base));
        }
    }

    FileNode::unsupported(base)
}

/// Resolve many paths, preserving order.
pub fn parse_file_names<I, S>(paths: I) -> Vec<FileNode>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths.into_iter().map(|p| parse_file(p.as_ref())).collect()
}

/// Return the part of `path` after `root`, where `root` must start the path
/// or follow a `/`.
fn find_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    if let Some(rest) = path.strip_prefix(root) {
        return Some(rest);
    }
    let needle = format!("/{root}");
    path.rfind(&needle).map(|idx| &path[idx + needle.len()..])
}

/// `io/app/Foo.java` → package `io.app`, class `Foo`.
fn parse_class_path(rest: &str, ext: &str, kind: FileKind) -> Option<FileNode> {
    let (dirs, file) = match rest.rsplit_once('/') {
        Some((dirs, file)) => (dirs, file),
        None => ("", rest),
    };
    let class = file.strip_suffix(ext)?.strip_suffix('.')?;
    if class.is_empty() {
        return None;
    }
    Some(FileNode {
        pkg: dirs.replace('/', "."),
        class: class.to_string(),
        method: String::new(),
        file: file.to_string(),
        kind,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
