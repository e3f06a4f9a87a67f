//! Workspace hygiene checks
//!
//! Manifests inherit only what the workspace defines, and sources keep to
//! the 100 column width.

use std::fs;
use std::path::{Path, PathBuf};

const MAX_WIDTH: usize = 100;

fn root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn manifest(path: &Path) -> toml::Value {
    let content = fs::read_to_string(path).unwrap();
    content.parse().unwrap()
}

fn rust_sources(dir: &Path, found: &mut Vec<PathBuf>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            rust_sources(&path, found);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            found.push(path);
        }
    }
}

#[test]
fn test_member_manifests_inherit_defined_package_keys() {
    let workspace = manifest(&root().join("Cargo.toml"));
    let shared = workspace["workspace"]["package"].as_table().unwrap();

    for member in ["planet-dumper-common", "planet-dumper-exec"] {
        let member_manifest = manifest(&root().join("crates").join(member).join("Cargo.toml"));
        let package = member_manifest["package"].as_table().unwrap();
        for (key, value) in package {
            let inherited = value
                .get("workspace")
                .and_then(toml::Value::as_bool)
                .unwrap_or(false);
            if inherited {
                assert!(shared.contains_key(key), "{member} inherits undefined `{key}`");
            }
        }
    }
}

#[test]
fn test_exec_crate_has_no_json_dependency() {
    let exec = manifest(&root().join("crates/planet-dumper-exec/Cargo.toml"));
    let dependencies = exec["dependencies"].as_table().unwrap();
    assert!(!dependencies.contains_key("serde_json"));
}

#[test]
fn test_sources_fit_line_width() {
    let mut sources = Vec::new();
    for dir in ["src", "crates", "tests"] {
        rust_sources(&root().join(dir), &mut sources);
    }
    assert!(!sources.is_empty());

    let mut too_wide = Vec::new();
    for source in &sources {
        let content = fs::read_to_string(source).unwrap();
        for (index, line) in content.lines().enumerate() {
            if line.chars().count() > MAX_WIDTH {
                too_wide.push(format!("{}:{}", source.display(), index + 1));
            }
        }
    }
    assert!(too_wide.is_empty(), "lines over {MAX_WIDTH} columns: {too_wide:#?}");
}
