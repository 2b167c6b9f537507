// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use serde::Deserialize;
use std::path::{Component, Path};

use super::QualifiedName;

/// How repository-relative paths map onto module paths.
///
/// The defaults describe a cargo workspace with members under `crates/`:
/// `crates/hir-def/src/resolver.rs` is module `hir_def::resolver`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleLayout {
    /// First path component of every member crate (default: `crates`)
    #[serde(default = "default_root_marker")]
    pub root_marker: String,

    /// Source directory directly under a crate (default: `src`)
    #[serde(default = "default_source_dir")]
    pub source_dir: String,

    /// File stems that name their parent module (default: `lib`, `mod`)
    #[serde(default = "default_module_root_stems")]
    pub module_root_stems: Vec<String>,

    /// Source file extension, without the dot (default: `rs`)
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_root_marker() -> String {
    "crates".to_string()
}

fn default_source_dir() -> String {
    "src".to_string()
}

fn default_module_root_stems() -> Vec<String> {
    vec!["lib".to_string(), "mod".to_string()]
}

fn default_extension() -> String {
    "rs".to_string()
}

impl Default for ModuleLayout {
    fn default() -> Self {
        Self {
            root_marker: default_root_marker(),
            source_dir: default_source_dir(),
            module_root_stems: default_module_root_stems(),
            extension: default_extension(),
        }
    }
}

/// Crate and module segments derived from a file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePath {
    /// Crate segment, hyphens replaced by underscores.
    pub krate: String,
    /// Module segments below the crate root.
    pub modules: Vec<String>,
}

impl ModulePath {
    /// All segments, crate first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.krate.as_str()).chain(self.modules.iter().map(String::as_str))
    }
}

impl ModuleLayout {
    /// Derives the module path of a repository-relative file.
    ///
    /// Returns `None` for paths that do not start with the root marker.
    #[must_use]
    pub fn module_path(&self, rel_path: &Path) -> Option<ModulePath> {
        let parts: Vec<&str> = rel_path
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Option<_>>()?;

        let (marker, rest) = parts.split_first()?;
        if *marker != self.root_marker {
            return None;
        }
        let (crate_dir, rest) = rest.split_first()?;

        let rest = match rest.split_first() {
            Some((first, tail)) if *first == self.source_dir => tail,
            _ => rest,
        };

        let mut modules: Vec<String> = rest.iter().map(|s| (*s).to_string()).collect();
        if let Some(last) = modules.pop() {
            let suffix = format!(".{}", self.extension);
            let stem = last.strip_suffix(&suffix).unwrap_or(&last);
            if !self.module_root_stems.iter().any(|s| s == stem) {
                modules.push(stem.to_string());
            }
        }

        Some(ModulePath {
            krate: crate_dir.replace('-', "_"),
            modules,
        })
    }

    /// Crate segment of a file, if it lives under the root marker.
    #[must_use]
    pub fn crate_of(&self, rel_path: &Path) -> Option<String> {
        self.module_path(rel_path).map(|m| m.krate)
    }

    /// Joins the file's module path with `symbol`.
    ///
    /// Files outside the root marker yield the bare symbol.
    #[must_use]
    pub fn qualify(&self, rel_path: &Path, symbol: &str) -> QualifiedName {
        match self.module_path(rel_path) {
            Some(module) => {
                let mut segments: Vec<&str> = module.segments().collect();
                segments.push(symbol);
                QualifiedName::new(segments.join("::"))
            }
            None => QualifiedName::new(symbol),
        }
    }

    /// Whether `path` has the source extension.
    #[must_use]
    pub fn is_source_file(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == self.extension.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qualify(path: &str, symbol: &str) -> String {
        ModuleLayout::default()
            .qualify(Path::new(path), symbol)
            .to_string()
    }

    #[test]
    fn test_lib_rs_is_crate_root() {
        assert_eq!(qualify("crates/hir/src/lib.rs", "Semantics"), "hir::Semantics");
    }

    #[test]
    fn test_hyphens_become_underscores() {
        assert_eq!(
            qualify("crates/hir-def/src/resolver.rs", "resolve_path"),
            "hir_def::resolver::resolve_path"
        );
    }

    #[test]
    fn test_mod_rs_names_directory() {
        assert_eq!(
            qualify("crates/ide/src/inlay_hints/mod.rs", "hints"),
            "ide::inlay_hints::hints"
        );
        assert_eq!(
            qualify("crates/ide/src/inlay_hints/chaining.rs", "hints"),
            "ide::inlay_hints::chaining::hints"
        );
    }

    #[test]
    fn test_src_only_dropped_after_crate() {
        assert_eq!(
            qualify("crates/xtask/tests/src/util.rs", "run"),
            "xtask::tests::src::util::run"
        );
    }

    #[test]
    fn test_outside_marker_is_bare() {
        assert_eq!(qualify("src/main.rs", "main"), "main");
        assert_eq!(qualify("/usr/lib/rustlib/src/core.rs", "panic"), "panic");
    }

    #[test]
    fn test_crate_directory_only() {
        assert_eq!(qualify("crates/core", "Thing"), "core::Thing");
    }

    #[test]
    fn test_crate_of() {
        let layout = ModuleLayout::default();
        assert_eq!(
            layout.crate_of(Path::new("crates/hir-def/src/lib.rs")),
            Some("hir_def".to_string())
        );
        assert_eq!(layout.crate_of(Path::new("tests/fixture.rs")), None);
    }

    #[test]
    fn test_custom_layout() {
        let layout = ModuleLayout {
            root_marker: "packages".to_string(),
            ..ModuleLayout::default()
        };
        assert_eq!(
            layout
                .qualify(Path::new("packages/net-core/src/conn.rs"), "open")
                .as_str(),
            "net_core::conn::open"
        );
    }
}
