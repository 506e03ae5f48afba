//! Include-chain resolution and flattening (§4.M, §6 "Include directive").
//!
//! `Preprocessor::process` turns a tree of `GET`-linked source files into
//! one flat character stream, the well-formed input the (out-of-scope)
//! lexer consumes. Cycle detection tracks the "currently being visited"
//! path with a stack of canonicalized absolute paths, checked on entry to
//! each new file — the same shape as cycle detection over any directed
//! dependency graph.

use std::fs;
use std::path::{Path, PathBuf};

use crate::directive::parse_get_directive;
use crate::error::PreprocessError;

/// Construction parameters: the ordered list of directories searched for
/// a `GET "path"` target that isn't found relative to the including file.
#[derive(Debug, Clone, Default)]
pub struct PreprocessConfig {
    /// Include-search directories, consulted in order after the including
    /// file's own directory (§6: "the directory of the current file, then
    /// each configured include path in order").
    pub include_dirs: Vec<PathBuf>,
}

/// Expands `GET` directives into a single flat output stream.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    /// A preprocessor that searches `include_dirs` (in order) for any
    /// `GET` target not found alongside the including file.
    pub fn new(config: PreprocessConfig) -> Preprocessor {
        Preprocessor { config }
    }

    /// Expand `root` into a flat stream, recursively inlining every `GET`
    /// directive it (and its inclusions) contain. Emits a `//LINE <n>
    /// "<path>"` comment at every include boundary so downstream passes
    /// can recover source locations (§4.M).
    pub fn process(&self, root: &Path) -> Result<String, PreprocessError> {
        let mut output = String::new();
        let mut stack = Vec::new();
        self.expand_into(root, &mut stack, &mut output)?;
        Ok(output)
    }

    fn expand_into(
        &self,
        path: &Path,
        stack: &mut Vec<PathBuf>,
        output: &mut String,
    ) -> Result<(), PreprocessError> {
        let canonical = canonicalize_for_stack(path);
        if let Some(cycle_start) = stack.iter().position(|p| *p == canonical) {
            let mut chain = stack[cycle_start..].to_vec();
            chain.push(canonical);
            return Err(PreprocessError::CircularInclude(chain));
        }

        let source = fs::read_to_string(path).map_err(|e| PreprocessError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        stack.push(canonical);
        emit_line_directive(output, 1, path);
        for (zero_based_line, line) in source.lines().enumerate() {
            if let Some(target) = parse_get_directive(line) {
                let resolved = self.resolve(target, path)?;
                self.expand_into(&resolved, stack, output)?;
                emit_line_directive(output, zero_based_line as u64 + 2, path);
            } else {
                output.push_str(line);
                output.push('\n');
            }
        }
        stack.pop();
        Ok(())
    }

    /// Search order: the including file's own directory, then each
    /// `include_dirs` entry in order (§6).
    fn resolve(&self, target: &str, including_file: &Path) -> Result<PathBuf, PreprocessError> {
        let target_path = Path::new(target);
        if target_path.is_absolute() {
            return if target_path.is_file() {
                Ok(target_path.to_path_buf())
            } else {
                Err(PreprocessError::FileNotFound {
                    path: target.to_string(),
                    tried: vec![target_path.to_path_buf()],
                })
            };
        }

        let mut tried = Vec::new();
        let own_dir = including_file.parent().unwrap_or_else(|| Path::new("."));
        let candidate = own_dir.join(target_path);
        if candidate.is_file() {
            return Ok(candidate);
        }
        tried.push(candidate);

        for dir in &self.config.include_dirs {
            let candidate = dir.join(target_path);
            if candidate.is_file() {
                return Ok(candidate);
            }
            tried.push(candidate);
        }

        Err(PreprocessError::FileNotFound {
            path: target.to_string(),
            tried,
        })
    }
}

/// Canonicalize for cycle-stack comparison, falling back to the raw path
/// if the file has already vanished from under us (a subsequent
/// `read_to_string` will surface the real I/O error).
fn canonicalize_for_stack(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn emit_line_directive(output: &mut String, line: u64, path: &Path) {
    output.push_str("//LINE ");
    output.push_str(&line.to_string());
    output.push_str(" \"");
    output.push_str(&path.display().to_string());
    output.push_str("\"\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn flattens_a_single_get_directive() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "inner.b", "LET y = 2\n");
        let root = write_file(dir.path(), "root.b", "LET x = 1\nGET \"inner.b\"\nLET z = 3\n");

        let pre = Preprocessor::new(PreprocessConfig::default());
        let out = pre.process(&root).unwrap();

        assert!(out.contains("LET x = 1"));
        assert!(out.contains("LET y = 2"));
        assert!(out.contains("LET z = 3"));
        assert!(out.contains("//LINE 1 "));
    }

    #[test]
    fn searches_include_dirs_in_order() {
        let owning = TempDir::new().unwrap();
        let inc_a = TempDir::new().unwrap();
        let inc_b = TempDir::new().unwrap();
        write_file(inc_a.path(), "shared.b", "LET from = \"a\"\n");
        write_file(inc_b.path(), "shared.b", "LET from = \"b\"\n");
        let root = write_file(owning.path(), "root.b", "GET \"shared.b\"\n");

        let pre = Preprocessor::new(PreprocessConfig {
            include_dirs: vec![inc_a.path().to_path_buf(), inc_b.path().to_path_buf()],
        });
        let out = pre.process(&root).unwrap();
        assert!(out.contains(r#"LET from = "a""#));
    }

    #[test]
    fn own_directory_is_searched_before_include_dirs() {
        let owning = TempDir::new().unwrap();
        let inc = TempDir::new().unwrap();
        write_file(owning.path(), "shared.b", "LET from = \"own\"\n");
        write_file(inc.path(), "shared.b", "LET from = \"include\"\n");
        let root = write_file(owning.path(), "root.b", "GET \"shared.b\"\n");

        let pre = Preprocessor::new(PreprocessConfig {
            include_dirs: vec![inc.path().to_path_buf()],
        });
        let out = pre.process(&root).unwrap();
        assert!(out.contains(r#"LET from = "own""#));
    }

    #[test]
    fn direct_self_include_is_a_cycle() {
        let dir = TempDir::new().unwrap();
        let root = write_file(dir.path(), "root.b", "GET \"root.b\"\n");

        let pre = Preprocessor::new(PreprocessConfig::default());
        let err = pre.process(&root).unwrap_err();
        assert!(matches!(err, PreprocessError::CircularInclude(_)));
    }

    #[test]
    fn indirect_cycle_is_detected() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "b.b", "GET \"a.b\"\n");
        let root = write_file(dir.path(), "a.b", "GET \"b.b\"\n");

        let pre = Preprocessor::new(PreprocessConfig::default());
        let err = pre.process(&root).unwrap_err();
        assert!(matches!(err, PreprocessError::CircularInclude(_)));
    }

    #[test]
    fn diamond_include_is_not_a_cycle() {
        // root -> a -> common, root -> b -> common: `common` is visited
        // twice but never while it is still on the active stack.
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "common.b", "LET c = 1\n");
        write_file(dir.path(), "a.b", "GET \"common.b\"\n");
        write_file(dir.path(), "b.b", "GET \"common.b\"\n");
        let root = write_file(dir.path(), "root.b", "GET \"a.b\"\nGET \"b.b\"\n");

        let pre = Preprocessor::new(PreprocessConfig::default());
        let out = pre.process(&root).unwrap();
        assert_eq!(out.matches("LET c = 1").count(), 2);
    }

    #[test]
    fn missing_file_reports_every_search_location_tried() {
        let dir = TempDir::new().unwrap();
        let inc = TempDir::new().unwrap();
        let root = write_file(dir.path(), "root.b", "GET \"missing.b\"\n");

        let pre = Preprocessor::new(PreprocessConfig {
            include_dirs: vec![inc.path().to_path_buf()],
        });
        let err = pre.process(&root).unwrap_err();
        match err {
            PreprocessError::FileNotFound { path, tried } => {
                assert_eq!(path, "missing.b");
                assert_eq!(tried.len(), 2);
            }
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn get_keyword_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "inner.b", "LET y = 2\n");
        let root = write_file(dir.path(), "root.b", "get \"inner.b\"\n");

        let pre = Preprocessor::new(PreprocessConfig::default());
        let out = pre.process(&root).unwrap();
        assert!(out.contains("LET y = 2"));
    }
}
