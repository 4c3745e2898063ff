//! An in-memory virtual filesystem populated by the ingest phase from an
//! entity's upstream state, exposed to predicates as the `file.*`
//! capability set (and, for diff contexts, `base_file.*` against a
//! pre-change snapshot).

use std::collections::BTreeMap;

use glob::Pattern;

use crate::error::SandboxError;

/// One file's contents plus an optional symlink target.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    File(Vec<u8>),
    Symlink(String),
}

/// A read-only, in-memory filesystem snapshot.
#[derive(Debug, Clone, Default)]
pub struct VirtualFilesystem {
    nodes: BTreeMap<String, Node>,
}

impl VirtualFilesystem {
    /// Builds an empty filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a regular file at `path`.
    pub fn insert_file(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.nodes.insert(path.into(), Node::File(contents.into()));
    }

    /// Inserts a symlink at `path` pointing at `target`. Symlinks are
    /// followed exactly one level by `read`/`exists`.
    pub fn insert_symlink(&mut self, path: impl Into<String>, target: impl Into<String>) {
        self.nodes.insert(path.into(), Node::Symlink(target.into()));
    }

    fn resolve(&self, path: &str) -> Option<&[u8]> {
        match self.nodes.get(path)? {
            Node::File(contents) => Some(contents),
            Node::Symlink(target) => match self.nodes.get(target)? {
                Node::File(contents) => Some(contents),
                Node::Symlink(_) => None,
            },
        }
    }

    /// Returns whether `path` resolves to a file (following at most one
    /// symlink hop).
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Reads the full contents of `path`.
    ///
    /// # Errors
    /// Returns [`SandboxError::FileNotFound`] if `path` does not resolve.
    pub fn read(&self, path: &str) -> Result<&[u8], SandboxError> {
        self.resolve(path).ok_or_else(|| SandboxError::FileNotFound(path.to_owned()))
    }

    /// Lists the direct children of `dir` (paths one path-segment below
    /// `dir`), sorted.
    #[must_use]
    pub fn ls(&self, dir: &str) -> Vec<String> {
        let prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
        let mut seen = std::collections::BTreeSet::new();
        for path in self.nodes.keys() {
            if let Some(rest) = path.strip_prefix(&prefix) {
                if rest.is_empty() {
                    continue;
                }
                let child = rest.split('/').next().unwrap_or(rest);
                seen.insert(child.to_owned());
            }
        }
        seen.into_iter().collect()
    }

    /// Lists all paths matching a glob pattern, sorted.
    ///
    /// # Errors
    /// Returns [`SandboxError::InvalidGlob`] if `pattern` is malformed.
    pub fn ls_glob(&self, pattern: &str) -> Result<Vec<String>, SandboxError> {
        let compiled =
            Pattern::new(pattern).map_err(|source| SandboxError::InvalidGlob(source.to_string()))?;
        Ok(self.nodes.keys().filter(|path| compiled.matches(path)).cloned().collect())
    }

    /// Walks the entire filesystem, returning every path in sorted order.
    #[must_use]
    pub fn walk(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Returns a best-effort MIME type guess for `path`, based on
    /// extension only (the sandbox never sniffs content).
    #[must_use]
    pub fn http_type(&self, path: &str) -> &'static str {
        match path.rsplit('.').next() {
            Some("json") => "application/json",
            Some("yaml" | "yml") => "application/yaml",
            Some("toml") => "application/toml",
            Some("md") => "text/markdown",
            Some("txt") => "text/plain",
            _ => "application/octet-stream",
        }
    }

    /// Produces a deterministic gzipped tar of every file under `prefix`,
    /// with all mtimes zeroed.
    ///
    /// # Errors
    /// Returns [`SandboxError::Archive`] if archive construction fails.
    pub fn archive(&self, prefix: &str) -> Result<Vec<u8>, SandboxError> {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        {
            let mut builder = tar::Builder::new(&mut encoder);
            for (path, node) in &self.nodes {
                if !path.starts_with(prefix) {
                    continue;
                }
                let Node::File(contents) = node else { continue };
                let mut header = tar::Header::new_gnu();
                header
                    .set_path(path)
                    .map_err(|source| SandboxError::Archive(source.to_string()))?;
                header.set_size(u64::try_from(contents.len()).unwrap_or(u64::MAX));
                header.set_mtime(0);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append(&header, contents.as_slice())
                    .map_err(|source| SandboxError::Archive(source.to_string()))?;
            }
            builder.finish().map_err(|source| SandboxError::Archive(source.to_string()))?;
        }
        encoder.finish().map_err(|source| SandboxError::Archive(source.to_string()))
    }
}
