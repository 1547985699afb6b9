//! Language detection and indexability rules.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Source language of a file, detected from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Go,
    Rust,
    Ruby,
    C,
    Cpp,
    Markdown,
    Toml,
    Yaml,
    Json,
    Shell,
    Sql,
    Text,
}

/// How a language's top-level units are delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Splitter {
    Indent,
    Brace,
    Keyword,
    Headings,
    /// No structural splitter; the whole file is one unit.
    WholeFile,
}

impl Lang {
    /// Identifier stored in chunk metadata and used in filters.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Ruby => "ruby",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Markdown => "markdown",
            Self::Toml => "toml",
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Shell => "shell",
            Self::Sql => "sql",
            Self::Text => "text",
        }
    }

    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        Some(match id {
            "python" => Self::Python,
            "javascript" => Self::JavaScript,
            "typescript" => Self::TypeScript,
            "java" => Self::Java,
            "go" => Self::Go,
            "rust" => Self::Rust,
            "ruby" => Self::Ruby,
            "c" => Self::C,
            "cpp" => Self::Cpp,
            "markdown" => Self::Markdown,
            "toml" => Self::Toml,
            "yaml" => Self::Yaml,
            "json" => Self::Json,
            "shell" => Self::Shell,
            "sql" => Self::Sql,
            "text" => Self::Text,
            _ => return None,
        })
    }

    #[must_use]
    pub fn splitter(self) -> Splitter {
        match self {
            Self::Python => Splitter::Indent,
            Self::JavaScript
            | Self::TypeScript
            | Self::Java
            | Self::Go
            | Self::Rust
            | Self::C
            | Self::Cpp => Splitter::Brace,
            Self::Ruby => Splitter::Keyword,
            Self::Markdown => Splitter::Headings,
            Self::Toml | Self::Yaml | Self::Json | Self::Shell | Self::Sql | Self::Text => {
                Splitter::WholeFile
            }
        }
    }

    /// Line comment prefixes, used to score chunk split points.
    #[must_use]
    pub fn comment_prefixes(self) -> &'static [&'static str] {
        match self {
            Self::Python | Self::Ruby | Self::Toml | Self::Yaml | Self::Shell => &["#"],
            Self::JavaScript
            | Self::TypeScript
            | Self::Java
            | Self::Go
            | Self::Rust
            | Self::C
            | Self::Cpp => &["//", "/*", "* ", "*/"],
            Self::Sql => &["--"],
            Self::Markdown => &["<!--"],
            Self::Json | Self::Text => &[],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" => Some(Lang::TypeScript),
        "java" => Some(Lang::Java),
        "go" => Some(Lang::Go),
        "rs" => Some(Lang::Rust),
        "rb" => Some(Lang::Ruby),
        "c" => Some(Lang::C),
        "cpp" | "cc" | "h" | "hpp" => Some(Lang::Cpp),
        "md" | "markdown" | "rst" => Some(Lang::Markdown),
        "toml" => Some(Lang::Toml),
        "yaml" | "yml" => Some(Lang::Yaml),
        "json" => Some(Lang::Json),
        "sh" | "bash" | "zsh" => Some(Lang::Shell),
        "sql" => Some(Lang::Sql),
        "txt" | "cfg" | "ini" | "conf" => Some(Lang::Text),
        _ => None,
    }
}

const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".git",
    "venv",
    ".venv",
    "dist",
    "build",
    "target",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "pyc", "pyo", "so", "dylib", "dll", "exe", "o", "a", "class", "jar", "wasm", "jpg", "jpeg",
    "png", "gif", "ico", "bmp", "webp", "svg", "pdf", "zip", "tar", "gz", "bz2", "xz", "7z",
    "db", "sqlite", "sqlite3", "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4", "wav", "avi",
    "mov", "lock",
];

/// Whether a repository-relative path is worth indexing.
///
/// Rejects hidden components, vendored or build directories and known
/// binary extensions.
#[must_use]
pub fn should_index_file(path: &Path) -> bool {
    for component in path.components() {
        let Component::Normal(name) = component else {
            continue;
        };
        let Some(name) = name.to_str() else {
            return false;
        };
        if name.starts_with('.') || EXCLUDED_DIRS.contains(&name) {
            return false;
        }
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => !BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => true,
    }
}

/// Whether a path is indexable and maps to a known language.
#[must_use]
pub fn is_indexable(path: &Path) -> bool {
    should_index_file(path) && detect_language(path).is_some()
}
