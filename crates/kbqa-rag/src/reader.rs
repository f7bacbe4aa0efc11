//! Directory reader turning files on disk into documents

use chrono::{DateTime, Local};
use pulldown_cmark::{Event, Parser, TagEnd};
use scraper::Html;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use kbqa_core::{Document, Error, Result};

/// Metadata keys kept out of embedding and prompt text; only `file_path` is rendered.
const EXCLUDED_METADATA_KEYS: [&str; 6] = [
    "file_name",
    "file_type",
    "file_size",
    "creation_date",
    "last_modified_date",
    "last_accessed_date",
];

/// Loads every readable file in a directory as one [`Document`] per file
#[derive(Debug, Clone)]
pub struct DirectoryReader {
    input_dir: PathBuf,
    recursive: bool,
    exclude_hidden: bool,
    required_exts: Option<Vec<String>>,
    num_files_limit: Option<usize>,
    filename_as_id: bool,
}

impl DirectoryReader {
    /// Create a reader for a directory
    pub fn new(input_dir: impl AsRef<Path>) -> Self {
        Self {
            input_dir: input_dir.as_ref().to_path_buf(),
            recursive: false,
            exclude_hidden: true,
            required_exts: None,
            num_files_limit: None,
            filename_as_id: false,
        }
    }

    /// Descend into subdirectories
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Skip files and directories whose name starts with a dot
    pub fn exclude_hidden(mut self, exclude_hidden: bool) -> Self {
        self.exclude_hidden = exclude_hidden;
        self
    }

    /// Only load files with one of these extensions (with or without the dot)
    pub fn required_exts<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.required_exts = Some(
            exts.into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        );
        self
    }

    /// Load at most this many files (after sorting by path)
    pub fn num_files_limit(mut self, limit: usize) -> Self {
        self.num_files_limit = Some(limit);
        self
    }

    /// Use the file path as the document id instead of a random UUID
    pub fn filename_as_id(mut self, filename_as_id: bool) -> Self {
        self.filename_as_id = filename_as_id;
        self
    }

    /// List the files that would be loaded
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        if !self.input_dir.exists() {
            return Err(Error::Reader(format!(
                "Directory {} does not exist",
                self.input_dir.display()
            )));
        }
        if !self.input_dir.is_dir() {
            return Err(Error::Reader(format!(
                "{} is not a directory",
                self.input_dir.display()
            )));
        }

        let mut files = Vec::new();
        self.collect_files(&self.input_dir, &mut files)?;
        files.sort();

        if let Some(limit) = self.num_files_limit {
            files.truncate(limit);
        }

        if files.is_empty() {
            return Err(Error::Reader(format!(
                "No files found in {}",
                self.input_dir.display()
            )));
        }

        Ok(files)
    }

    fn collect_files(&self, dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();

            if self.exclude_hidden && is_hidden(&path) {
                continue;
            }

            if path.is_dir() {
                if self.recursive {
                    self.collect_files(&path, files)?;
                }
                continue;
            }

            if let Some(exts) = &self.required_exts {
                let ext = extension_of(&path);
                if !exts.iter().any(|e| *e == ext) {
                    continue;
                }
            }

            files.push(path);
        }
        Ok(())
    }

    /// Read every listed file.
    ///
    /// Files that are not valid UTF-8 text are skipped with a warning.
    pub fn load_data(&self) -> Result<Vec<Document>> {
        let files = self.list_files()?;
        let mut documents = Vec::with_capacity(files.len());

        for path in &files {
            match self.load_file(path)? {
                Some(document) => documents.push(document),
                None => tracing::warn!("Skipping {}: not a UTF-8 text file", path.display()),
            }
        }

        if documents.is_empty() {
            return Err(Error::Reader(format!(
                "No readable files found in {}",
                self.input_dir.display()
            )));
        }

        tracing::info!(
            "Loaded {} documents from {}",
            documents.len(),
            self.input_dir.display()
        );
        Ok(documents)
    }

    fn load_file(&self, path: &Path) -> Result<Option<Document>> {
        let bytes = fs::read(path)?;
        let raw = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => return Ok(None),
        };
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

        let ext = extension_of(path);
        let text = match ext.as_str() {
            "md" | "markdown" => markdown_to_text(raw),
            "html" | "htm" => html_to_text(raw),
            _ => raw.to_string(),
        };

        let file_path = path.to_string_lossy().to_string();
        let id = if self.filename_as_id {
            file_path.clone()
        } else {
            uuid::Uuid::new_v4().to_string()
        };

        let meta = fs::metadata(path)?;
        let mut document = Document::new(id, text)
            .with_metadata("file_path", file_path)
            .with_metadata(
                "file_name",
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            )
            .with_metadata("file_type", mime_type(&ext))
            .with_metadata("file_size", meta.len());

        if let Ok(created) = meta.created() {
            document = document.with_metadata("creation_date", format_date(created));
        }
        if let Ok(modified) = meta.modified() {
            document = document.with_metadata("last_modified_date", format_date(modified));
        }

        let excluded: Vec<String> = EXCLUDED_METADATA_KEYS.iter().map(|k| k.to_string()).collect();
        document.excluded_embed_metadata_keys = excluded.clone();
        document.excluded_llm_metadata_keys = excluded;

        Ok(Some(document))
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn mime_type(ext: &str) -> &'static str {
    match ext {
        "txt" | "text" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        _ => "application/octet-stream",
    }
}

fn format_date(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format("%Y-%m-%d").to_string()
}

/// Render markdown as plain text, one blank line between blocks
fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::CodeBlock | TagEnd::TableRow) => {
                text.push_str("\n\n")
            }
            Event::End(TagEnd::Item) => text.push('\n'),
            _ => {}
        }
    }
    text.trim().to_string()
}

/// Extract visible text from an HTML page
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element())
            .map(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
            .unwrap_or(false);
        if hidden {
            continue;
        }

        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &[u8]) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_directory() {
        let err = DirectoryReader::new("/definitely/not/here").load_data().unwrap_err();
        assert!(matches!(err, Error::Reader(_)));
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let err = DirectoryReader::new(dir.path()).load_data().unwrap_err();
        assert!(err.to_string().contains("No files found"));
    }

    #[test]
    fn test_loads_files_with_metadata() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.txt", b"second file");
        write(dir.path(), "a.txt", b"first file");

        let docs = DirectoryReader::new(dir.path()).filename_as_id(true).load_data().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "first file");
        assert!(docs[0].id.ends_with("a.txt"));
        assert_eq!(docs[0].metadata["file_name"], "a.txt");
        assert_eq!(docs[0].metadata["file_type"], "text/plain");
        assert_eq!(docs[0].metadata["file_size"], 10);
        assert!(docs[0].excluded_llm_metadata_keys.contains(&"file_size".to_string()));
        assert!(!docs[0].excluded_embed_metadata_keys.contains(&"file_path".to_string()));
    }

    #[test]
    fn test_hidden_and_recursive() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".secret.txt", b"hidden");
        write(dir.path(), "top.txt", b"top");
        write(dir.path(), "nested/inner.txt", b"inner");

        let flat = DirectoryReader::new(dir.path()).list_files().unwrap();
        assert_eq!(flat.len(), 1);

        let deep = DirectoryReader::new(dir.path()).recursive(true).list_files().unwrap();
        assert_eq!(deep.len(), 2);

        let all = DirectoryReader::new(dir.path()).exclude_hidden(false).list_files().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_required_exts_and_limit() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", b"# A");
        write(dir.path(), "b.txt", b"b");
        write(dir.path(), "c.MD", b"# C");

        let files = DirectoryReader::new(dir.path()).required_exts([".md"]).list_files().unwrap();
        assert_eq!(files.len(), 2);

        let files = DirectoryReader::new(dir.path()).num_files_limit(1).list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.md"));
    }

    #[test]
    fn test_skips_binary_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "image.png", &[0x89, 0x50, 0x4e, 0x47, 0xff, 0xfe]);
        write(dir.path(), "notes.txt", b"plain notes");

        let docs = DirectoryReader::new(dir.path()).load_data().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "plain notes");

        let dir = TempDir::new().unwrap();
        write(dir.path(), "only.bin", &[0xff, 0xfe, 0xfd]);
        assert!(DirectoryReader::new(dir.path()).load_data().is_err());
    }

    #[test]
    fn test_markdown_to_text() {
        let text = markdown_to_text("# Tools\n\nDownload the **VPN** client.\n\n- item one\n- item two\n");
        assert_eq!(text, "Tools\n\nDownload the VPN client.\n\nitem one\nitem two");
    }

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><style>p { color: red }</style><title>Help</title></head>
            <body><h1>IT Desk</h1><p>Call 1234.</p><script>var x = 1;</script></body></html>"#;
        assert_eq!(html_to_text(html), "Help\nIT Desk\nCall 1234.");
    }
}
