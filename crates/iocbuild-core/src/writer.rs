//! Artifact builders
//!
//! Generated files are assembled as line sequences and checked line by line
//! as they are produced. Nothing reaches the destination path until the
//! artifact is committed, and a failed write leaves no partial file behind.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};

/// Destination for generated lines
pub trait LineSink {
    fn line(&mut self, line: String) -> Result<()>;
}

impl LineSink for Vec<String> {
    fn line(&mut self, line: String) -> Result<()> {
        self.push(line);
        Ok(())
    }
}

/// Quote a string for dbd, db and startup script syntax
pub fn quote_c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// A generated file, built up line by line
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    lines: Vec<String>,
    max_line_length: Option<usize>,
    executable: bool,
    committed: bool,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: Vec::new(),
            max_line_length: None,
            executable: false,
            committed: false,
        }
    }

    /// Reject any line longer than `limit` as soon as it is added
    pub fn with_max_line_length(mut self, limit: Option<usize>) -> Self {
        self.max_line_length = limit;
        self
    }

    pub fn executable(mut self) -> Self {
        self.executable = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn blank(&mut self) -> Result<()> {
        self.push(String::new())
    }

    pub fn extend<I, S>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.push(line.into())?;
        }
        Ok(())
    }

    fn push(&mut self, line: String) -> Result<()> {
        if self.committed {
            return Err(BuildError::Sequencing(format!(
                "line added to {} after it was written",
                self.path.display()
            )));
        }
        for piece in line.split('\n') {
            if let Some(limit) = self.max_line_length {
                let length = piece.chars().count();
                if length > limit {
                    return Err(BuildError::LineLengthExceeded {
                        path: self.path.clone(),
                        line_number: self.lines.len() + 1,
                        length,
                        limit,
                        line: piece.to_string(),
                    });
                }
            }
            self.lines.push(piece.to_string());
        }
        Ok(())
    }

    /// Write the artifact to its destination, replacing any existing file
    pub fn commit(&mut self) -> Result<PathBuf> {
        self.write(None)
    }

    /// Write the artifact after the current contents of its destination.
    ///
    /// A destination that already ends with these lines is left as it is.
    pub fn commit_appending(&mut self) -> Result<PathBuf> {
        let existing = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(BuildError::io(&self.path)(e)),
        };
        let text: String = self.lines.iter().map(|line| format!("{}\n", line)).collect();
        if !text.is_empty() && existing.ends_with(text.as_bytes()) {
            if self.committed {
                return Err(BuildError::Sequencing(format!(
                    "{} written twice",
                    self.path.display()
                )));
            }
            self.committed = true;
            debug!(path = %self.path.display(), "Lines already present, not appending");
            return Ok(self.path.clone());
        }
        self.write(Some(existing))
    }

    fn write(&mut self, prefix: Option<Vec<u8>>) -> Result<PathBuf> {
        if self.committed {
            return Err(BuildError::Sequencing(format!(
                "{} written twice",
                self.path.display()
            )));
        }
        self.committed = true;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        // The temporary file is removed on drop unless persisted
        let mut file = NamedTempFile::new_in(dir).map_err(BuildError::io(dir))?;
        write_lines(file.as_file_mut(), prefix.as_deref(), &self.lines)
            .map_err(BuildError::io(&self.path))?;
        file.persist(&self.path)
            .map_err(|e| BuildError::io(&self.path)(e.error))?;
        set_mode(&self.path, self.executable)?;

        info!(path = %self.path.display(), lines = self.lines.len(), "Wrote artifact");
        Ok(self.path.clone())
    }
}

fn write_lines(file: &mut fs::File, prefix: Option<&[u8]>, lines: &[String]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(file);
    if let Some(prefix) = prefix {
        writer.write_all(prefix)?;
    }
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()
}

impl LineSink for Artifact {
    fn line(&mut self, line: String) -> Result<()> {
        self.push(line)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(BuildError::io(path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}

/// Header block warning that a file is generated
#[derive(Debug, Clone)]
pub struct Disclaimer {
    source: String,
    timestamp: Option<String>,
}

impl Disclaimer {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timestamp: None,
        }
    }

    /// Disclaimer for a run; the generation time is only included on request
    /// so that repeated runs produce identical files
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            source: config.source.clone(),
            timestamp: config
                .timestamp
                .then(|| chrono::Utc::now().format("%a %b %e %H:%M:%S %Y").to_string()),
        }
    }

    fn message(&self) -> [String; 4] {
        let generated = match &self.timestamp {
            Some(ts) => format!("This file was automatically generated on {} from", ts),
            None => "This file was automatically generated from".to_string(),
        };
        [
            generated,
            format!("source: {}", self.source),
            String::new(),
            "*** Please do not edit this file: edit the source file instead. ***".to_string(),
        ]
    }

    /// Disclaimer as shell and makefile comments
    pub fn script(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .message()
            .iter()
            .map(|l| format!("# {}", l).trim_end().to_string())
            .collect();
        lines.push("#".to_string());
        lines
    }

    /// Disclaimer as a C comment block
    pub fn c(&self) -> Vec<String> {
        let message = self.message();
        let mut lines = Vec::with_capacity(message.len() + 1);
        for (i, l) in message.iter().enumerate() {
            let lead = if i == 0 { "/*" } else { " *" };
            lines.push(format!("{} {}", lead, l).trim_end().to_string());
        }
        lines.push(" */".to_string());
        lines
    }
}

/// A makefile under the IOC tree: header, body, footer, then rules
#[derive(Debug, Clone)]
pub struct Makefile {
    dir: PathBuf,
    name: String,
    header: Vec<String>,
    lines: Vec<String>,
    footer: Vec<String>,
    rules: Vec<String>,
}

impl Makefile {
    /// Makefile in `dir`, relative to the IOC root
    pub fn new(dir: impl Into<PathBuf>, header: Vec<String>, footer: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            name: "Makefile".to_string(),
            header,
            lines: Vec::new(),
            footer,
            rules: Vec::new(),
        }
    }

    /// Standard makefile two levels below the top
    pub fn nested(dir: impl Into<PathBuf>) -> Self {
        Self::new(
            dir,
            vec!["TOP = ../..".into(), "include $(TOP)/configure/CONFIG".into()],
            vec!["include $(TOP)/configure/RULES".into()],
        )
    }

    /// Write under a file name other than `Makefile`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn add_line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn add_rule(&mut self, rule: impl Into<String>) {
        self.rules.push(rule.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn generate(&self, root: &Path, disclaimer: &Disclaimer) -> Result<PathBuf> {
        let mut artifact = Artifact::new(root.join(&self.dir).join(&self.name));
        artifact.extend(disclaimer.script())?;
        artifact.extend(self.header.iter().cloned())?;
        artifact.blank()?;
        artifact.extend(self.lines.iter().cloned())?;
        artifact.blank()?;
        artifact.extend(self.footer.iter().cloned())?;
        if !self.rules.is_empty() {
            artifact.blank()?;
            artifact.extend(self.rules.iter().cloned())?;
        }
        artifact.commit()
    }
}

/// Files registered for the IOC's data directory
#[derive(Debug, Default)]
pub struct DataDirectory {
    files: Vec<(String, PathBuf)>,
    finalised: bool,
}

impl DataDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` for copying, named `name` or its own file name
    pub fn add(&mut self, source: &Path, name: Option<&str>) -> Result<()> {
        if self.finalised {
            return Err(BuildError::Sequencing(format!(
                "data file {} registered after the data directory was written",
                source.display()
            )));
        }

        let name = match name {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| BuildError::NamingConflict {
                    name: source.display().to_string(),
                    reason: "data file has no file name".into(),
                })?,
        };
        if name.is_empty() || name.contains('/') {
            return Err(BuildError::NamingConflict {
                name,
                reason: "data file names may not contain '/'".into(),
            });
        }

        match self.files.iter().find(|(existing, _)| *existing == name) {
            Some((_, existing)) if existing == source => Ok(()),
            Some((_, existing)) => Err(BuildError::NamingConflict {
                reason: format!(
                    "already registered from {}, cannot also use {}",
                    existing.display(),
                    source.display()
                ),
                name,
            }),
            None => {
                debug!(name = %name, source = %source.display(), "Registered data file");
                self.files.push((name, source.to_path_buf()));
                Ok(())
            }
        }
    }

    pub fn files(&self) -> &[(String, PathBuf)] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Copy every registered file into `dir`; no files may be added after
    pub fn copy_to(&mut self, dir: &Path) -> Result<Vec<PathBuf>> {
        if self.finalised {
            return Err(BuildError::Sequencing("data directory written twice".into()));
        }
        self.finalised = true;

        let mut written = Vec::with_capacity(self.files.len());
        if self.files.is_empty() {
            return Ok(written);
        }
        fs::create_dir_all(dir).map_err(BuildError::io(dir))?;
        for (name, source) in &self.files {
            let target = dir.join(name);
            fs::copy(source, &target).map_err(BuildError::io(source))?;
            written.push(target);
        }
        info!(dir = %dir.display(), files = written.len(), "Copied data files");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_quote() {
        assert_eq!(quote_c_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }

    #[test]
    fn test_line_limit_reported_at_offending_line() {
        let mut artifact = Artifact::new("st.cmd").with_max_line_length(Some(10));
        artifact.extend(["short", "also ok"]).unwrap();

        let err = artifact.line("x".repeat(11)).unwrap_err();
        match err {
            BuildError::LineLengthExceeded {
                line_number,
                length,
                limit,
                ..
            } => {
                assert_eq!(line_number, 3);
                assert_eq!(length, 11);
                assert_eq!(limit, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(artifact.lines().len(), 2);
    }

    #[test]
    fn test_commit_and_sequencing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.txt");
        let mut artifact = Artifact::new(&path);
        artifact.extend(["one", "two"]).unwrap();
        artifact.commit().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
        assert_eq!(artifact.blank().unwrap_err().kind(), ErrorKind::Sequencing);
        assert_eq!(artifact.commit().unwrap_err().kind(), ErrorKind::Sequencing);
    }

    #[test]
    fn test_commit_appending() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("CONFIG");
        fs::write(&path, "existing\n").unwrap();

        let mut artifact = Artifact::new(&path);
        artifact.line("appended".into()).unwrap();
        artifact.commit_appending().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "existing\nappended\n");
    }

    #[test]
    fn test_commit_appending_skips_lines_already_present() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("CONFIG");
        fs::write(&path, "existing\n").unwrap();

        for _ in 0..2 {
            let mut artifact = Artifact::new(&path);
            artifact.extend(["A = 1", "B = 2"]).unwrap();
            assert_eq!(artifact.commit_appending().unwrap(), path);
            assert!(artifact.commit_appending().is_err());
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "existing\nA = 1\nB = 2\n");

        let mut changed = Artifact::new(&path);
        changed.line("B = 3".into()).unwrap();
        changed.commit_appending().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "existing\nA = 1\nB = 2\nB = 3\n");
    }

    #[test]
    fn test_failed_commit_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing_dir").join("file");
        let mut artifact = Artifact::new(&path);
        artifact.line("x".into()).unwrap();
        assert!(artifact.commit().is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_disclaimer() {
        let d = Disclaimer::new("ioc.toml");
        let script = d.script();
        assert_eq!(script[0], "# This file was automatically generated from");
        assert_eq!(script[1], "# source: ioc.toml");
        assert_eq!(script[2], "#");
        assert_eq!(script.last().map(String::as_str), Some("#"));

        let c = d.c();
        assert!(c[0].starts_with("/* "));
        assert_eq!(c.last().map(String::as_str), Some(" */"));
    }

    #[test]
    fn test_makefile_layout() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("fooApp/src")).unwrap();
        let mut makefile = Makefile::nested("fooApp/src");
        makefile.add_line("PROD_IOC = foo");
        makefile.add_rule("envPaths: ;");
        let path = makefile.generate(temp.path(), &Disclaimer::new("t")).unwrap();

        let text = fs::read_to_string(path).unwrap();
        let body: Vec<&str> = text.lines().skip_while(|l| l.starts_with('#')).collect();
        assert_eq!(
            body,
            vec![
                "TOP = ../..",
                "include $(TOP)/configure/CONFIG",
                "",
                "PROD_IOC = foo",
                "",
                "include $(TOP)/configure/RULES",
                "",
                "envPaths: ;",
            ]
        );
    }

    #[test]
    fn test_data_directory() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("psu.proto");
        fs::write(&src, "Terminator = CR;\n").unwrap();
        let other = temp.path().join("other");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("psu.proto"), "x").unwrap();

        let mut data = DataDirectory::new();
        data.add(&src, None).unwrap();
        data.add(&src, None).unwrap();
        assert_eq!(
            data.add(&other.join("psu.proto"), None).unwrap_err().kind(),
            ErrorKind::NamingConflict
        );
        assert_eq!(
            data.add(&src, Some("a/b")).unwrap_err().kind(),
            ErrorKind::NamingConflict
        );

        let out = temp.path().join("data");
        let written = data.copy_to(&out).unwrap();
        assert_eq!(written, vec![out.join("psu.proto")]);
        assert_eq!(
            data.add(&src, Some("late")).unwrap_err().kind(),
            ErrorKind::Sequencing
        );
    }
}
