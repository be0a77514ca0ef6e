//! Database definition table
//!
//! Reads `recordtype` definitions from the dbd files registered by loaded
//! device classes and answers which fields each record type has. Records of
//! a type that was never loaded are not checked.
//!
//! An `include` inside a record type body contributes its fields to that
//! record type, which is how most record types pick up `dbCommon.dbd`.
//! Included files are looked up next to the including file first, then in
//! the table's search directories (usually `<EPICS base>/dbd`).

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{BuildError, Result};
use crate::record::Record;

/// Receives dbd files as device classes are added to the load order
pub trait DbdLoader {
    fn load_dbd(&mut self, dir: &Path, file: &str) -> Result<()>;
}

/// An `include` directive and the record type body it appeared in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbdInclude {
    pub file: String,
    pub record_type: Option<String>,
}

/// Record type and field definitions merged from loaded dbd files
#[derive(Debug, Default, Clone)]
pub struct DbdTable {
    record_types: BTreeMap<String, BTreeSet<String>>,
    search_dirs: Vec<PathBuf>,
    /// Files already read, keyed by the record type they were read into
    loaded: HashSet<(PathBuf, Option<String>)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Open,
    Close,
    BraceOpen,
    BraceClose,
    Comma,
}

impl DbdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also resolve includes from `dir` when the including file's directory lacks them
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Merge definitions from dbd text, returning the files it includes
    pub fn parse(&mut self, text: &str) -> Vec<DbdInclude> {
        self.parse_within(text, None)
    }

    /// Parse text whose top level sits inside the body of `enclosing`
    fn parse_within(&mut self, text: &str, enclosing: Option<&str>) -> Vec<DbdInclude> {
        let tokens = tokenize(text);
        let mut includes = Vec::new();
        // One entry per open brace: the record type it is the body of, if any
        let mut blocks: Vec<Option<String>> = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            let scope = match blocks.last() {
                Some(block) => block.clone(),
                None => enclosing.map(str::to_string),
            };
            match &tokens[i] {
                Token::Word(word) if word == "include" => {
                    if let Some(Token::Str(file) | Token::Word(file)) = tokens.get(i + 1) {
                        includes.push(DbdInclude {
                            file: file.clone(),
                            record_type: scope,
                        });
                        i += 1;
                    }
                }
                Token::Word(word) if tokens.get(i + 1) == Some(&Token::Open) => {
                    let (arg, close) = first_arg(&tokens, i + 1);
                    match (word.as_str(), &arg) {
                        ("recordtype", Some(name)) => {
                            self.record_types.entry(name.clone()).or_default();
                        }
                        ("field", Some(field)) => {
                            if let Some(record_type) = &scope {
                                self.record_types
                                    .entry(record_type.clone())
                                    .or_default()
                                    .insert(field.clone());
                            }
                        }
                        _ => {}
                    }
                    i = close;
                    if tokens.get(i + 1) == Some(&Token::BraceOpen) {
                        blocks.push(if word == "recordtype" { arg } else { None });
                        i += 1;
                    }
                }
                Token::BraceOpen => blocks.push(None),
                Token::BraceClose => {
                    blocks.pop();
                }
                _ => {}
            }
            i += 1;
        }
        includes
    }

    fn resolve(&self, dir: &Path, file: &str) -> Option<PathBuf> {
        std::iter::once(dir)
            .chain(self.search_dirs.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(file))
            .find(|path| path.is_file())
    }

    fn load_file(&mut self, path: PathBuf, enclosing: Option<&str>) -> Result<()> {
        if !self.loaded.insert((path.clone(), enclosing.map(str::to_string))) {
            return Ok(());
        }
        let text = std::fs::read_to_string(&path).map_err(BuildError::io(&path))?;
        debug!(path = %path.display(), within = ?enclosing, "Loading dbd file");

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for include in self.parse_within(&text, enclosing) {
            match self.resolve(&dir, &include.file) {
                Some(found) => self.load_file(found, include.record_type.as_deref())?,
                None => {
                    warn!(file = %include.file, from = %path.display(), "Included dbd file not found, skipping")
                }
            }
        }
        Ok(())
    }

    pub fn has_record_type(&self, record_type: &str) -> bool {
        self.record_types.contains_key(record_type)
    }

    /// Fields of a record type, if it is known
    pub fn record_type(&self, record_type: &str) -> Option<&BTreeSet<String>> {
        self.record_types.get(record_type)
    }

    pub fn has_field(&self, record_type: &str, field: &str) -> bool {
        self.record_types
            .get(record_type)
            .is_some_and(|fields| fields.contains(field))
    }

    /// Check each field of a record whose type is known
    pub fn validate(&self, record: &Record) -> Result<()> {
        let Some(fields) = self.record_types.get(record.record_type()) else {
            return Ok(());
        };
        for (field, _) in record.fields() {
            if !fields.contains(field) {
                return Err(BuildError::UnknownField {
                    record: record.name().to_string(),
                    record_type: record.record_type().to_string(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl DbdLoader for DbdTable {
    fn load_dbd(&mut self, dir: &Path, file: &str) -> Result<()> {
        self.load_file(dir.join(file), None)
    }
}

/// First argument of the parenthesised list opening at `open`, and the index of its `)`
fn first_arg(tokens: &[Token], open: usize) -> (Option<String>, usize) {
    let mut arg = None;
    let mut i = open + 1;
    while let Some(token) = tokens.get(i) {
        match token {
            Token::Close => return (arg, i),
            Token::Word(text) | Token::Str(text) if arg.is_none() => arg = Some(text.clone()),
            _ => {}
        }
        i += 1;
    }
    (arg, i)
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            // Comments and `%` code lines run to the end of the line
            '#' | '%' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '"' => {
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => value.extend(chars.next()),
                        c => value.push(c),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '{' => tokens.push(Token::BraceOpen),
            '}' => tokens.push(Token::BraceClose),
            ',' => tokens.push(Token::Comma),
            c => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || "(){},\"#".contains(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Fields;
    use tempfile::TempDir;

    const AI_DBD: &str = r#"
# analog input
menu(menuScan) {
    choice(menuScanPassive, "Passive")
}
recordtype(ai) {
    include "dbCommon.dbd"
    field(VAL, DBF_DOUBLE) {
        prompt("Current EGU Value")
        asl(ASL0)
    }
    field(INP,DBF_INLINK) {
        prompt("Input Specification")
    }
    field(DTYP, DBF_DEVICE) {
    }
}
device(ai, INST_IO, devAiStream, "stream")
"#;

    const DB_COMMON: &str = r#"
    field(NAME, DBF_STRING) {
        prompt("Record Name")
        size(61)
    }
    field(SCAN, DBF_MENU) {
        menu(menuScan)
    }
"#;

    #[test]
    fn test_parse_record_types() {
        let mut table = DbdTable::new();
        let includes = table.parse(AI_DBD);

        assert!(table.has_record_type("ai"));
        assert!(!table.has_record_type("menuScan"));
        assert!(table.has_field("ai", "VAL"));
        assert!(table.has_field("ai", "INP"));
        assert!(!table.has_field("ai", "prompt"));
        assert_eq!(table.record_type("ai").map(|f| f.len()), Some(3));
        assert_eq!(
            includes,
            vec![DbdInclude {
                file: "dbCommon.dbd".into(),
                record_type: Some("ai".into()),
            }]
        );
    }

    #[test]
    fn test_parse_single_line_forms() {
        let mut table = DbdTable::new();
        table.parse(
            "recordtype(bo) { field(OUT, DBF_OUTLINK) { prompt(\"Output (link)\") } field(VAL,DBF_ENUM){} }\n\
             recordtype(bi) { include \"dbCommon.dbd\" field(INP, DBF_INLINK) {} } # trailing\n",
        );

        assert!(table.has_field("bo", "OUT"));
        assert!(table.has_field("bo", "VAL"));
        assert!(table.has_field("bi", "INP"));
        assert!(!table.has_field("bo", "INP"));
        assert_eq!(table.record_type("bo").map(|f| f.len()), Some(2));
    }

    #[test]
    fn test_validate_known_types_only() {
        let mut table = DbdTable::new();
        table.parse(AI_DBD);

        let good = Record::new("ai", "A", Fields::from([("INP".to_string(), "@x".to_string())]));
        table.validate(&good).unwrap();

        let bad = Record::new("ai", "B", Fields::from([("NOPE".to_string(), "1".to_string())]));
        assert!(matches!(
            table.validate(&bad),
            Err(BuildError::UnknownField { ref field, .. }) if field == "NOPE"
        ));

        let unknown = Record::new("calc", "C", Fields::from([("ANY".to_string(), "1".to_string())]));
        table.validate(&unknown).unwrap();
    }

    #[test]
    fn test_load_with_include() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("top.dbd"), "include \"bo.dbd\"\ninclude \"missing.dbd\"\n").unwrap();
        std::fs::write(temp.path().join("bo.dbd"), "recordtype(bo) {\n    field(OUT, DBF_OUTLINK)\n}\n").unwrap();

        let mut table = DbdTable::new();
        table.load_dbd(temp.path(), "top.dbd").unwrap();
        assert!(table.has_field("bo", "OUT"));

        // Loading the same file twice is a no-op
        table.load_dbd(temp.path(), "top.dbd").unwrap();
    }

    #[test]
    fn test_include_inside_record_body_adds_fields() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("aiRecord.dbd"), AI_DBD).unwrap();
        std::fs::write(
            temp.path().join("boRecord.dbd"),
            "recordtype(bo) {\n    include \"dbCommon.dbd\"\n    field(OUT, DBF_OUTLINK)\n}\n",
        )
        .unwrap();
        std::fs::write(temp.path().join("dbCommon.dbd"), DB_COMMON).unwrap();

        let mut table = DbdTable::new();
        table.load_dbd(temp.path(), "aiRecord.dbd").unwrap();
        table.load_dbd(temp.path(), "boRecord.dbd").unwrap();

        for record_type in ["ai", "bo"] {
            assert!(table.has_field(record_type, "NAME"), "{record_type} lacks NAME");
            assert!(table.has_field(record_type, "SCAN"), "{record_type} lacks SCAN");
        }
        assert!(table.has_field("ai", "DTYP"));
        assert!(!table.has_field("bo", "INP"));

        let record = Record::new(
            "ai",
            "A",
            Fields::from([("SCAN".to_string(), "1 second".to_string()), ("INP".to_string(), "@x".to_string())]),
        );
        table.validate(&record).unwrap();
    }

    #[test]
    fn test_include_falls_back_to_search_dirs() {
        let temp = TempDir::new().unwrap();
        let support = temp.path().join("support/dbd");
        let base = temp.path().join("base/dbd");
        std::fs::create_dir_all(&support).unwrap();
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(
            support.join("devFoo.dbd"),
            "recordtype(ai) {\n    include \"dbCommon.dbd\"\n    field(INP, DBF_INLINK)\n}\n",
        )
        .unwrap();
        std::fs::write(base.join("dbCommon.dbd"), "field(DTYP, DBF_DEVICE)\n").unwrap();

        let mut without = DbdTable::new();
        without.load_dbd(&support, "devFoo.dbd").unwrap();
        assert!(!without.has_field("ai", "DTYP"));

        let mut table = DbdTable::new().with_search_dir(&base);
        table.load_dbd(&support, "devFoo.dbd").unwrap();
        assert!(table.has_field("ai", "DTYP"));
        assert!(table.has_field("ai", "INP"));
    }

    #[test]
    fn test_missing_file() {
        let mut table = DbdTable::new();
        assert!(matches!(
            table.load_dbd(Path::new("/no/such/dir"), "x.dbd"),
            Err(BuildError::Io { .. })
        ));
    }
}
