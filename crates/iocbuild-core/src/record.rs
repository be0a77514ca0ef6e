//! Records, record factories and the per-run record set

use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::device::DeviceInstance;
use crate::error::{BuildError, Result};
use crate::module::ModuleRegistry;
use crate::template;
use crate::writer::quote_c_string;

/// Field values keyed by field name, in the order they were given
pub type Fields = IndexMap<String, String>;

/// Builds a record from a name and its field values
pub type RecordConstructor = Arc<dyn Fn(&str, Fields) -> Result<Record> + Send + Sync>;

/// Renders an address from the record's fields and extra positional arguments.
/// The renderer may consume fields it folds into the address.
pub type AddressRenderer = Arc<dyn Fn(&mut Fields, &[String]) -> Result<String> + Send + Sync>;

/// Adjusts a record after its hardware link has been stamped
pub type RecordFixup = Arc<dyn Fn(&mut Record) -> Result<()> + Send + Sync>;

/// A database record with fields in insertion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    record_type: String,
    name: String,
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new(record_type: impl Into<String>, name: impl Into<String>, fields: Fields) -> Self {
        Self {
            record_type: record_type.into(),
            name: name.into(),
            fields: fields.into_iter().collect(),
        }
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set a field, keeping its original position if already present
    pub fn set_field(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(f, v)| (f.as_str(), v.as_str()))
    }

    fn print(&self, out: &mut Vec<String>) {
        out.push(format!(
            "record({}, {})",
            self.record_type,
            quote_c_string(&self.name)
        ));
        out.push("{".to_string());
        for (field, value) in &self.fields {
            out.push(format!("    field({}, {})", field, quote_c_string(value)));
        }
        out.push("}".to_string());
    }
}

/// Address written into a record's hardware link
#[derive(Clone)]
pub enum Address {
    /// Used as-is; positional arguments are an error
    Fixed(String),
    /// Rendered from the record's fields and positional arguments
    Computed(AddressRenderer),
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Fixed(address) => f.debug_tuple("Fixed").field(address).finish(),
            Address::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Serialized record factory, attached to a device class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFactoryDef {
    /// Factory name, defaults to the record type
    #[serde(default)]
    pub name: Option<String>,
    /// Record type to construct, e.g. `ai`
    pub record: String,
    /// Link field receiving the address, e.g. `INP`
    pub link: String,
    /// Value stamped into DTYP
    pub dtyp: String,
    /// Address template
    pub address: String,
    /// Fields set after the link has been stamped
    #[serde(default)]
    pub fields: Fields,
}

impl RecordFactoryDef {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.record)
    }

    pub(crate) fn validate(&self, context: &str) -> Result<()> {
        if self.record.is_empty() || self.link.is_empty() {
            return Err(BuildError::Description(format!(
                "record factory {} in {} needs a record type and link field",
                self.name(),
                context
            )));
        }
        template::render(&self.address, context, |_| Some(String::new()))?;
        Ok(())
    }
}

fn is_address_key(key: &str) -> bool {
    key.parse::<usize>().is_ok() || key.starts_with("field:")
}

/// Stamps hardware bindings onto records
#[derive(Clone)]
pub struct RecordFactory {
    constructor: RecordConstructor,
    device_type: String,
    link: String,
    address: Address,
    post: Option<RecordFixup>,
}

impl fmt::Debug for RecordFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordFactory")
            .field("device_type", &self.device_type)
            .field("link", &self.link)
            .field("address", &self.address)
            .field("post", &self.post.is_some())
            .finish()
    }
}

impl RecordFactory {
    pub fn new(
        constructor: RecordConstructor,
        device_type: impl Into<String>,
        link: impl Into<String>,
        address: Address,
    ) -> Self {
        Self {
            constructor,
            device_type: device_type.into(),
            link: link.into(),
            address,
            post: None,
        }
    }

    /// Factory constructing plain records of one type
    pub fn for_type(
        record_type: impl Into<String>,
        device_type: impl Into<String>,
        link: impl Into<String>,
        address: Address,
    ) -> Self {
        let record_type = record_type.into();
        let constructor: RecordConstructor =
            Arc::new(move |name: &str, fields: Fields| {
                Ok(Record::new(record_type.clone(), name, fields))
            });
        Self::new(constructor, device_type, link, address)
    }

    pub fn with_post<F>(mut self, fixup: F) -> Self
    where
        F: Fn(&mut Record) -> Result<()> + Send + Sync + 'static,
    {
        self.post = Some(Arc::new(fixup));
        self
    }

    /// Bind a factory definition to a device instance.
    ///
    /// Instance placeholders are resolved here; an address with no
    /// positional or `field:` placeholders becomes fixed.
    pub fn from_def(def: &RecordFactoryDef, instance: &DeviceInstance) -> Result<Self> {
        let context = format!("record factory {} of {}", def.name(), instance.name());
        let computed = template::placeholders(&def.address, &context)?
            .iter()
            .any(|key| is_address_key(key));

        let address = if computed {
            let pattern = def.address.clone();
            let instance = instance.clone();
            Address::Computed(Arc::new(move |fields: &mut Fields, args: &[String]| {
                template::render(&pattern, &context, |key| {
                    if let Ok(index) = key.parse::<usize>() {
                        return args.get(index).cloned();
                    }
                    match key.strip_prefix("field:") {
                        Some(field) => fields.shift_remove(field),
                        None => instance.lookup(key),
                    }
                })
            }))
        } else {
            Address::Fixed(template::render(&def.address, &context, |key| {
                instance.lookup(key)
            })?)
        };

        let mut factory = Self::for_type(&def.record, &def.dtyp, &def.link, address);
        if !def.fields.is_empty() {
            let fixups = def.fields.clone();
            factory = factory.with_post(move |record| {
                for (field, value) in &fixups {
                    record.set_field(field, value);
                }
                Ok(())
            });
        }
        Ok(factory)
    }

    /// Create a record with this factory's hardware binding
    pub fn create(&self, name: &str, address_args: &[String], mut fields: Fields) -> Result<Record> {
        let address = match &self.address {
            Address::Computed(render) => render(&mut fields, address_args)?,
            Address::Fixed(address) => {
                if !address_args.is_empty() {
                    return Err(BuildError::UnusedArgument {
                        record: name.to_string(),
                    });
                }
                address.clone()
            }
        };

        let mut record = (self.constructor)(name, fields)?;
        record.set_field("DTYP", self.device_type.as_str());
        record.set_field(self.link.as_str(), address);
        if let Some(post) = &self.post {
            post(&mut record)?;
        }
        Ok(record)
    }
}

/// Substitution of a database template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Substitution {
    /// Template file, under the module's `db` directory when a module is named
    pub template: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl Substitution {
    fn template_path(&self, modules: &ModuleRegistry) -> Result<String> {
        match &self.module {
            Some(module) => Ok(format!(
                "$({})/db/{}",
                modules.get(module)?.macro_name(),
                self.template
            )),
            None => Ok(self.template.clone()),
        }
    }
}

/// Records and substitutions accumulated for one generation
#[derive(Debug, Default)]
pub struct RecordSet {
    records: Vec<Record>,
    names: HashSet<String>,
    substitutions: Vec<Substitution>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; record names are unique within the set
    pub fn add_record(&mut self, record: Record) -> Result<()> {
        if !self.names.insert(record.name.clone()) {
            return Err(BuildError::NamingConflict {
                name: record.name,
                reason: "record already defined".into(),
            });
        }
        debug!(record = %record.name, record_type = %record.record_type, "Added record");
        self.records.push(record);
        Ok(())
    }

    pub fn add_substitution(&mut self, substitution: Substitution) {
        self.substitutions.push(substitution);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn substitutions(&self) -> &[Substitution] {
        &self.substitutions
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.substitutions.is_empty()
    }

    /// Database text for every record, in creation order
    pub fn record_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                out.push(String::new());
            }
            record.print(&mut out);
        }
        out
    }

    /// Substitution file text, one `file` block per template in order of
    /// first use
    pub fn substitution_lines(&self, modules: &ModuleRegistry) -> Result<Vec<String>> {
        let mut groups: Vec<(String, Vec<&Substitution>)> = Vec::new();
        for substitution in &self.substitutions {
            let path = substitution.template_path(modules)?;
            match groups.iter_mut().find(|(p, _)| *p == path) {
                Some((_, members)) => members.push(substitution),
                None => groups.push((path, vec![substitution])),
            }
        }

        let mut out = Vec::new();
        for (i, (path, members)) in groups.iter().enumerate() {
            if i > 0 {
                out.push(String::new());
            }
            let keys: BTreeSet<&str> = members
                .iter()
                .flat_map(|s| s.args.keys().map(String::as_str))
                .collect();
            out.push(format!("file {}", quote_c_string(path)));
            out.push("{".to_string());
            out.push(format!(
                "pattern {{ {} }}",
                keys.iter().copied().collect::<Vec<_>>().join(", ")
            ));
            for member in members {
                let values: Vec<String> = keys
                    .iter()
                    .map(|k| quote_c_string(member.args.get(*k).map(String::as_str).unwrap_or("")))
                    .collect();
                out.push(format!("    {{ {} }}", values.join(", ")));
            }
            out.push("}".to_string());
        }
        Ok(out)
    }

    /// Forget everything, ready for the next generation
    pub fn reset(&mut self) {
        self.records.clear();
        self.names.clear();
        self.substitutions.clear();
    }
}
