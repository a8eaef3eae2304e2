//! Hierarchical configuration tree as exchanged with the UCI daemon.
//!
//! The store is an ordered forest: named [`Config`]s hold [`Section`]s (named
//! or anonymous, tagged with a section type) which hold [`UciOption`]s. Paths
//! are dotted, `config.section.option`, and a section may also be selected
//! UCI style by type and position, e.g. `network.@interface[-1]`.
//!
//! Trees come in two flavours that are never mixed up: a [`QueryResult`] is
//! what the store returned and can only be read, an [`EditTransaction`] is
//! built locally and can only be submitted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value of a single option: a scalar or a list.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(value) => Some(value),
            Value::List(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Scalar(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Scalar(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Scalar(value.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(values: Vec<String>) -> Self {
        Value::List(values)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UciOption {
    pub name: String,
    pub value: Value,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    options: Vec<UciOption>,
}

impl Section {
    pub fn named(name: &str, kind: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            kind: kind.to_string(),
            options: Vec::new(),
        }
    }

    pub fn anonymous(kind: &str) -> Self {
        Self {
            name: None,
            kind: kind.to_string(),
            options: Vec::new(),
        }
    }

    pub fn options(&self) -> &[UciOption] {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&UciOption> {
        self.options.iter().find(|option| option.name == name)
    }

    /// Set an option, replacing an existing one of the same name in place.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        match self.options.iter_mut().find(|option| option.name == name) {
            Some(option) => option.value = value,
            None => self.options.push(UciOption {
                name: name.to_string(),
                value,
            }),
        }
        self
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    pub name: String,
    #[serde(default)]
    sections: Vec<Section>,
}

impl Config {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sections: Vec::new(),
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Look up a section by name or by `@type[index]` selector.
    pub fn section(&self, selector: &str) -> Option<&Section> {
        match parse_type_selector(selector) {
            Some((kind, index)) => {
                let matching: Vec<&Section> =
                    self.sections.iter().filter(|s| s.kind == kind).collect();
                let position = if index < 0 {
                    matching.len().checked_sub(index.unsigned_abs() as usize)?
                } else {
                    index as usize
                };
                matching.get(position).copied()
            }
            None => self
                .sections
                .iter()
                .find(|s| s.name.as_deref() == Some(selector)),
        }
    }

    /// Get the named section, creating it with `kind` if it does not exist.
    ///
    /// An existing section keeps its type.
    pub fn section_entry(&mut self, name: &str, kind: &str) -> &mut Section {
        let position = match self
            .sections
            .iter()
            .position(|s| s.name.as_deref() == Some(name))
        {
            Some(position) => position,
            None => {
                self.sections.push(Section::named(name, kind));
                self.sections.len() - 1
            }
        };
        &mut self.sections[position]
    }

    /// Append a section. A named section replaces any section of that name.
    pub fn add_section(&mut self, section: Section) -> &mut Section {
        let existing = section.name.as_deref().and_then(|name| {
            self.sections
                .iter()
                .position(|s| s.name.as_deref() == Some(name))
        });
        if let Some(position) = existing {
            self.sections[position] = section;
            return &mut self.sections[position];
        }
        self.sections.push(section);
        let last = self.sections.len() - 1;
        &mut self.sections[last]
    }
}

/// Node addressed by a dotted path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Node<'a> {
    Config(&'a Config),
    Section(&'a Section),
    Option(&'a UciOption),
}

#[derive(Debug, Error, PartialEq)]
pub enum TreeError {
    #[error("duplicate config '{0}'")]
    DuplicateConfig(String),
    #[error("duplicate section '{section}' in config '{config}'")]
    DuplicateSection { config: String, section: String },
    #[error("duplicate option '{option}' in section '{section}' of config '{config}'")]
    DuplicateOption {
        config: String,
        section: String,
        option: String,
    },
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ConfigTree {
    #[serde(default)]
    configs: Vec<Config>,
}

impl ConfigTree {
    pub fn configs(&self) -> &[Config] {
        &self.configs
    }

    pub fn config(&self, name: &str) -> Option<&Config> {
        self.configs.iter().find(|c| c.name == name)
    }

    /// Get the named config, creating an empty one if it does not exist.
    pub fn config_entry(&mut self, name: &str) -> &mut Config {
        let position = match self.configs.iter().position(|c| c.name == name) {
            Some(position) => position,
            None => {
                self.configs.push(Config::new(name));
                self.configs.len() - 1
            }
        };
        &mut self.configs[position]
    }

    /// Copy of the tree restricted to the configs accepted by `keep`.
    pub fn selected(&self, keep: impl Fn(&str) -> bool) -> ConfigTree {
        ConfigTree {
            configs: self
                .configs
                .iter()
                .filter(|c| keep(&c.name))
                .cloned()
                .collect(),
        }
    }

    /// Overlay `other` onto this tree. Options of named sections are set
    /// individually, anonymous sections are appended.
    pub fn merge(&mut self, other: ConfigTree) {
        for config in other.configs {
            let target = self.config_entry(&config.name);
            for section in config.sections {
                match section.name.as_deref() {
                    Some(name) => {
                        let entry = target.section_entry(name, &section.kind);
                        for option in section.options {
                            entry.set(&option.name, option.value);
                        }
                    }
                    None => {
                        target.add_section(section);
                    }
                }
            }
        }
    }

    /// Resolve a dotted path. Missing nodes and malformed paths are `None`.
    pub fn find(&self, path: &str) -> Option<Node<'_>> {
        let mut parts = path.split('.');
        let config = self.config(parts.next().filter(|p| !p.is_empty())?)?;

        let Some(section) = parts.next() else {
            return Some(Node::Config(config));
        };
        let section = config.section(section)?;

        let Some(option) = parts.next() else {
            return Some(Node::Section(section));
        };
        if parts.next().is_some() {
            return None;
        }

        section.option(option).map(Node::Option)
    }

    pub fn find_option(&self, path: &str) -> Option<&UciOption> {
        match self.find(path)? {
            Node::Option(option) => Some(option),
            _ => None,
        }
    }

    /// Check the uniqueness invariants of a tree received from elsewhere.
    pub fn validate(&self) -> Result<(), TreeError> {
        for (i, config) in self.configs.iter().enumerate() {
            if self.configs[..i].iter().any(|c| c.name == config.name) {
                return Err(TreeError::DuplicateConfig(config.name.clone()));
            }

            for (j, section) in config.sections.iter().enumerate() {
                let section_label = section
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("@{}[{j}]", section.kind));

                let duplicate = section.name.as_deref().is_some_and(|name| {
                    config.sections[..j]
                        .iter()
                        .any(|s| s.name.as_deref() == Some(name))
                });
                if duplicate {
                    return Err(TreeError::DuplicateSection {
                        config: config.name.clone(),
                        section: section_label,
                    });
                }

                for (k, option) in section.options.iter().enumerate() {
                    if section.options[..k].iter().any(|o| o.name == option.name) {
                        return Err(TreeError::DuplicateOption {
                            config: config.name.clone(),
                            section: section_label,
                            option: option.name.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

fn parse_type_selector(selector: &str) -> Option<(&str, i64)> {
    let inner = selector.strip_prefix('@')?.strip_suffix(']')?;
    let (kind, index) = inner.split_once('[')?;
    if kind.is_empty() {
        return None;
    }
    Some((kind, index.parse().ok()?))
}

/// Read-only tree produced by a store query.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryResult(ConfigTree);

impl QueryResult {
    pub fn new(tree: ConfigTree) -> Self {
        Self(tree)
    }

    pub fn tree(&self) -> &ConfigTree {
        &self.0
    }

    pub fn find(&self, path: &str) -> Option<Node<'_>> {
        self.0.find(path)
    }

    /// Scalar value at `config.section.option`, if present.
    pub fn value(&self, path: &str) -> Option<&str> {
        self.0.find_option(path)?.value.as_str()
    }
}

/// Write-only tree submitted to the store with a single `apply` call.
///
/// Building a transaction never touches the store.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EditTransaction(ConfigTree);

impl EditTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&mut self, name: &str) -> &mut Config {
        self.0.config_entry(name)
    }

    /// Set `config.section.option`, creating config and section as needed.
    pub fn set(
        &mut self,
        config: &str,
        section: &str,
        kind: &str,
        option: &str,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.0
            .config_entry(config)
            .section_entry(section, kind)
            .set(option, value);
        self
    }

    /// Fold another transaction into this one; later values win.
    pub fn merge(&mut self, other: EditTransaction) -> &mut Self {
        self.0.merge(other.0);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.configs.is_empty()
    }

    pub fn tree(&self) -> &ConfigTree {
        &self.0
    }

    pub fn into_tree(self) -> ConfigTree {
        self.0
    }
}
