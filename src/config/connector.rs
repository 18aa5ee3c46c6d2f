use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_required_field, validate_url, Validate,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

pub const INPUT_TYPE: &str = "docstats.input.type";
pub const INPUT_DIR: &str = "docstats.input.dir";
pub const INPUT_PATTERN: &str = "docstats.input.pattern";
pub const INPUT_HOST: &str = "mapreduce.marklogic.input.host";
pub const INPUT_PORT: &str = "mapreduce.marklogic.input.port";
pub const INPUT_USERNAME: &str = "mapreduce.marklogic.input.username";
pub const INPUT_PASSWORD: &str = "mapreduce.marklogic.input.password";
pub const INPUT_SCHEME: &str = "docstats.input.scheme";
pub const INPUT_COLLECTION: &str = "docstats.input.collection";
pub const INPUT_PAGE_LENGTH: &str = "docstats.input.page.length";
pub const INPUT_CONCURRENT_REQUESTS: &str = "docstats.input.concurrent.requests";
pub const INPUT_TIMEOUT_SECONDS: &str = "docstats.input.timeout.seconds";
pub const REPARTITION: &str = "docstats.repartition";

pub const DEFAULT_PATTERN: &str = "**/*.xml";
pub const DEFAULT_PORT: u32 = 8000;
pub const DEFAULT_PAGE_LENGTH: usize = 100;
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 5;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

const MAX_SUBSTITUTION_DEPTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Directory,
    Rest,
}

/// Flat key/value settings read from the connector configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorConfig {
    properties: BTreeMap<String, String>,
}

impl ConnectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and parses a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::parse(&content)
    }

    /// Accepts either a Hadoop `<configuration>` XML file or a
    /// `key=value` properties file, chosen by the first non-blank character.
    pub fn parse(content: &str) -> Result<Self> {
        let properties = if content.trim_start().starts_with('<') {
            parse_hadoop_xml(content)?
        } else {
            parse_properties(content)
        };

        let mut config = Self { properties };
        config.expand_variables()?;
        Ok(config)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parses a trimmed value, falling back to `default` when the key is unset.
    pub fn get_parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| EtlError::InvalidConfigValueError {
                    field: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn source_kind(&self) -> Result<SourceKind> {
        match self.get(INPUT_TYPE).map(|v| v.trim().to_ascii_lowercase()) {
            Some(kind) if kind == "directory" => Ok(SourceKind::Directory),
            Some(kind) if kind == "rest" => Ok(SourceKind::Rest),
            Some(kind) => Err(EtlError::InvalidConfigValueError {
                field: INPUT_TYPE.to_string(),
                value: kind,
                reason: "Valid types: directory, rest".to_string(),
            }),
            None if self.get(INPUT_HOST).is_some() => Ok(SourceKind::Rest),
            None => Ok(SourceKind::Directory),
        }
    }

    /// `scheme://host:port` of the database REST server.
    pub fn rest_base_url(&self) -> Result<String> {
        let host = validate_required_field(INPUT_HOST, self.get(INPUT_HOST))?.trim();
        let port: u32 = self.get_parsed(INPUT_PORT, DEFAULT_PORT)?;
        let scheme = self.get_or(INPUT_SCHEME, "http").trim();
        Ok(format!("{}://{}:{}", scheme, host, port))
    }

    pub fn repartition(&self) -> Result<usize> {
        self.get_parsed(REPARTITION, 0)
    }

    fn expand_variables(&mut self) -> Result<()> {
        let pattern = Regex::new(r"\$\{([^}$\s]+)\}").map_err(|e| EtlError::ConfigError {
            message: format!("variable pattern: {}", e),
        })?;
        let snapshot = self.properties.clone();
        for value in self.properties.values_mut() {
            *value = expand(&pattern, value, &snapshot);
        }
        Ok(())
    }
}

/// `${name}` resolves to another property, then to an environment variable;
/// unresolved references are left in place.
fn expand(pattern: &Regex, value: &str, properties: &BTreeMap<String, String>) -> String {
    let mut current = value.to_string();
    for _ in 0..MAX_SUBSTITUTION_DEPTH {
        let next = pattern
            .replace_all(&current, |caps: &regex::Captures| {
                let name = &caps[1];
                properties
                    .get(name)
                    .cloned()
                    .or_else(|| std::env::var(name).ok())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn parse_hadoop_xml(content: &str) -> Result<BTreeMap<String, String>> {
    let doc = roxmltree::Document::parse(content)?;
    let root = doc.root_element();
    if !root.has_tag_name("configuration") {
        return Err(EtlError::ConfigError {
            message: format!(
                "expected a <configuration> root element, found <{}>",
                root.tag_name().name()
            ),
        });
    }

    let mut properties = BTreeMap::new();
    for property in root.children().filter(|n| n.has_tag_name("property")) {
        let field = |tag: &str| {
            property
                .children()
                .find(|c| c.has_tag_name(tag))
                .map(|c| c.text().unwrap_or_default().to_string())
        };
        let name = field("name").ok_or_else(|| EtlError::ConfigError {
            message: "<property> without a <name>".to_string(),
        })?;
        properties.insert(name.trim().to_string(), field("value").unwrap_or_default());
    }
    Ok(properties)
}

fn parse_properties(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(|line| match line.find(|c| c == '=' || c == ':') {
            Some(i) => (line[..i].trim().to_string(), line[i + 1..].trim().to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

impl Validate for ConnectorConfig {
    fn validate(&self) -> Result<()> {
        match self.source_kind()? {
            SourceKind::Directory => {
                let dir = validate_required_field(INPUT_DIR, self.get(INPUT_DIR))?;
                validate_path(INPUT_DIR, dir.trim())?;
                validate_non_empty_string(INPUT_PATTERN, self.get_or(INPUT_PATTERN, DEFAULT_PATTERN))?;
            }
            SourceKind::Rest => {
                let host = validate_required_field(INPUT_HOST, self.get(INPUT_HOST))?;
                validate_non_empty_string(INPUT_HOST, host)?;
                let port: u32 = self.get_parsed(INPUT_PORT, DEFAULT_PORT)?;
                validate_range(INPUT_PORT, port, 1, 65535)?;
                validate_url(INPUT_HOST, &self.rest_base_url()?)?;
                validate_positive_number(
                    INPUT_PAGE_LENGTH,
                    self.get_parsed(INPUT_PAGE_LENGTH, DEFAULT_PAGE_LENGTH)?,
                    1,
                )?;
                validate_positive_number(
                    INPUT_CONCURRENT_REQUESTS,
                    self.get_parsed(INPUT_CONCURRENT_REQUESTS, DEFAULT_CONCURRENT_REQUESTS)?,
                    1,
                )?;
                let timeout: u64 = self.get_parsed(INPUT_TIMEOUT_SECONDS, DEFAULT_TIMEOUT_SECONDS)?;
                validate_range(INPUT_TIMEOUT_SECONDS, timeout, 1, 3600)?;
            }
        }
        self.repartition()?;
        Ok(())
    }
}
