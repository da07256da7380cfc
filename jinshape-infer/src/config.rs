use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

/// What a variable indexed with an integer literal (`xs[2]`) is taken to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegerIndexPolicy {
    #[default]
    List,
    Dictionary,
    Tuple,
}

/// What a variable indexed with another expression (`xs[i]`) is taken to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableIndexPolicy {
    List,
    #[default]
    Dictionary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicy(pub String);

impl fmt::Display for UnknownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown index policy '{}'", self.0)
    }
}

impl std::error::Error for UnknownPolicy {}

impl FromStr for IntegerIndexPolicy {
    type Err = UnknownPolicy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "list" => Ok(IntegerIndexPolicy::List),
            "dictionary" => Ok(IntegerIndexPolicy::Dictionary),
            "tuple" => Ok(IntegerIndexPolicy::Tuple),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for IntegerIndexPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntegerIndexPolicy::List => "list",
            IntegerIndexPolicy::Dictionary => "dictionary",
            IntegerIndexPolicy::Tuple => "tuple",
        };
        f.write_str(name)
    }
}

impl FromStr for VariableIndexPolicy {
    type Err = UnknownPolicy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "list" => Ok(VariableIndexPolicy::List),
            "dictionary" => Ok(VariableIndexPolicy::Dictionary),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for VariableIndexPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariableIndexPolicy::List => "list",
            VariableIndexPolicy::Dictionary => "dictionary",
        };
        f.write_str(name)
    }
}

/// Inference options. Every field has a default, so a config file only needs
/// the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub integer_index_policy: IntegerIndexPolicy,
    pub variable_index_policy: VariableIndexPolicy,
    /// Treat `if` and ternary conditions as booleans instead of unknowns.
    pub boolean_conditions: bool,
    pub package_name: String,
    pub template_directory: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            integer_index_policy: IntegerIndexPolicy::default(),
            variable_index_policy: VariableIndexPolicy::default(),
            boolean_conditions: false,
            package_name: String::new(),
            template_directory: "templates".to_string(),
        }
    }
}

impl Config {
    pub fn with_integer_index_policy(mut self, policy: IntegerIndexPolicy) -> Self {
        self.integer_index_policy = policy;
        self
    }

    pub fn with_variable_index_policy(mut self, policy: VariableIndexPolicy) -> Self {
        self.variable_index_policy = policy;
        self
    }

    pub fn with_boolean_conditions(mut self, enabled: bool) -> Self {
        self.boolean_conditions = enabled;
        self
    }

    pub fn with_package_name(mut self, name: impl Into<String>) -> Self {
        self.package_name = name.into();
        self
    }

    pub fn with_template_directory(mut self, directory: impl Into<String>) -> Self {
        self.template_directory = directory.into();
        self
    }

    /// Directory that include and extends resolve against, relative to the
    /// working directory.
    pub fn template_root(&self) -> PathBuf {
        let mut root = PathBuf::new();
        if !self.package_name.is_empty() {
            root.push(&self.package_name);
        }
        root.push(&self.template_directory);
        root
    }
}
