//! The structural types inferred for template variables.
//!
//! A [`Structure`] is a metadata envelope around a [`Shape`]. Children are
//! shared behind [`Arc`] and copied on write, so cloning a large dictionary
//! and changing one key leaves every other sub-tree shared with the original.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::ast::{Expression, Literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Scalar,
    String,
    Number,
    Boolean,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Scalar => "scalar",
            ScalarKind::String => "string",
            ScalarKind::Number => "number",
            ScalarKind::Boolean => "boolean",
        }
    }

    /// `true` when `self` is `other` or a refinement of it.
    pub fn is_subkind_of(self, other: ScalarKind) -> bool {
        self == other || other == ScalarKind::Scalar
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TupleShape {
    /// `None` while the arity is unknown.
    pub items: Option<Vec<Arc<Structure>>>,
    pub may_be_extended: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Unknown,
    Scalar(ScalarKind),
    Dictionary(BTreeMap<String, Arc<Structure>>),
    List(Arc<Structure>),
    Tuple(TupleShape),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub shape: Shape,
    pub label: Option<String>,
    pub linenos: BTreeSet<usize>,
    pub constant: bool,
    pub may_be_defined: bool,
    pub used_with_default: bool,
    pub checked_as_defined: bool,
    pub checked_as_undefined: bool,
    pub value: Option<Literal>,
}

impl Structure {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            label: None,
            linenos: BTreeSet::new(),
            constant: false,
            may_be_defined: false,
            used_with_default: false,
            checked_as_defined: false,
            checked_as_undefined: false,
            value: None,
        }
    }

    pub fn unknown() -> Self {
        Self::new(Shape::Unknown)
    }

    pub fn scalar() -> Self {
        Self::of_kind(ScalarKind::Scalar)
    }

    pub fn string() -> Self {
        Self::of_kind(ScalarKind::String)
    }

    pub fn number() -> Self {
        Self::of_kind(ScalarKind::Number)
    }

    pub fn boolean() -> Self {
        Self::of_kind(ScalarKind::Boolean)
    }

    pub fn of_kind(kind: ScalarKind) -> Self {
        Self::new(Shape::Scalar(kind))
    }

    pub fn dictionary() -> Self {
        Self::new(Shape::Dictionary(BTreeMap::new()))
    }

    pub fn list(item: Structure) -> Self {
        Self::new(Shape::List(Arc::new(item)))
    }

    pub fn tuple(items: Option<Vec<Structure>>) -> Self {
        Self::new(Shape::Tuple(TupleShape {
            items: items.map(|items| items.into_iter().map(Arc::new).collect()),
            may_be_extended: false,
        }))
    }

    /// Takes label, line and literal value from `expr`, the way every
    /// visitor stamps the structures it creates.
    pub fn from_expression(shape: Shape, expr: &Expression) -> Self {
        let mut structure = Self::new(shape).at_line(expr.line());
        structure.label = expr.as_name().map(str::to_string);
        structure.value = expr.as_literal().cloned();
        structure
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.linenos.insert(line);
        self
    }

    pub fn with_linenos(mut self, linenos: impl IntoIterator<Item = usize>) -> Self {
        self.linenos = linenos.into_iter().collect();
        self
    }

    pub fn as_constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn maybe_defined(mut self) -> Self {
        self.may_be_defined = true;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.used_with_default = true;
        self
    }

    pub fn checked_defined(mut self) -> Self {
        self.checked_as_defined = true;
        self
    }

    pub fn checked_undefined(mut self) -> Self {
        self.checked_as_undefined = true;
        self
    }

    pub fn with_value(mut self, value: Literal) -> Self {
        self.value = Some(value);
        self
    }

    pub fn extensible(mut self) -> Self {
        if let Shape::Tuple(tuple) = &mut self.shape {
            tuple.may_be_extended = true;
        }
        self
    }

    /// Dictionary builder; ignored on other shapes.
    pub fn with_field(mut self, name: impl Into<String>, field: Structure) -> Self {
        self.set_field(name, field);
        self
    }

    pub fn is_required(&self) -> bool {
        !(self.may_be_defined || self.used_with_default)
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.shape {
            Shape::Unknown => "unknown",
            Shape::Scalar(kind) => kind.name(),
            Shape::Dictionary(_) => "dictionary",
            Shape::List(_) => "list",
            Shape::Tuple(_) => "tuple",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.shape, Shape::Unknown)
    }

    pub fn is_dictionary(&self) -> bool {
        matches!(self.shape, Shape::Dictionary(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.shape, Shape::List(_))
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.shape {
            Shape::Scalar(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&BTreeMap<String, Arc<Structure>>> {
        match &self.shape {
            Shape::Dictionary(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Structure> {
        self.fields()?.get(name).map(Arc::as_ref)
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Structure> {
        match &mut self.shape {
            Shape::Dictionary(fields) => fields.get_mut(name).map(Arc::make_mut),
            _ => None,
        }
    }

    pub fn set_field(&mut self, name: impl Into<String>, field: Structure) {
        if let Shape::Dictionary(fields) = &mut self.shape {
            fields.insert(name.into(), Arc::new(field));
        }
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Structure> {
        match &mut self.shape {
            Shape::Dictionary(fields) => fields.remove(name).map(Arc::unwrap_or_clone),
            _ => None,
        }
    }

    pub fn item(&self) -> Option<&Structure> {
        match &self.shape {
            Shape::List(item) => Some(item),
            _ => None,
        }
    }

    pub fn into_item(self) -> Option<Structure> {
        match self.shape {
            Shape::List(item) => Some(Arc::unwrap_or_clone(item)),
            _ => None,
        }
    }

    pub fn tuple_items(&self) -> Option<&[Arc<Structure>]> {
        match &self.shape {
            Shape::Tuple(TupleShape {
                items: Some(items), ..
            }) => Some(items),
            _ => None,
        }
    }

    /// Multi-line dump with every metadata flag, one node per line.
    pub fn debug_repr(&self) -> String {
        debug_lines(self).join("\n")
    }
}

fn format_attrs(structure: &Structure) -> String {
    let label = structure.label.as_deref().unwrap_or("None");
    let linenos = structure
        .linenos
        .iter()
        .map(|line| line.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "label={label}, required={}, constant={}, linenos=[{linenos}], may_be_d={}, c_as_u={}, c_as_d={}",
        structure.is_required(),
        structure.constant,
        structure.may_be_defined,
        structure.checked_as_undefined,
        structure.checked_as_defined,
    )
}

fn indent(lines: Vec<String>, spaces: usize) -> impl Iterator<Item = String> {
    let pad = " ".repeat(spaces);
    lines.into_iter().map(move |line| format!("{pad}{line}"))
}

fn debug_lines(structure: &Structure) -> Vec<String> {
    let attrs = format_attrs(structure);
    match &structure.shape {
        Shape::Unknown => vec![format!("Unknown({attrs})")],
        Shape::Scalar(kind) => {
            let name = match kind {
                ScalarKind::Scalar => "Scalar",
                ScalarKind::String => "String",
                ScalarKind::Number => "Number",
                ScalarKind::Boolean => "Boolean",
            };
            vec![format!("{name}({attrs})")]
        }
        Shape::Dictionary(fields) => {
            let mut lines = vec![format!("Dictionary({attrs}, {{")];
            for (key, value) in fields {
                let key_repr = format!("{key}: ");
                let mut value_lines = debug_lines(value).into_iter();
                let first = value_lines.next().unwrap_or_default();
                lines.push(format!("    {key_repr}{first}"));
                lines.extend(indent(value_lines.collect(), 4 + key_repr.len()));
            }
            lines.push("})".to_string());
            lines
        }
        Shape::List(item) => {
            let mut lines = vec![format!("List({attrs},")];
            lines.extend(indent(debug_lines(item), 4));
            lines.push(")".to_string());
            lines
        }
        Shape::Tuple(tuple) => {
            let mut lines = vec![format!("Tuple({attrs},")];
            if let Some(items) = &tuple.items {
                let count = items.len();
                for (index, item) in items.iter().enumerate() {
                    let mut item_lines = debug_lines(item);
                    if index + 1 < count {
                        if let Some(last) = item_lines.last_mut() {
                            last.push(',');
                        }
                    }
                    lines.extend(indent(item_lines, 4));
                }
            }
            lines.push(")".to_string());
            lines
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            Shape::Unknown => write!(f, "<unknown>"),
            Shape::Scalar(kind) => write!(f, "<{}>", kind.name()),
            Shape::Dictionary(fields) => {
                write!(f, "{{")?;
                for (index, (key, value)) in fields.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{key}': {value}")?;
                }
                write!(f, "}}")
            }
            Shape::List(item) => write!(f, "[{item}]"),
            Shape::Tuple(tuple) => match &tuple.items {
                None => write!(f, "(...)"),
                Some(items) if items.len() == 1 => write!(f, "({},)", items[0]),
                Some(items) => {
                    write!(f, "(")?;
                    for (index, item) in items.iter().enumerate() {
                        if index > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{item}")?;
                    }
                    write!(f, ")")
                }
            },
        }
    }
}

impl Serialize for Structure {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.kind_name())?;
        match &self.shape {
            Shape::Dictionary(fields) => map.serialize_entry("fields", fields)?,
            Shape::List(item) => map.serialize_entry("item", item)?,
            Shape::Tuple(tuple) => {
                map.serialize_entry("items", &tuple.items)?;
                map.serialize_entry("may_be_extended", &tuple.may_be_extended)?;
            }
            Shape::Unknown | Shape::Scalar(_) => {}
        }
        if let Some(label) = &self.label {
            map.serialize_entry("label", label)?;
        }
        map.serialize_entry("linenos", &self.linenos)?;
        map.serialize_entry("required", &self.is_required())?;
        map.serialize_entry("constant", &self.constant)?;
        map.serialize_entry("may_be_defined", &self.may_be_defined)?;
        map.serialize_entry("used_with_default", &self.used_with_default)?;
        map.serialize_entry("checked_as_defined", &self.checked_as_defined)?;
        map.serialize_entry("checked_as_undefined", &self.checked_as_undefined)?;
        if let Some(value) = &self.value {
            map.serialize_entry("value", value)?;
        }
        map.end()
    }
}

/// The shape a terminal `Name` reports for itself as an rtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnKind {
    #[default]
    Unknown,
    Scalar,
    String,
    Number,
    Boolean,
}

impl ReturnKind {
    pub fn shape(self) -> Shape {
        match self {
            ReturnKind::Unknown => Shape::Unknown,
            ReturnKind::Scalar => Shape::Scalar(ScalarKind::Scalar),
            ReturnKind::String => Shape::Scalar(ScalarKind::String),
            ReturnKind::Number => Shape::Scalar(ScalarKind::Number),
            ReturnKind::Boolean => Shape::Scalar(ScalarKind::Boolean),
        }
    }

    pub fn instantiate(self, expr: &Expression) -> Structure {
        Structure::from_expression(self.shape(), expr)
    }
}

impl From<ScalarKind> for ReturnKind {
    fn from(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Scalar => ReturnKind::Scalar,
            ScalarKind::String => ReturnKind::String,
            ScalarKind::Number => ReturnKind::Number,
            ScalarKind::Boolean => ReturnKind::Boolean,
        }
    }
}
