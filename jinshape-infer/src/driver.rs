use tracing::debug;

use crate::ast::Template;
use crate::config::Config;
use crate::error::{Error, SyntaxError};
use crate::loader::{FileSystemLoader, NullLoader, TemplateLoader};
use crate::model::Structure;
use crate::parser::parse_source;
use crate::source::{SourceFile, SourceId};
use crate::visitors::StmtVisitor;

pub fn parse(source: &str) -> Result<Template, SyntaxError> {
    parse_source(&SourceFile::anonymous(source))
}

/// Infers the context structure `source` needs. Included and extended
/// templates are read from `package_name/template_directory`.
pub fn infer(source: &str, config: &Config) -> Result<Structure, Error> {
    let loader = FileSystemLoader::from_config(config);
    Inferrer::new(config).with_loader(&loader).infer_source(source)
}

pub fn infer_with_loader(
    source: &str,
    config: &Config,
    loader: &dyn TemplateLoader,
) -> Result<Structure, Error> {
    Inferrer::new(config).with_loader(loader).infer_source(source)
}

pub fn infer_from_ast(
    template: &Template,
    config: &Config,
    loader: &dyn TemplateLoader,
) -> Result<Structure, Error> {
    Inferrer::new(config).with_loader(loader).infer_ast(template)
}

/// Configurable entry point. Without a loader, `include` and `extends`
/// fail with a not-found error.
pub struct Inferrer<'l> {
    config: &'l Config,
    loader: Option<&'l dyn TemplateLoader>,
    keep_constants: bool,
}

impl<'l> Inferrer<'l> {
    pub fn new(config: &'l Config) -> Self {
        Self {
            config,
            loader: None,
            keep_constants: false,
        }
    }

    pub fn with_loader(mut self, loader: &'l dyn TemplateLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Keeps variables the template assigns itself in the result.
    pub fn keep_constants(mut self, keep: bool) -> Self {
        self.keep_constants = keep;
        self
    }

    pub fn infer_source(&self, source: &str) -> Result<Structure, Error> {
        let template = parse(source)?;
        self.infer_ast(&template)
    }

    /// Loads `name` through the loader and infers it. Syntax errors carry the
    /// template name.
    pub fn infer_template(&self, name: &str) -> Result<Structure, Error> {
        let loader = self.loader();
        let contents = loader.load(name)?;
        let source = SourceFile::new(SourceId(0), name, contents);
        let template = parse_source(&source).map_err(|error| error.in_template(name))?;
        self.infer_ast(&template)
    }

    pub fn infer_ast(&self, template: &Template) -> Result<Structure, Error> {
        debug!(
            template = %template.name,
            statements = template.body.len(),
            "starting inference"
        );
        let mut visitor = StmtVisitor::new(self.config, self.loader());
        let mut structure = visitor.visit_template(template)?;
        if !self.keep_constants {
            strip_constants(&mut structure);
        }
        debug!(
            template = %template.name,
            variables = structure.fields().map_or(0, |fields| fields.len()),
            macros = visitor.macros().len(),
            "finished inference"
        );
        Ok(structure)
    }

    fn loader(&self) -> &'l dyn TemplateLoader {
        self.loader.unwrap_or(&NO_TEMPLATES)
    }
}

static NO_TEMPLATES: NullLoader = NullLoader;

/// Drops the variables the template assigns itself, unless control flow
/// leaves them possibly unassigned.
fn strip_constants(structure: &mut Structure) {
    let names: Vec<String> = match structure.fields() {
        Some(fields) => fields.keys().cloned().collect(),
        None => return,
    };
    for name in names {
        let Some(field) = structure.field(&name) else {
            continue;
        };
        if field.constant && !field.may_be_defined {
            structure.remove_field(&name);
        } else if field.is_dictionary() {
            if let Some(field) = structure.field_mut(&name) {
                strip_constants(field);
            }
        }
    }
}
