use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::ast::{
    AssignBlockStatement, AssignStatement, AssignTarget, AutoescapeStatement, BlockStatement,
    Expression, ExpressionKind, FilterBlockStatement, FilterCall, ForStatement, IfStatement,
    IncludeStatement, Literal, MacroStatement, OutputStatement, Statement, Template,
    WithStatement,
};
use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, InferError, InferResult, LoadError};
use crate::loader::TemplateLoader;
use crate::macros::{Macro, MacroRegistry};
use crate::merge::{merge, merge_into};
use crate::model::{ScalarKind, Shape, Structure};
use crate::parser::parse_source;
use crate::source::{SourceFile, SourceId};

use super::expr::{ExprVisitor, Visit};
use super::filters::filter_contract;
use super::reconcile_checks;

type StmtResult = Result<Structure, Error>;

/// Walks statements and returns, for each, a dictionary of the variables it
/// needs. Owns the macro registry and the stack of templates being loaded.
pub struct StmtVisitor<'a> {
    config: &'a Config,
    loader: &'a dyn TemplateLoader,
    macros: MacroRegistry,
    stack: Vec<String>,
}

impl<'a> StmtVisitor<'a> {
    pub fn new(config: &'a Config, loader: &'a dyn TemplateLoader) -> Self {
        Self {
            config,
            loader,
            macros: MacroRegistry::new(),
            stack: Vec::new(),
        }
    }

    pub fn macros(&self) -> &MacroRegistry {
        &self.macros
    }

    fn visit_expression(&self, expr: &Expression, ctx: &Context) -> Visit {
        ExprVisitor::new(self.config, &self.macros).visit(expr, ctx)
    }

    fn visit_condition(&self, test: &Expression) -> Visit {
        let visitor = ExprVisitor::new(self.config, &self.macros);
        visitor.visit(test, &visitor.condition_context(test))
    }

    /// Walks a whole template. A template that extends another is walked as
    /// its parent's body with the overridden blocks substituted.
    pub fn visit_template(&mut self, template: &Template) -> StmtResult {
        self.stack.push(template.name.clone());
        let result = self
            .resolve_inheritance(template)
            .and_then(|body| self.visit_body(&body));
        self.stack.pop();
        result
    }

    pub fn visit_body(&mut self, body: &[Statement]) -> StmtResult {
        let mut structure = Structure::dictionary();
        for stmt in body {
            let stmt_struct = self.visit_statement(stmt)?;
            merge_into(&mut structure, &stmt_struct)?;
        }
        Ok(structure)
    }

    pub fn visit_statement(&mut self, node: &Statement) -> StmtResult {
        trace!(line = node.line(), kind = node.describe(), "visiting statement");
        match node {
            Statement::Output(stmt) => self.visit_output(stmt),
            Statement::For(stmt) => self.visit_for(node, stmt),
            Statement::If(stmt) => self.visit_if(stmt),
            Statement::Assign(stmt) => self.visit_assign(node, stmt),
            Statement::AssignBlock(stmt) => self.visit_assign_block(node, stmt),
            Statement::Macro(stmt) => self.visit_macro(stmt),
            Statement::Block(stmt) => self.visit_body(&stmt.body),
            Statement::Include(stmt) => self.visit_include(node, stmt),
            Statement::With(stmt) => self.visit_with(stmt),
            Statement::Autoescape(stmt) => self.visit_autoescape(stmt),
            Statement::FilterBlock(stmt) => self.visit_filter_block(node, stmt),
            Statement::Extends(_) => Err(InferError::invalid_statement(
                node,
                "\"extends\" is only supported at the top level of a template",
            )
            .into()),
            Statement::Unsupported(stmt) => Err(InferError::invalid_statement(
                node,
                format!("\"{}\" tag is not supported", stmt.tag),
            )
            .into()),
        }
    }

    fn visit_output(&mut self, stmt: &OutputStatement) -> StmtResult {
        let mut structure = Structure::dictionary();
        for node in &stmt.nodes {
            let ctx = Context::predict(Shape::Scalar(ScalarKind::Scalar), node);
            let (_, node_struct) = self.visit_expression(node, &ctx)?;
            merge_into(&mut structure, &node_struct)?;
        }
        Ok(structure)
    }

    fn visit_for(&mut self, node: &Statement, stmt: &ForStatement) -> StmtResult {
        let mut body_struct = self.visit_body(&stmt.body)?;
        if let Some(filter) = &stmt.filter {
            let (_, filter_struct) = self.visit_condition(filter)?;
            body_struct = merge(&filter_struct, &body_struct)?;
        }
        let else_struct = self.visit_body(&stmt.else_body)?;

        body_struct.remove_field("loop");
        let target_struct = extract_target(&mut body_struct, &stmt.target, stmt.span.line, node)?;

        let iter_ctx = Context::new(Structure::list(target_struct.clone()).at_line(stmt.span.line));
        let (iter_rtype, iter_struct) = self.visit_expression(&stmt.iter, &iter_ctx)?;
        merge(&iter_rtype, &Structure::list(target_struct))?;

        Ok(merge(&merge(&iter_struct, &body_struct)?, &else_struct)?)
    }

    fn visit_if(&mut self, stmt: &IfStatement) -> StmtResult {
        let (_, test_struct) = self.visit_condition(&stmt.test)?;
        let if_struct = self.visit_body(&stmt.body)?;
        let else_struct = self.visit_body(&stmt.else_body)?;

        let mut structure = merge(&merge(&test_struct, &if_struct)?, &else_struct)?;
        reconcile_checks(&mut structure, &test_struct, &if_struct, &else_struct);
        Ok(structure)
    }

    fn visit_assign(&mut self, node: &Statement, stmt: &AssignStatement) -> StmtResult {
        match (&stmt.target, &stmt.value.kind) {
            (AssignTarget::Name(target), _) => {
                Ok(self.assign_value(Structure::dictionary(), &target.name, &stmt.value)?)
            }
            (AssignTarget::Tuple(targets, _), ExpressionKind::Tuple(values)) => {
                if targets.len() != values.len() {
                    return Err(InferError::invalid_statement(
                        node,
                        "number of items in left side is different from right side",
                    )
                    .into());
                }
                let mut structure = Structure::dictionary();
                for (target, value) in targets.iter().zip(values) {
                    let AssignTarget::Name(target) = target else {
                        return Err(unsupported_assignment(node).into());
                    };
                    structure = self.assign_value(structure, &target.name, value)?;
                }
                Ok(structure)
            }
            (AssignTarget::Tuple(targets, _), _) => {
                let mut structure = Structure::dictionary();
                let mut placeholders = Vec::with_capacity(targets.len());
                for target in targets {
                    let AssignTarget::Name(target) = target else {
                        return Err(unsupported_assignment(node).into());
                    };
                    let placeholder = Structure::unknown()
                        .with_label(target.name.clone())
                        .at_line(target.span.line)
                        .as_constant();
                    placeholders.push(placeholder.clone());
                    merge_into(
                        &mut structure,
                        &Structure::dictionary().with_field(target.name.clone(), placeholder),
                    )?;
                }
                let value_ctx =
                    Context::new(Structure::tuple(Some(placeholders)).at_line(stmt.span.line));
                let (_, value_struct) = self.visit_expression(&stmt.value, &value_ctx)?;
                Ok(merge(&structure, &value_struct)?)
            }
            (AssignTarget::Attribute(..), _) => Err(unsupported_assignment(node).into()),
        }
    }

    fn assign_value(
        &self,
        structure: Structure,
        name: &str,
        value: &Expression,
    ) -> InferResult<Structure> {
        let (mut rtype, value_struct) =
            self.visit_expression(value, &Context::predict(Shape::Unknown, value))?;
        rtype.constant = true;
        rtype.label = Some(name.to_string());
        merge(
            &merge(&structure, &value_struct)?,
            &Structure::dictionary().with_field(name, rtype),
        )
    }

    fn visit_assign_block(&mut self, node: &Statement, stmt: &AssignBlockStatement) -> StmtResult {
        let AssignTarget::Name(target) = &stmt.target else {
            return Err(unsupported_assignment(node).into());
        };
        let mut structure = self.visit_body(&stmt.body)?;
        for filter in &stmt.filters {
            let filter_struct = self.visit_filter_call(node, filter)?;
            merge_into(&mut structure, &filter_struct)?;
        }
        let value = Structure::string()
            .with_label(target.name.clone())
            .at_line(stmt.span.line)
            .as_constant();
        Ok(merge(
            &structure,
            &Structure::dictionary().with_field(target.name.clone(), value),
        )?)
    }

    fn visit_macro(&mut self, stmt: &MacroStatement) -> StmtResult {
        let mut body_struct = self.visit_body(&stmt.body)?;
        let line = stmt.span.line;

        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        for (index, parameter) in stmt.parameters.iter().enumerate() {
            let label = match parameter.default {
                None => format!("argument #{}", index + 1),
                Some(_) => format!("argument \"{}\"", parameter.name),
            };
            let mut declared = Structure::unknown().with_label(label.clone()).at_line(line);
            if let Some(default) = &parameter.default {
                let (default_rtype, _) =
                    self.visit_expression(default, &Context::predict(Shape::Unknown, default))?;
                declared = merge(&declared, &default_rtype)?;
            }
            if let Some(usage) = body_struct.remove_field(&parameter.name) {
                declared = merge(&declared, &usage)?;
            }
            declared.label = Some(label);
            declared.linenos = BTreeSet::from([line]);

            if parameter.default.is_some() {
                kwargs.push((parameter.name.clone(), declared));
            } else {
                args.push((parameter.name.clone(), declared));
            }
        }

        for implicit in ["caller", "varargs", "kwargs"] {
            body_struct.remove_field(implicit);
        }

        debug!(
            name = %stmt.name,
            positional = args.len(),
            keyword = kwargs.len(),
            "registered macro"
        );
        self.macros.register(Macro {
            name: stmt.name.clone(),
            args,
            kwargs,
        });
        Ok(body_struct)
    }

    fn visit_include(&mut self, node: &Statement, stmt: &IncludeStatement) -> StmtResult {
        let name = constant_template_name(node, &stmt.template, "include")?;
        match self.load_template(&name) {
            Ok(template) => self.visit_template(&template),
            Err(Error::Load(error))
                if stmt.ignore_missing && !matches!(error, LoadError::Cycle { .. }) =>
            {
                debug!(template = %name, %error, "skipping missing include");
                Ok(Structure::dictionary())
            }
            Err(error) => Err(error),
        }
    }

    fn visit_with(&mut self, stmt: &WithStatement) -> StmtResult {
        let mut body_struct = self.visit_body(&stmt.body)?;
        let mut structure = Structure::dictionary();
        for (target, value) in &stmt.bindings {
            let predicted = body_struct
                .remove_field(&target.name)
                .unwrap_or_else(|| Structure::unknown().at_line(target.span.line));
            let (_, value_struct) = self.visit_expression(value, &Context::new(predicted))?;
            merge_into(&mut structure, &value_struct)?;
        }
        Ok(merge(&structure, &body_struct)?)
    }

    fn visit_autoescape(&mut self, stmt: &AutoescapeStatement) -> StmtResult {
        let (_, value_struct) =
            self.visit_expression(&stmt.value, &Context::predict(Shape::Unknown, &stmt.value))?;
        let body_struct = self.visit_body(&stmt.body)?;
        Ok(merge(&value_struct, &body_struct)?)
    }

    fn visit_filter_block(&mut self, node: &Statement, stmt: &FilterBlockStatement) -> StmtResult {
        let mut structure = Structure::dictionary();
        for filter in &stmt.filters {
            let filter_struct = self.visit_filter_call(node, filter)?;
            merge_into(&mut structure, &filter_struct)?;
        }
        let body_struct = self.visit_body(&stmt.body)?;
        Ok(merge(&structure, &body_struct)?)
    }

    fn visit_filter_call(&self, node: &Statement, filter: &FilterCall) -> InferResult<Structure> {
        if filter.name == "attr" {
            return Err(InferError::invalid_statement(
                node,
                "attr filter is not supported",
            ));
        }
        if filter_contract(&filter.name).is_none() {
            return Err(InferError::invalid_statement(
                node,
                format!("unknown filter \"{}\"", filter.name),
            ));
        }
        ExprVisitor::new(self.config, &self.macros)
            .visit_arguments(filter.arguments.expressions(), Shape::Unknown)
    }

    fn load_template(&mut self, name: &str) -> Result<Template, Error> {
        if self.stack.iter().any(|loading| loading == name) {
            let mut chain = self.stack.clone();
            chain.push(name.to_string());
            return Err(LoadError::Cycle {
                name: name.to_string(),
                chain,
            }
            .into());
        }

        let contents = self.loader.load(name)?;
        debug!(template = name, bytes = contents.len(), "loaded template");
        let id = SourceId(u32::try_from(self.stack.len()).unwrap_or(u32::MAX));
        let source = SourceFile::new(id, name, contents);
        parse_source(&source).map_err(|error| Error::from(error.in_template(name)))
    }

    fn resolve_inheritance<'t>(
        &mut self,
        template: &'t Template,
    ) -> Result<Cow<'t, [Statement]>, Error> {
        let extends = template.body.iter().find_map(|stmt| match stmt {
            Statement::Extends(extends) => Some((stmt, extends)),
            _ => None,
        });
        let Some((node, extends)) = extends else {
            return Ok(Cow::Borrowed(&template.body));
        };

        let parent_name = constant_template_name(node, &extends.template, "extends")?;
        let parent = self.load_template(&parent_name)?;
        self.stack.push(parent_name.clone());
        let parent_body = self.resolve_inheritance(&parent);
        self.stack.pop();
        let parent_body = parent_body?;
        debug!(template = %template.name, parent = %parent_name, "resolved inheritance");

        let mut overrides = BTreeMap::new();
        collect_blocks(&template.body, &mut overrides);

        let mut body: Vec<Statement> = template
            .body
            .iter()
            .filter(|stmt| !matches!(stmt, Statement::Block(_) | Statement::Extends(_)))
            .cloned()
            .collect();
        body.extend(substitute_blocks(&parent_body, &overrides));
        Ok(Cow::Owned(body))
    }
}

fn unsupported_assignment(node: &Statement) -> InferError {
    InferError::invalid_statement(node, "unsupported assignment")
}

fn extract_target(
    body_struct: &mut Structure,
    target: &AssignTarget,
    line: usize,
    node: &Statement,
) -> InferResult<Structure> {
    match target {
        AssignTarget::Name(name) => Ok(body_struct
            .remove_field(&name.name)
            .unwrap_or_else(|| Structure::unknown().at_line(line))),
        AssignTarget::Tuple(items, span) => {
            let items = items
                .iter()
                .map(|item| extract_target(body_struct, item, span.line, node))
                .collect::<InferResult<Vec<_>>>()?;
            Ok(Structure::tuple(Some(items)).at_line(span.line))
        }
        AssignTarget::Attribute(..) => Err(unsupported_assignment(node)),
    }
}

fn constant_template_name(node: &Statement, expr: &Expression, tag: &str) -> InferResult<String> {
    match expr.as_literal() {
        Some(Literal::String(name)) => Ok(name.clone()),
        _ => Err(InferError::invalid_statement(
            node,
            format!("\"{tag}\" requires a constant template name"),
        )),
    }
}

fn collect_blocks<'t>(body: &'t [Statement], blocks: &mut BTreeMap<&'t str, &'t BlockStatement>) {
    for stmt in body {
        if let Statement::Block(block) = stmt {
            blocks.insert(block.name.as_str(), block);
            collect_blocks(&block.body, blocks);
        }
    }
}

fn is_super_call(expr: &Expression) -> bool {
    matches!(&expr.kind, ExpressionKind::Call(call) if call.callee.as_name() == Some("super"))
}

fn substitute_blocks(body: &[Statement], overrides: &BTreeMap<&str, &BlockStatement>) -> Vec<Statement> {
    body.iter()
        .map(|stmt| substitute_statement(stmt, overrides))
        .collect()
}

fn substitute_statement(stmt: &Statement, overrides: &BTreeMap<&str, &BlockStatement>) -> Statement {
    match stmt {
        Statement::Block(block) => {
            let inherited = substitute_blocks(&block.body, overrides);
            let body = match overrides.get(block.name.as_str()) {
                Some(child) => {
                    let own = substitute_blocks(&child.body, overrides);
                    if child.body.iter().any(|stmt| stmt.any_expression(&is_super_call)) {
                        inherited.into_iter().chain(own).collect()
                    } else {
                        own
                    }
                }
                None => inherited,
            };
            Statement::Block(BlockStatement {
                name: block.name.clone(),
                body,
                scoped: block.scoped,
                required: block.required,
                span: block.span,
            })
        }
        Statement::For(for_stmt) => Statement::For(ForStatement {
            body: substitute_blocks(&for_stmt.body, overrides),
            else_body: substitute_blocks(&for_stmt.else_body, overrides),
            ..for_stmt.clone()
        }),
        Statement::If(if_stmt) => Statement::If(IfStatement {
            body: substitute_blocks(&if_stmt.body, overrides),
            else_body: substitute_blocks(&if_stmt.else_body, overrides),
            ..if_stmt.clone()
        }),
        Statement::With(with_stmt) => Statement::With(WithStatement {
            body: substitute_blocks(&with_stmt.body, overrides),
            ..with_stmt.clone()
        }),
        Statement::Autoescape(autoescape) => Statement::Autoescape(AutoescapeStatement {
            body: substitute_blocks(&autoescape.body, overrides),
            ..autoescape.clone()
        }),
        Statement::FilterBlock(filter_block) => Statement::FilterBlock(FilterBlockStatement {
            body: substitute_blocks(&filter_block.body, overrides),
            ..filter_block.clone()
        }),
        other => other.clone(),
    }
}
