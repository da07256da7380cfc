use std::collections::HashMap;

use crate::ast::{CallArguments, Expression};
use crate::context::Context;
use crate::error::{InferError, InferResult};
use crate::merge::{merge, merge_into};
use crate::model::{Shape, Structure};
use crate::visitors::ExprVisitor;

pub type Parameter = (String, Structure);

#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    pub name: String,
    pub args: Vec<Parameter>,
    pub kwargs: Vec<Parameter>,
}

#[derive(Debug, Clone, Default)]
pub struct MacroRegistry {
    macros: HashMap<String, Macro>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, declaration: Macro) {
        self.macros.insert(declaration.name.clone(), declaration);
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

struct PassedArgument<'e> {
    expr: &'e Expression,
    rtype: Structure,
}

struct PassedKeyword<'e> {
    name: &'e str,
    expr: &'e Expression,
    rtype: Structure,
}

/// Matches the arguments of a call to `declaration` against its parameters
/// and returns the requirements the call puts on the caller's variables.
///
/// Passed positional arguments fill positional parameters first and then
/// keyword parameters in declaration order. Keyword arguments then fill the
/// remaining positional parameters, and finally the remaining keyword ones.
pub(crate) fn match_call(
    visitor: &ExprVisitor<'_>,
    declaration: &Macro,
    arguments: &CallArguments,
    call: &Expression,
) -> InferResult<Structure> {
    let mut passed_args = Vec::with_capacity(arguments.positional.len());
    for expr in &arguments.positional {
        let (rtype, _) = visitor.visit(expr, &Context::predict(Shape::Unknown, expr))?;
        passed_args.push(PassedArgument { expr, rtype });
    }
    let mut passed_kwargs = Vec::with_capacity(arguments.keywords.len());
    for keyword in &arguments.keywords {
        let expr = &keyword.value;
        let (rtype, _) = visitor.visit(expr, &Context::predict(Shape::Unknown, expr))?;
        passed_kwargs.push(PassedKeyword {
            name: &keyword.name,
            expr,
            rtype,
        });
    }

    let mut expected_args = declaration.args.clone();
    let mut expected_kwargs = declaration.kwargs.clone();
    let mut structure = Structure::dictionary();

    match_positional(visitor, &mut passed_args, &mut expected_args, &mut structure)?;
    match_positional(visitor, &mut passed_args, &mut expected_kwargs, &mut structure)?;
    match_keywords(visitor, &mut passed_kwargs, &mut expected_args, &mut structure)?;
    match_keywords(visitor, &mut passed_kwargs, &mut expected_kwargs, &mut structure)?;

    if !passed_args.is_empty() || !expected_args.is_empty() {
        return Err(InferError::invalid_expression(
            call,
            format!(
                "incorrect usage of \"{}\". it takes exactly {} positional arguments",
                declaration.name,
                declaration.args.len()
            ),
        ));
    }
    if let Some(keyword) = passed_kwargs.first() {
        return Err(InferError::invalid_expression(
            call,
            format!(
                "incorrect usage of \"{}\". unknown keyword argument \"{}\" is passed",
                declaration.name, keyword.name
            ),
        ));
    }
    Ok(structure)
}

fn match_positional(
    visitor: &ExprVisitor<'_>,
    passed: &mut Vec<PassedArgument<'_>>,
    expected: &mut Vec<Parameter>,
    structure: &mut Structure,
) -> InferResult<()> {
    let count = passed.len().min(expected.len());
    for (argument, (_, parameter)) in passed.drain(..count).zip(expected.drain(..count)) {
        let predicted = merge(&argument.rtype, &parameter)?;
        let (_, argument_struct) = visitor.visit(argument.expr, &Context::new(predicted))?;
        merge_into(structure, &argument_struct)?;
    }
    Ok(())
}

fn match_keywords(
    visitor: &ExprVisitor<'_>,
    passed: &mut Vec<PassedKeyword<'_>>,
    expected: &mut Vec<Parameter>,
    structure: &mut Structure,
) -> InferResult<()> {
    let mut unmatched = Vec::with_capacity(passed.len());
    for keyword in passed.drain(..) {
        let Some(position) = expected.iter().position(|(name, _)| name == keyword.name) else {
            unmatched.push(keyword);
            continue;
        };
        let (_, parameter) = expected.remove(position);
        let predicted = merge(&keyword.rtype, &parameter)?;
        let (_, keyword_struct) = visitor.visit(keyword.expr, &Context::new(predicted))?;
        merge_into(structure, &keyword_struct)?;
    }
    *passed = unmatched;
    Ok(())
}
