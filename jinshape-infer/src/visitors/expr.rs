use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::{
    CallExpression, ConditionalExpression, DictEntry, Expression, ExpressionKind,
    GetitemExpression, Literal, TestExpression, UnaryOperator,
};
use crate::config::{Config, IntegerIndexPolicy, VariableIndexPolicy};
use crate::context::Context;
use crate::error::{InferError, InferResult};
use crate::macros::{self, MacroRegistry};
use crate::merge::{disjoin_checks, merge, merge_into, merge_rtypes, merge_with};
use crate::model::{ReturnKind, ScalarKind, Shape, Structure, TupleShape};

use super::reconcile_checks;

// Under the tuple policy `xs[i]` pads `i` unknown slots in front of the
// indexed one.
const MAX_TUPLE_INDEX: usize = 1024;

/// Result type and variable requirements of one expression.
pub type Visit = InferResult<(Structure, Structure)>;

/// Walks expressions, pushing predictions down and collecting the
/// requirements on every variable the expression mentions.
pub struct ExprVisitor<'a> {
    pub(super) config: &'a Config,
    macros: &'a MacroRegistry,
}

enum DictKey<'e> {
    Keyword(&'e str),
    Expression(&'e Expression),
}

impl<'a> ExprVisitor<'a> {
    pub fn new(config: &'a Config, macros: &'a MacroRegistry) -> Self {
        Self { config, macros }
    }

    pub fn visit(&self, expr: &Expression, ctx: &Context) -> Visit {
        match &expr.kind {
            ExpressionKind::Name(name) => Ok((
                ctx.return_kind.instantiate(expr),
                Structure::dictionary().with_field(name.clone(), ctx.predicted_struct(Some(name))),
            )),
            ExpressionKind::Literal(literal) => self.visit_literal(expr, literal, ctx),
            ExpressionKind::TemplateData(_) => Ok((Structure::scalar(), Structure::dictionary())),
            ExpressionKind::Tuple(items) => self.visit_tuple(expr, items, ctx),
            ExpressionKind::List(items) => self.visit_list(expr, items, ctx),
            ExpressionKind::Dict(entries) => {
                let entries = entries
                    .iter()
                    .map(|DictEntry { key, value }| (DictKey::Expression(key), value));
                self.visit_dict(expr, entries, ctx)
            }
            ExpressionKind::Getattr(getattr) => {
                let predicted = Structure::from_expression(Shape::Dictionary(BTreeMap::new()), expr)
                    .with_field(
                        getattr.attribute.clone(),
                        ctx.predicted_struct(Some(&getattr.attribute)),
                    );
                self.visit(&getattr.object, &ctx.derive(predicted))
            }
            ExpressionKind::Getitem(getitem) => self.visit_getitem(expr, getitem, ctx),
            ExpressionKind::Slice(slice) => {
                let mut structure = Structure::dictionary();
                for part in [&slice.start, &slice.stop, &slice.step].into_iter().flatten() {
                    let part_ctx = Context::with_return(
                        Structure::from_expression(Shape::Scalar(ScalarKind::Number), part),
                        ReturnKind::Number,
                    );
                    let (_, part_struct) = self.visit(part, &part_ctx)?;
                    merge_into(&mut structure, &part_struct)?;
                }
                Ok((Structure::unknown(), structure))
            }
            ExpressionKind::Binary(binary) => {
                let (left_rtype, left_struct) = self.visit(&binary.left, ctx)?;
                let (right_rtype, right_struct) = self.visit(&binary.right, ctx)?;
                let rtype = merge_rtypes(&left_rtype, &right_rtype, Some(binary.operator))?;
                let structure = if binary.operator.is_logical() {
                    merge_with(&left_struct, &right_struct, Some(&disjoin_checks))?
                } else {
                    merge(&left_struct, &right_struct)?
                };
                Ok((rtype, structure))
            }
            ExpressionKind::Unary(unary) => {
                let (rtype, mut structure) = self.visit(&unary.operand, ctx)?;
                if unary.operator == UnaryOperator::Not {
                    swap_checks(&mut structure);
                }
                Ok((rtype, structure))
            }
            ExpressionKind::Compare(compare) => {
                ctx.meet(&Structure::boolean(), expr)?;
                let (_, mut structure) = self.visit(
                    &compare.left,
                    &Context::predict(Shape::Unknown, &compare.left),
                )?;
                for (_, operand) in &compare.comparisons {
                    let (_, operand_struct) =
                        self.visit(operand, &Context::predict(Shape::Unknown, operand))?;
                    merge_into(&mut structure, &operand_struct)?;
                }
                Ok((
                    Structure::from_expression(Shape::Scalar(ScalarKind::Boolean), expr),
                    structure,
                ))
            }
            ExpressionKind::Concat(nodes) => {
                ctx.meet(&Structure::scalar(), expr)?;
                let mut structure = Structure::dictionary();
                for node in nodes {
                    let (_, node_struct) = self.visit(
                        node,
                        &Context::predict(Shape::Scalar(ScalarKind::String), node),
                    )?;
                    merge_into(&mut structure, &node_struct)?;
                }
                Ok((
                    Structure::from_expression(Shape::Scalar(ScalarKind::String), expr),
                    structure,
                ))
            }
            ExpressionKind::Conditional(conditional) => {
                self.visit_conditional(conditional, ctx)
            }
            ExpressionKind::Call(call) => self.visit_call(expr, call, ctx),
            ExpressionKind::Filter(filter) => self.visit_filter(expr, filter, ctx),
            ExpressionKind::Test(test) => self.visit_test(expr, test, ctx),
        }
    }

    /// Prediction for a condition in `if`, ternaries and loop filters.
    pub fn condition_context(&self, test: &Expression) -> Context {
        let shape = if self.config.boolean_conditions {
            Shape::Scalar(ScalarKind::Boolean)
        } else {
            Shape::Unknown
        };
        Context::predict(shape, test)
    }

    fn visit_literal(&self, expr: &Expression, literal: &Literal, ctx: &Context) -> Visit {
        ctx.meet(&Structure::scalar(), expr)?;
        let kind = match literal {
            Literal::String(_) => ScalarKind::String,
            Literal::Integer(_) | Literal::Float(_) => ScalarKind::Number,
            Literal::Boolean(_) => ScalarKind::Boolean,
            Literal::None => ScalarKind::Scalar,
        };
        Ok((
            Structure::from_expression(Shape::Scalar(kind), expr).as_constant(),
            Structure::dictionary(),
        ))
    }

    fn visit_tuple(&self, expr: &Expression, items: &[Expression], ctx: &Context) -> Visit {
        ctx.meet(&Structure::tuple(None), expr)?;
        let slots = ctx.predicted.tuple_items();

        let mut structure = Structure::dictionary();
        let mut item_rtypes = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let item_ctx = match slots.and_then(|slots| slots.get(index)) {
                Some(slot) => ctx.derive(slot.as_ref().clone()),
                None => Context::predict(Shape::Unknown, item),
            };
            let (item_rtype, item_struct) = self.visit(item, &item_ctx)?;
            item_rtypes.push(Arc::new(item_rtype));
            merge_into(&mut structure, &item_struct)?;
        }

        let shape = Shape::Tuple(TupleShape {
            items: Some(item_rtypes),
            may_be_extended: false,
        });
        Ok((Structure::from_expression(shape, expr).as_constant(), structure))
    }

    fn visit_list(&self, expr: &Expression, items: &[Expression], ctx: &Context) -> Visit {
        ctx.meet(&Structure::list(Structure::unknown()), expr)?;
        let element = merge(
            &Structure::list(Structure::unknown()),
            &ctx.predicted_struct(None),
        )?
        .into_item()
        .unwrap_or_else(Structure::unknown);

        let mut structure = Structure::dictionary();
        let mut element_rtype: Option<Structure> = None;
        for item in items {
            let (item_rtype, item_struct) = self.visit(item, &Context::new(element.clone()))?;
            merge_into(&mut structure, &item_struct)?;
            element_rtype = Some(match element_rtype {
                None => item_rtype,
                Some(previous) => merge_rtypes(&previous, &item_rtype, None)?,
            });
        }

        let element_rtype = element_rtype.unwrap_or_else(Structure::unknown);
        let rtype = Structure::from_expression(Shape::List(Arc::new(element_rtype)), expr);
        Ok((rtype.as_constant(), structure))
    }

    fn visit_dict<'e>(
        &self,
        expr: &Expression,
        entries: impl Iterator<Item = (DictKey<'e>, &'e Expression)>,
        ctx: &Context,
    ) -> Visit {
        ctx.meet(&Structure::dictionary(), expr)?;
        let mut rtype =
            Structure::from_expression(Shape::Dictionary(BTreeMap::new()), expr).as_constant();
        let mut structure = Structure::dictionary();

        for (key, value) in entries {
            let (value_rtype, value_struct) =
                self.visit(value, &Context::predict(Shape::Unknown, value))?;
            merge_into(&mut structure, &value_struct)?;
            match key {
                DictKey::Keyword(name) => rtype.set_field(name, value_rtype),
                DictKey::Expression(key) => {
                    let (_, key_struct) =
                        self.visit(key, &Context::predict(Shape::Scalar(ScalarKind::Scalar), key))?;
                    merge_into(&mut structure, &key_struct)?;
                    if let Some(Literal::String(name)) = key.as_literal() {
                        rtype.set_field(name.clone(), value_rtype);
                    }
                }
            }
        }
        Ok((rtype, structure))
    }

    fn visit_getitem(&self, expr: &Expression, getitem: &GetitemExpression, ctx: &Context) -> Visit {
        let index = getitem.index.as_ref();
        let predicted = match (integer_index(index), &index.kind) {
            (Some(value), _) => self.predict_integer_index(expr, index, value, ctx)?,
            (None, ExpressionKind::Literal(Literal::String(key))) => {
                Structure::from_expression(Shape::Dictionary(BTreeMap::new()), expr)
                    .with_field(key.clone(), ctx.predicted_struct(Some(key)))
            }
            (None, ExpressionKind::Literal(other)) => {
                return Err(InferError::invalid_expression(
                    index,
                    format!(
                        "{} is not supported as an index for a list or a key for a dictionary",
                        literal_text(other)
                    ),
                ));
            }
            (None, ExpressionKind::Slice(_)) => {
                if ctx.predicted.is_list() {
                    ctx.predicted_struct(None)
                } else {
                    Structure::from_expression(
                        Shape::List(Arc::new(ctx.predicted_struct(None))),
                        expr,
                    )
                }
            }
            (None, _) => match self.config.variable_index_policy {
                VariableIndexPolicy::List => Structure::from_expression(
                    Shape::List(Arc::new(ctx.predicted_struct(None))),
                    expr,
                ),
                VariableIndexPolicy::Dictionary => {
                    Structure::from_expression(Shape::Dictionary(BTreeMap::new()), expr)
                }
            },
        };

        let (_, index_struct) =
            self.visit(index, &Context::predict(Shape::Scalar(ScalarKind::Scalar), index))?;
        let (rtype, structure) = self.visit(&getitem.object, &ctx.derive(predicted))?;
        Ok((rtype, merge(&structure, &index_struct)?))
    }

    fn predict_integer_index(
        &self,
        expr: &Expression,
        index: &Expression,
        value: i64,
        ctx: &Context,
    ) -> InferResult<Structure> {
        let predicted = match self.config.integer_index_policy {
            IntegerIndexPolicy::List => Structure::from_expression(
                Shape::List(Arc::new(ctx.predicted_struct(None))),
                expr,
            ),
            IntegerIndexPolicy::Dictionary => {
                Structure::from_expression(Shape::Dictionary(BTreeMap::new()), expr)
                    .with_field(value.to_string(), ctx.predicted_struct(None))
            }
            IntegerIndexPolicy::Tuple => {
                let position = usize::try_from(value).map_err(|_| {
                    InferError::invalid_expression(
                        index,
                        format!("negative index {value} is not supported for a tuple"),
                    )
                })?;
                if position > MAX_TUPLE_INDEX {
                    return Err(InferError::invalid_expression(
                        index,
                        format!(
                            "index {value} is too large for a tuple (at most {MAX_TUPLE_INDEX})"
                        ),
                    ));
                }
                let mut items = vec![Arc::new(Structure::unknown()); position];
                items.push(Arc::new(ctx.predicted_struct(None)));
                let shape = Shape::Tuple(TupleShape {
                    items: Some(items),
                    may_be_extended: true,
                });
                Structure::from_expression(shape, expr)
            }
        };
        Ok(predicted)
    }

    fn visit_conditional(&self, conditional: &ConditionalExpression, ctx: &Context) -> Visit {
        let test = conditional.test.as_ref();
        let (_, test_struct) = self.visit(test, &self.condition_context(test))?;
        let (if_rtype, if_struct) = self.visit(&conditional.then_branch, ctx)?;
        let (else_rtype, else_struct) = match &conditional.else_branch {
            Some(branch) => self.visit(branch, ctx)?,
            None => (Structure::unknown(), Structure::dictionary()),
        };

        let mut structure = merge(&merge(&if_struct, &test_struct)?, &else_struct)?;
        reconcile_checks(&mut structure, &test_struct, &if_struct, &else_struct);
        let rtype = merge_rtypes(&if_rtype, &else_rtype, None)?;
        Ok((rtype, structure))
    }

    fn visit_test(&self, expr: &Expression, test: &TestExpression, ctx: &Context) -> Visit {
        let name = test.name.as_str();
        let value_shape = match name {
            "divisibleby" | "even" | "odd" => Shape::Scalar(ScalarKind::Number),
            "escaped" | "lower" | "upper" => Shape::Scalar(ScalarKind::String),
            "defined" | "undefined" | "equalto" | "eq" | "ne" | "lt" | "le" | "gt" | "ge"
            | "sameas" | "iterable" | "mapping" | "none" | "number" | "string" | "sequence"
            | "boolean" | "integer" | "float" | "true" | "false" | "in" => Shape::Unknown,
            _ => {
                return Err(InferError::invalid_expression(
                    expr,
                    format!("unknown test \"{name}\""),
                ))
            }
        };
        ctx.meet(&Structure::boolean(), expr)?;

        let node = test.node.as_ref();
        let value_ctx =
            Context::with_return(Structure::from_expression(value_shape, node), ReturnKind::Boolean);
        let (_, mut structure) = self.visit(node, &value_ctx)?;

        if name == "divisibleby" {
            let Some(divisor) = test.arguments.positional.first() else {
                return Err(InferError::invalid_expression(
                    expr,
                    "divisibleby must have an argument",
                ));
            };
            let (_, divisor_struct) =
                self.visit(divisor, &Context::predict(Shape::Scalar(ScalarKind::Number), divisor))?;
            merge_into(&mut structure, &divisor_struct)?;
        } else {
            for argument in test.arguments.expressions() {
                let (_, argument_struct) =
                    self.visit(argument, &Context::predict(Shape::Unknown, argument))?;
                merge_into(&mut structure, &argument_struct)?;
            }
        }

        if let Some(variable) = node.as_name() {
            if let Some(entry) = structure.field_mut(variable) {
                match name {
                    "defined" => entry.checked_as_defined = true,
                    "undefined" => entry.checked_as_undefined = true,
                    _ => {}
                }
            }
        }

        Ok((
            Structure::from_expression(Shape::Scalar(ScalarKind::Boolean), expr),
            structure,
        ))
    }

    fn visit_call(&self, expr: &Expression, call: &CallExpression, ctx: &Context) -> Visit {
        if call.arguments.has_dynamic() {
            return Err(InferError::invalid_expression(
                expr,
                "*args and **kwargs are not supported",
            ));
        }

        match &call.callee.kind {
            ExpressionKind::Name(name) => match name.as_str() {
                "range" => {
                    ctx.meet(&Structure::list(Structure::unknown()), expr)?;
                    let structure = self.visit_arguments(
                        call.arguments.expressions(),
                        Shape::Scalar(ScalarKind::Number),
                    )?;
                    let rtype = Structure::from_expression(
                        Shape::List(Arc::new(Structure::number())),
                        expr,
                    );
                    Ok((rtype, structure))
                }
                "lipsum" => {
                    ctx.meet(&Structure::scalar(), expr)?;
                    let structure = self.visit_arguments(
                        call.arguments.expressions(),
                        Shape::Scalar(ScalarKind::Scalar),
                    )?;
                    Ok((
                        Structure::from_expression(Shape::Scalar(ScalarKind::String), expr),
                        structure,
                    ))
                }
                "dict" => {
                    if !call.arguments.positional.is_empty() {
                        return Err(InferError::invalid_expression(
                            expr,
                            "dict accepts only keyword arguments",
                        ));
                    }
                    let entries = call
                        .arguments
                        .keywords
                        .iter()
                        .map(|keyword| (DictKey::Keyword(&keyword.name), &keyword.value));
                    self.visit_dict(expr, entries, ctx)
                }
                // Block bodies are substituted before the walk, so `super()`
                // and recursive `loop()` only print.
                "super" | "loop" => {
                    ctx.meet(&Structure::scalar(), expr)?;
                    let structure =
                        self.visit_arguments(call.arguments.expressions(), Shape::Unknown)?;
                    Ok((
                        Structure::from_expression(Shape::Scalar(ScalarKind::String), expr),
                        structure,
                    ))
                }
                _ => match self.macros.get(name) {
                    Some(declaration) => {
                        ctx.meet(&Structure::scalar(), expr)?;
                        let structure =
                            macros::match_call(self, declaration, &call.arguments, expr)?;
                        Ok((
                            Structure::from_expression(Shape::Scalar(ScalarKind::String), expr),
                            structure,
                        ))
                    }
                    None => Err(InferError::invalid_expression(
                        expr,
                        format!("\"{name}\" call is not supported"),
                    )),
                },
            },
            ExpressionKind::Getattr(getattr) => {
                self.visit_method_call(expr, &getattr.object, &getattr.attribute, call, ctx)
            }
            _ => Err(InferError::invalid_expression(
                expr,
                format!("calling {} is not supported", call.callee.describe()),
            )),
        }
    }

    fn visit_method_call(
        &self,
        expr: &Expression,
        receiver: &Expression,
        method: &str,
        call: &CallExpression,
        ctx: &Context,
    ) -> Visit {
        let rtype = match method {
            "startswith" | "endswith" => Structure::boolean(),
            "split" => Structure::list(Structure::string()),
            "lower" | "upper" | "strip" | "lstrip" | "rstrip" | "title" | "capitalize"
            | "replace" | "format" => Structure::string(),
            "keys" | "values" | "items" => {
                return self.visit_dict_method(expr, receiver, method, call, ctx);
            }
            _ => {
                return Err(InferError::invalid_expression(
                    expr,
                    format!("\"{method}\" call is not supported"),
                ))
            }
        };

        let rtype = rtype.at_line(expr.line());
        ctx.meet(&rtype, expr)?;
        let (_, mut structure) = self.visit(
            receiver,
            &Context::predict(Shape::Scalar(ScalarKind::String), receiver),
        )?;
        let arguments = self.visit_arguments(
            call.arguments.expressions(),
            Shape::Scalar(ScalarKind::String),
        )?;
        merge_into(&mut structure, &arguments)?;
        Ok((rtype, structure))
    }

    fn visit_dict_method(
        &self,
        expr: &Expression,
        receiver: &Expression,
        method: &str,
        call: &CallExpression,
        ctx: &Context,
    ) -> Visit {
        let element = match method {
            "keys" => Structure::scalar(),
            "values" => Structure::unknown(),
            _ => Structure::tuple(Some(vec![Structure::scalar(), Structure::unknown()])),
        };
        let rtype = Structure::from_expression(Shape::List(Arc::new(element)), expr);
        ctx.meet(&rtype, expr)?;

        let (_, mut structure) = self.visit(
            receiver,
            &Context::predict(Shape::Dictionary(BTreeMap::new()), receiver),
        )?;
        let arguments = self.visit_arguments(call.arguments.expressions(), Shape::Unknown)?;
        merge_into(&mut structure, &arguments)?;
        Ok((rtype, structure))
    }

    /// Visits every argument under a fresh prediction of `shape` and merges
    /// their requirements.
    pub(super) fn visit_arguments<'e>(
        &self,
        arguments: impl Iterator<Item = &'e Expression>,
        shape: Shape,
    ) -> InferResult<Structure> {
        let mut structure = Structure::dictionary();
        for argument in arguments {
            let (_, argument_struct) =
                self.visit(argument, &Context::predict(shape.clone(), argument))?;
            merge_into(&mut structure, &argument_struct)?;
        }
        Ok(structure)
    }
}

/// `xs[2]` and `xs[-1]`; the parser keeps the sign as a unary operator.
fn integer_index(index: &Expression) -> Option<i64> {
    match &index.kind {
        ExpressionKind::Literal(Literal::Integer(value)) => Some(*value),
        ExpressionKind::Unary(unary) if unary.operator == UnaryOperator::Negative => {
            match unary.operand.as_literal() {
                Some(Literal::Integer(value)) => value.checked_neg(),
                _ => None,
            }
        }
        _ => None,
    }
}

/// `not` turns a presence check into an absence check and back, for the
/// names directly under it.
fn swap_checks(structure: &mut Structure) {
    let names: Vec<String> = match structure.fields() {
        Some(fields) => fields.keys().cloned().collect(),
        None => return,
    };
    for name in names {
        if let Some(entry) = structure.field_mut(&name) {
            std::mem::swap(&mut entry.checked_as_defined, &mut entry.checked_as_undefined);
        }
    }
}

fn literal_text(literal: &Literal) -> String {
    match literal {
        Literal::String(value) => format!("'{value}'"),
        Literal::Integer(value) => value.to_string(),
        Literal::Float(value) => value.to_string(),
        Literal::Boolean(true) => "True".to_string(),
        Literal::Boolean(false) => "False".to_string(),
        Literal::None => "None".to_string(),
    }
}
