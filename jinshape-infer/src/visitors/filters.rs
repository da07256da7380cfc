use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::{Expression, FilterExpression};
use crate::context::Context;
use crate::error::{InferError, InferResult};
use crate::merge::{merge, merge_into};
use crate::model::{ReturnKind, ScalarKind, Shape, Structure};

use super::expr::{ExprVisitor, Visit};

/// How a builtin filter constrains the value it is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterContract {
    /// The value is a `value` scalar (or unknown) and the filter produces `rtype`.
    Fixed { value: ReturnKind, rtype: ScalarKind },
    Batch,
    Default,
    Dictsort,
    Join,
    Element,
    Length,
    Sum,
    Sequence,
    List,
    Pprint,
    Xmlattr,
}

pub(crate) fn filter_contract(name: &str) -> Option<FilterContract> {
    use FilterContract::*;

    let contract = match name {
        "abs" | "float" | "int" | "round" => Fixed {
            value: ReturnKind::Number,
            rtype: ScalarKind::Number,
        },
        "capitalize" | "center" | "e" | "escape" | "forceescape" | "format" | "indent"
        | "lower" | "replace" | "safe" | "striptags" | "title" | "trim" | "truncate"
        | "upper" | "urlencode" | "urlize" | "wordwrap" => Fixed {
            value: ReturnKind::String,
            rtype: ScalarKind::String,
        },
        "filesizeformat" => Fixed {
            value: ReturnKind::Number,
            rtype: ScalarKind::String,
        },
        "string" => Fixed {
            value: ReturnKind::Scalar,
            rtype: ScalarKind::String,
        },
        "tojson" => Fixed {
            value: ReturnKind::Unknown,
            rtype: ScalarKind::String,
        },
        "wordcount" => Fixed {
            value: ReturnKind::String,
            rtype: ScalarKind::Number,
        },
        "batch" | "slice" => Batch,
        "default" | "d" => Default,
        "dictsort" => Dictsort,
        "join" => Join,
        "first" | "last" | "random" => Element,
        "length" | "count" => Length,
        "sum" => Sum,
        "groupby" | "map" | "reject" | "rejectattr" | "select" | "selectattr" | "sort"
        | "unique" | "reverse" => Sequence,
        "list" => List,
        "pprint" => Pprint,
        "xmlattr" => Xmlattr,
        _ => return None,
    };
    Some(contract)
}

/// Looks up `name`, rejecting `attr` and unknown filters.
pub(crate) fn require_filter(name: &str, node: &Expression) -> InferResult<FilterContract> {
    if name == "attr" {
        return Err(InferError::invalid_expression(
            node,
            "attr filter is not supported",
        ));
    }
    filter_contract(name)
        .ok_or_else(|| InferError::invalid_expression(node, format!("unknown filter \"{name}\"")))
}

impl<'a> ExprVisitor<'a> {
    pub(super) fn visit_filter(
        &self,
        expr: &Expression,
        filter: &FilterExpression,
        ctx: &Context,
    ) -> Visit {
        let contract = require_filter(&filter.name, expr)?;
        let node = filter.node.as_ref();
        let arguments = &filter.arguments;
        let empty_dictionary = || Shape::Dictionary(BTreeMap::new());

        // Arguments the contract consumes itself are skipped when the rest are
        // collected as plain requirements.
        let mut consumed_positional = 0;
        let mut extra = Structure::dictionary();

        let (node_struct, rtype_kind) = match contract {
            FilterContract::Fixed { value, rtype } => {
                ctx.meet(&Structure::scalar(), expr)?;
                (value.instantiate(node), Some(rtype))
            }
            FilterContract::Batch => {
                ctx.meet(&Structure::list(Structure::list(Structure::unknown())), expr)?;
                let line = node.line();
                let batches = Structure::list(Structure::list(Structure::unknown()).at_line(line))
                    .at_line(line);
                let element = merge(&batches, &ctx.predicted_struct(None))?
                    .into_item()
                    .unwrap_or_else(Structure::unknown);
                (element, None)
            }
            FilterContract::Default => {
                let default_rtype = match arguments.positional.first() {
                    Some(argument) => {
                        consumed_positional = 1;
                        let (rtype, structure) =
                            self.visit(argument, &Context::predict(Shape::Unknown, argument))?;
                        extra = structure;
                        rtype
                    }
                    None => Structure::unknown(),
                };
                let mut value = merge(&ctx.predicted_struct(None), &default_rtype)?;
                value.used_with_default = true;
                (value, None)
            }
            FilterContract::Dictsort => {
                ctx.meet(
                    &Structure::list(Structure::tuple(Some(vec![
                        Structure::scalar(),
                        Structure::unknown(),
                    ]))),
                    expr,
                )?;
                (Structure::from_expression(empty_dictionary(), node), None)
            }
            FilterContract::Join => {
                ctx.meet(&Structure::scalar(), expr)?;
                if let Some(separator) = arguments.positional.first() {
                    consumed_positional = 1;
                    let (_, structure) = self.visit(
                        separator,
                        &Context::predict(Shape::Scalar(ScalarKind::String), separator),
                    )?;
                    extra = structure;
                }
                let value = Structure::from_expression(
                    Shape::List(Arc::new(Structure::string())),
                    node,
                );
                (value, Some(ScalarKind::String))
            }
            FilterContract::Element => {
                let value = Structure::from_expression(
                    Shape::List(Arc::new(ctx.predicted_struct(None))),
                    node,
                );
                (value, None)
            }
            FilterContract::Length => {
                ctx.meet(&Structure::scalar(), expr)?;
                let value = Structure::from_expression(
                    Shape::List(Arc::new(Structure::unknown())),
                    node,
                );
                (value, Some(ScalarKind::Number))
            }
            FilterContract::Sum => {
                ctx.meet(&Structure::scalar(), expr)?;
                let value =
                    Structure::from_expression(Shape::List(Arc::new(Structure::scalar())), node);
                (value, Some(ScalarKind::Number))
            }
            FilterContract::Sequence => {
                ctx.meet(&Structure::list(Structure::unknown()), expr)?;
                let value = merge(
                    &Structure::list(Structure::unknown()).at_line(node.line()),
                    &ctx.predicted_struct(None),
                )?;
                (value, None)
            }
            FilterContract::List => {
                ctx.meet(&Structure::list(Structure::scalar()), expr)?;
                let element = merge(
                    &Structure::list(Structure::from_expression(
                        Shape::Scalar(ScalarKind::Scalar),
                        node,
                    )),
                    &ctx.predicted_struct(None),
                )?
                .into_item()
                .unwrap_or_else(Structure::unknown);
                (element, None)
            }
            FilterContract::Pprint => {
                ctx.meet(&Structure::scalar(), expr)?;
                (ctx.predicted_struct(None), None)
            }
            FilterContract::Xmlattr => {
                ctx.meet(&Structure::scalar(), expr)?;
                (
                    Structure::from_expression(empty_dictionary(), node),
                    Some(ScalarKind::String),
                )
            }
        };

        let (node_rtype, mut structure) = self.visit(node, &ctx.derive(node_struct))?;
        merge_into(&mut structure, &extra)?;

        let remaining = arguments
            .positional
            .iter()
            .skip(consumed_positional)
            .chain(arguments.keywords.iter().map(|keyword| &keyword.value));
        let remaining = self.visit_arguments(remaining, Shape::Unknown)?;
        merge_into(&mut structure, &remaining)?;

        let rtype = match rtype_kind {
            Some(kind) => Structure::from_expression(Shape::Scalar(kind), expr),
            None => node_rtype,
        };
        Ok((rtype, structure))
    }
}
