use std::sync::Arc;

use crate::ast::BinaryOperator;
use crate::error::{InferError, InferResult};
use crate::model::{Shape, Structure, TupleShape};

/// Extra metadata rule applied to every node a merge produces, after the
/// default rules.
pub type MetadataHook<'a> = &'a dyn Fn(&Structure, &Structure, &mut Structure);

/// Unifies two usages of the same value. `fst` is the earlier usage when
/// there is one and its `constant` and `may_be_defined` win. Line sets may
/// interleave: macro parameters carry their declaration line and included
/// templates bring their own line numbers.
pub fn merge(fst: &Structure, snd: &Structure) -> InferResult<Structure> {
    merge_with(fst, snd, None)
}

/// Folds `other` into `target`.
pub fn merge_into(target: &mut Structure, other: &Structure) -> InferResult<()> {
    *target = merge(target, other)?;
    Ok(())
}

pub fn merge_with(
    fst: &Structure,
    snd: &Structure,
    hook: Option<MetadataHook<'_>>,
) -> InferResult<Structure> {
    let shape = merge_shapes(fst, snd, hook)?;

    let mut result = Structure::new(shape);
    result.label = fst.label.clone().or_else(|| snd.label.clone());
    result.linenos = fst.linenos.union(&snd.linenos).copied().collect();
    result.constant = fst.constant;
    result.may_be_defined = fst.may_be_defined;
    result.used_with_default = fst.used_with_default && snd.used_with_default;
    result.checked_as_defined = fst.checked_as_defined && snd.checked_as_defined;
    result.checked_as_undefined = fst.checked_as_undefined && snd.checked_as_undefined;
    result.value = fst.value.clone().or_else(|| snd.value.clone());

    if let Some(hook) = hook {
        hook(fst, snd, &mut result);
    }
    Ok(result)
}

fn merge_shapes(
    fst: &Structure,
    snd: &Structure,
    hook: Option<MetadataHook<'_>>,
) -> InferResult<Shape> {
    match (&fst.shape, &snd.shape) {
        (Shape::Unknown, _) => Ok(snd.shape.clone()),
        (_, Shape::Unknown) => Ok(fst.shape.clone()),
        (Shape::Scalar(a), Shape::Scalar(b)) => {
            if a.is_subkind_of(*b) {
                Ok(Shape::Scalar(*a))
            } else if b.is_subkind_of(*a) {
                Ok(Shape::Scalar(*b))
            } else {
                Err(InferError::conflict(fst, snd))
            }
        }
        (Shape::Dictionary(a), Shape::Dictionary(b)) => {
            let mut fields = a.clone();
            for (key, value) in b {
                let merged = match a.get(key) {
                    Some(existing) => Arc::new(merge_with(existing, value, hook)?),
                    None => Arc::clone(value),
                };
                fields.insert(key.clone(), merged);
            }
            Ok(Shape::Dictionary(fields))
        }
        (Shape::List(a), Shape::List(b)) => Ok(Shape::List(Arc::new(merge_with(a, b, hook)?))),
        (Shape::Tuple(a), Shape::Tuple(b)) => merge_tuples(fst, snd, a, b, hook),
        _ => Err(InferError::conflict(fst, snd)),
    }
}

fn merge_tuples(
    fst: &Structure,
    snd: &Structure,
    a: &TupleShape,
    b: &TupleShape,
    hook: Option<MetadataHook<'_>>,
) -> InferResult<Shape> {
    let items = match (&a.items, &b.items) {
        (None, None) => None,
        (None, Some(items)) | (Some(items), None) => Some(items.clone()),
        (Some(left), Some(right)) => {
            if left.len() != right.len() && !(a.may_be_extended || b.may_be_extended) {
                return Err(InferError::conflict(fst, snd));
            }
            let padding = Arc::new(Structure::unknown());
            let len = left.len().max(right.len());
            let merged = (0..len)
                .map(|index| {
                    let l = left.get(index).unwrap_or(&padding);
                    let r = right.get(index).unwrap_or(&padding);
                    merge_with(l, r, hook).map(Arc::new)
                })
                .collect::<InferResult<Vec<_>>>()?;
            Some(merged)
        }
    };

    Ok(Shape::Tuple(TupleShape {
        items,
        may_be_extended: a.may_be_extended && b.may_be_extended,
    }))
}

/// Unifies the result types of two operands. Arithmetic `+` and `-` need
/// both operands to be of the same concrete kind unless one is unknown.
pub fn merge_rtypes(
    fst: &Structure,
    snd: &Structure,
    operator: Option<BinaryOperator>,
) -> InferResult<Structure> {
    if matches!(
        operator,
        Some(BinaryOperator::Add) | Some(BinaryOperator::Subtract)
    ) && !fst.is_unknown()
        && !snd.is_unknown()
        && fst.kind_name() != snd.kind_name()
    {
        return Err(InferError::conflict(fst, snd));
    }
    merge(fst, snd)
}

/// Hook for `and`/`or`: a check on either side counts.
pub fn disjoin_checks(fst: &Structure, snd: &Structure, result: &mut Structure) {
    result.checked_as_defined = fst.checked_as_defined || snd.checked_as_defined;
    result.checked_as_undefined = fst.checked_as_undefined || snd.checked_as_undefined;
}
