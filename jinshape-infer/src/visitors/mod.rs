mod expr;
mod filters;
mod stmt;

pub use expr::ExprVisitor;
pub use stmt::StmtVisitor;

use crate::model::Structure;

/// Reconciles `is defined` / `is undefined` checks after a conditional.
///
/// For every name the test checks, the branch taken when the variable is
/// absent decides what survives: the check flag is kept when that branch
/// does not touch the name or assigns it a constant, and an assignment there
/// makes the variable `may_be_defined`.
pub(crate) fn reconcile_checks(
    merged: &mut Structure,
    test: &Structure,
    body: &Structure,
    else_body: &Structure,
) {
    let Some(fields) = test.fields() else {
        return;
    };

    for (name, entry) in fields {
        let (absent, defined_check) = if entry.checked_as_defined {
            (else_body, true)
        } else if entry.checked_as_undefined {
            (body, false)
        } else {
            continue;
        };

        let assigned = absent.field(name).map(|usage| usage.constant);
        let Some(target) = merged.field_mut(name) else {
            continue;
        };
        let keep = assigned.unwrap_or(true);
        if defined_check {
            target.checked_as_defined = keep;
        } else {
            target.checked_as_undefined = keep;
        }
        if assigned == Some(true) {
            target.may_be_defined = true;
        }
    }
}
