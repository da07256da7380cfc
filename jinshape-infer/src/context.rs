use crate::ast::Expression;
use crate::error::{InferError, InferResult};
use crate::merge::merge;
use crate::model::{ReturnKind, Shape, Structure};

/// What the surroundings of an expression expect from it.
///
/// `predicted` travels top-down: `{{ user.name }}` visits `user` with a
/// prediction of `{'name': <scalar>}`. `return_kind` is what a terminal name
/// reports as its own result type.
#[derive(Debug, Clone)]
pub struct Context {
    pub predicted: Structure,
    pub return_kind: ReturnKind,
}

impl Context {
    pub fn new(predicted: Structure) -> Self {
        Self {
            predicted,
            return_kind: ReturnKind::Unknown,
        }
    }

    pub fn with_return(predicted: Structure, return_kind: ReturnKind) -> Self {
        Self {
            predicted,
            return_kind,
        }
    }

    pub fn predict(shape: Shape, expr: &Expression) -> Self {
        Self::new(Structure::from_expression(shape, expr))
    }

    pub fn derive(&self, predicted: Structure) -> Self {
        Self {
            predicted,
            return_kind: self.return_kind,
        }
    }

    pub fn predicted_struct(&self, label: Option<&str>) -> Structure {
        let mut structure = self.predicted.clone();
        if let Some(label) = label {
            structure.label = Some(label.to_string());
        }
        structure
    }

    pub fn meet(&self, actual: &Structure, node: &Expression) -> InferResult<()> {
        match merge(&self.predicted, actual) {
            Ok(_) => Ok(()),
            Err(_) => Err(InferError::UnexpectedExpression {
                expected: Box::new(self.predicted.clone()),
                actual_ast: Box::new(node.clone()),
                actual: Box::new(actual.clone()),
            }),
        }
    }
}
