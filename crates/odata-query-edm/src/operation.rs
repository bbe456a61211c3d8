//! Functions and actions

use crate::types::TypeRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Function { is_composable: bool },
    Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationParameter {
    pub name: String,
    pub type_ref: TypeRef,
}

impl OperationParameter {
    pub fn new(name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
        }
    }
}

/// A function or action declared in a schema
///
/// For bound operations the first parameter is the binding parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub namespace: String,
    pub name: String,
    pub kind: OperationKind,
    pub is_bound: bool,
    pub parameters: Vec<OperationParameter>,
    pub return_type: Option<TypeRef>,
    pub entity_set_path: Option<String>,
}

impl Operation {
    pub fn function(namespace: impl Into<String>, name: impl Into<String>, return_type: TypeRef) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind: OperationKind::Function { is_composable: false },
            is_bound: false,
            parameters: Vec::new(),
            return_type: Some(return_type),
            entity_set_path: None,
        }
    }

    pub fn action(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind: OperationKind::Action,
            is_bound: false,
            parameters: Vec::new(),
            return_type: None,
            entity_set_path: None,
        }
    }

    pub fn bound(mut self) -> Self {
        self.is_bound = true;
        self
    }

    pub fn composable(mut self) -> Self {
        if let OperationKind::Function { .. } = self.kind {
            self.kind = OperationKind::Function { is_composable: true };
        }
        self
    }

    pub fn returns(mut self, return_type: TypeRef) -> Self {
        self.return_type = Some(return_type);
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, type_ref: TypeRef) -> Self {
        self.parameters.push(OperationParameter::new(name, type_ref));
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, OperationKind::Function { .. })
    }

    pub fn is_action(&self) -> bool {
        matches!(self.kind, OperationKind::Action)
    }

    pub fn is_composable(&self) -> bool {
        matches!(self.kind, OperationKind::Function { is_composable: true })
    }

    pub fn binding_parameter(&self) -> Option<&OperationParameter> {
        if self.is_bound {
            self.parameters.first()
        } else {
            None
        }
    }

    /// Parameters a caller supplies explicitly
    pub fn non_binding_parameters(&self) -> &[OperationParameter] {
        if self.is_bound && !self.parameters.is_empty() {
            &self.parameters[1..]
        } else {
            &self.parameters
        }
    }
}
