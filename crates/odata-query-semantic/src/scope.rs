//! Range-variable scopes
//!
//! `$it` lives in the outermost scope for the whole bind. Each `any`/`all`
//! enters one nested scope holding its lambda variable and leaves it once
//! the predicate is bound.

use crate::nodes::RangeVariable;

#[derive(Debug, Clone)]
pub struct ScopeStack {
    it: RangeVariable,
    lambdas: Vec<RangeVariable>,
}

impl ScopeStack {
    pub fn new(it: RangeVariable) -> Self {
        Self {
            it,
            lambdas: Vec::new(),
        }
    }

    pub fn it(&self) -> &RangeVariable {
        &self.it
    }

    /// Innermost variable: the current lambda variable, else `$it`
    pub fn this(&self) -> &RangeVariable {
        self.lambdas.last().unwrap_or(&self.it)
    }

    /// Nearest variable with this name; inner lambdas shadow outer ones
    pub fn lookup(&self, name: &str) -> Option<&RangeVariable> {
        match name {
            RangeVariable::IT => Some(&self.it),
            "$this" => Some(self.this()),
            _ => self.lambdas.iter().rev().find(|v| v.name == name),
        }
    }

    pub fn enter(&mut self, variable: RangeVariable) {
        self.lambdas.push(variable);
    }

    pub fn leave(&mut self) -> Option<RangeVariable> {
        self.lambdas.pop()
    }

    /// Number of open lambda scopes
    pub fn depth(&self) -> usize {
        self.lambdas.len()
    }
}
