// SPDX-License-Identifier: MIT

//! Abstract Syntax Tree for expressions

use serde_json::Value;

/// A parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Literal value: number, string, boolean or null
    Literal(Value),
    /// Dotted path into the context, e.g. `invoice.total`
    Path(Vec<String>),
    /// List literal: `[a, b, c]`
    List(Vec<Expression>),
    /// Prefix operator
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    /// Arithmetic or comparison
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Short-circuiting boolean combinator
    Logical {
        op: LogicalOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Built-in function call: `name(args...)`
    Call { name: String, args: Vec<Expression> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    /// `not` / `!`
    Not,
    /// `-`
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// `haystack contains needle`
    Contains,
    /// `needle in haystack`
    In,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

impl Expression {
    /// Names of every function called anywhere in the expression
    pub fn function_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_functions(&mut names);
        names
    }

    fn collect_functions<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expression::Literal(_) | Expression::Path(_) => {}
            Expression::List(items) => items.iter().for_each(|i| i.collect_functions(names)),
            Expression::Unary { operand, .. } => operand.collect_functions(names),
            Expression::Binary { left, right, .. } | Expression::Logical { left, right, .. } => {
                left.collect_functions(names);
                right.collect_functions(names);
            }
            Expression::Call { name, args } => {
                names.push(name.as_str());
                args.iter().for_each(|a| a.collect_functions(names));
            }
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Contains => "contains",
            BinaryOp::In => "in",
        };
        write!(f, "{}", s)
    }
}
