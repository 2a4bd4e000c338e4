//! The typed, name-resolved AST handed to the code generator. Lexing,
//! parsing, and type checking happen in an external front end; by the time a
//! module reaches this crate every expression carries its static type and
//! every identifier its resolved binding. A violation of that contract is the
//! front end's fault and aborts compilation of the unit.

use crate::{
    intern::InternedSymbol,
    middle::ty::{Field, Type},
};

/// Name of the builtin recognized by the code generator and lowered to the
/// runtime's low-level print routine
pub const PRINTLN: &str = "println";

#[derive(Debug)]
pub struct Module {
    pub functions: Vec<FunctionDefinition>,
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub name: InternedSymbol,
    pub parameters: Vec<Field>,
    pub results: Vec<Field>,
    pub body: Vec<Statement>,
}

impl FunctionDefinition {
    /// The function's signature as a type, for the global symbol table
    pub fn signature(&self) -> Type {
        Type::Function {
            parameters: self.parameters.clone(),
            results: self.results.clone(),
        }
    }
}

#[derive(Debug)]
pub enum Statement {
    Empty,
    Expression(Expression),
    Return(Vec<Expression>),
}

#[derive(Debug)]
pub struct Expression {
    pub ty: Type,
    pub kind: ExpressionKind,
}

#[derive(Debug)]
pub enum ExpressionKind {
    Literal(Literal),
    Call {
        target: Box<Expression>,
        arguments: Vec<Expression>,
    },
    /// A variable or function reference. `binding` is the static type
    /// attached by the front end's name resolution; `None` marks a contract
    /// violation, not a recoverable state.
    Identifier {
        name: InternedSymbol,
        binding: Option<Type>,
    },
}

#[derive(Debug)]
pub enum Literal {
    String(InternedSymbol),
    Integer(i64),
}

impl Expression {
    pub fn string_literal(text: &str) -> Self {
        Self {
            ty: Type::STRING,
            kind: ExpressionKind::Literal(Literal::String(InternedSymbol::new(text))),
        }
    }

    pub fn integer_literal(value: i64) -> Self {
        Self {
            ty: Type::INT,
            kind: ExpressionKind::Literal(Literal::Integer(value)),
        }
    }

    pub fn identifier(name: &str, ty: Type) -> Self {
        Self {
            ty: ty.clone(),
            kind: ExpressionKind::Identifier {
                name: InternedSymbol::new(name),
                binding: Some(ty),
            },
        }
    }

    /// A call to a named function whose static type is the tuple of its
    /// declared results
    pub fn call(target: &str, arguments: Vec<Expression>, results: Vec<Field>) -> Self {
        Self {
            ty: Type::Tuple(results),
            kind: ExpressionKind::Call {
                target: Box::new(Expression {
                    ty: Type::UNIT,
                    kind: ExpressionKind::Identifier {
                        name: InternedSymbol::new(target),
                        binding: None,
                    },
                }),
                arguments,
            },
        }
    }

    pub fn println(argument: Expression) -> Self {
        Self::call(PRINTLN, vec![argument], Vec::new())
    }
}
