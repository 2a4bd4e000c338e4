use colored::Colorize;
use itertools::Itertools;

use crate::intern::InternedSymbol;

/// The handful of value shapes the Creek language exposes. Constructed once
/// per declaration, literal, or signature during code generation and shared
/// read-only from there on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// int, string
    Basic(BasicKind),
    /// A fixed list of named or anonymous members. The empty tuple is the
    /// "no value" type used for calls whose result is discarded.
    Tuple(Vec<Field>),
    /// A function signature. Functions are addresses, not values, so this
    /// type has no stack size.
    Function {
        parameters: Vec<Field>,
        results: Vec<Field>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicKind {
    Int,
    /// A (pointer, length) pair to some bytes
    String,
}

/// A member of a tuple or of a signature's parameter/result list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: Option<InternedSymbol>,
    pub ty: Type,
}

impl Field {
    pub fn named(name: &str, ty: Type) -> Self {
        Self {
            name: Some(InternedSymbol::new(name)),
            ty,
        }
    }

    pub fn anonymous(ty: Type) -> Self {
        Self { name: None, ty }
    }
}

/// Attempted to take the stack size of a type that has none
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsizableType(pub Type);

impl core::fmt::Display for UnsizableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "type {} has no size on the stack", self.0)
    }
}

impl std::error::Error for UnsizableType {}

impl Type {
    pub const INT: Type = Type::Basic(BasicKind::Int);
    pub const STRING: Type = Type::Basic(BasicKind::String);
    pub const UNIT: Type = Type::Tuple(Vec::new());

    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Tuple(fields) if fields.is_empty())
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::Basic(BasicKind::String))
    }

    /// Size in bytes of a value of this type
    pub fn size_of(&self) -> Result<u32, UnsizableType> {
        match self {
            Type::Basic(BasicKind::Int) => Ok(4),
            // pointer word + length word
            Type::Basic(BasicKind::String) => Ok(8),
            Type::Tuple(fields) => fields.iter().map(|field| field.ty.size_of()).sum(),
            Type::Function { .. } => Err(UnsizableType(self.clone())),
        }
    }

    /// [`size_of`](Self::size_of) rounded up to the next word. Stack slots
    /// are always word aligned; this rounding is the single alignment rule
    /// in the backend and every push, pop, and reservation goes through it.
    pub fn stack_slot_size(&self) -> Result<u32, UnsizableType> {
        Ok(self.size_of()?.next_multiple_of(4))
    }

    fn plain(&self) -> String {
        match self {
            Type::Basic(BasicKind::Int) => "int".to_owned(),
            Type::Basic(BasicKind::String) => "string".to_owned(),
            Type::Tuple(fields) => format!("({})", fields.iter().map(Field::plain).join(", ")),
            Type::Function {
                parameters,
                results,
            } => {
                let parameters = parameters.iter().map(Field::plain).join(", ");

                if results.is_empty() {
                    format!("func({parameters})")
                } else {
                    format!(
                        "func({parameters}) ({})",
                        results.iter().map(Field::plain).join(", ")
                    )
                }
            }
        }
    }

    pub fn colored(&self) -> colored::ColoredString {
        self.plain().yellow()
    }
}

impl Field {
    fn plain(&self) -> String {
        match self.name {
            Some(name) => format!("{name} {}", self.ty.plain()),
            None => self.ty.plain(),
        }
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.colored())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized_samples() -> Vec<Type> {
        vec![
            Type::INT,
            Type::STRING,
            Type::UNIT,
            Type::Tuple(vec![Field::anonymous(Type::INT)]),
            Type::Tuple(vec![
                Field::named("a", Type::INT),
                Field::named("b", Type::STRING),
            ]),
            Type::Tuple(vec![
                Field::anonymous(Type::Tuple(vec![Field::anonymous(Type::STRING)])),
                Field::anonymous(Type::INT),
            ]),
        ]
    }

    #[test]
    fn basic_sizes() {
        assert_eq!(Type::INT.size_of(), Ok(4));
        assert_eq!(Type::STRING.size_of(), Ok(8));
        assert_eq!(Type::UNIT.size_of(), Ok(0));
    }

    #[test]
    fn tuple_size_is_the_sum_of_its_members() {
        let pair = Type::Tuple(vec![
            Field::named("n", Type::INT),
            Field::named("s", Type::STRING),
        ]);

        assert_eq!(pair.size_of(), Ok(12));
    }

    #[test]
    fn slot_sizes_are_word_aligned_and_cover_the_value() {
        for ty in sized_samples() {
            let size = ty.size_of().unwrap();
            let slot = ty.stack_slot_size().unwrap();

            assert_eq!(slot % 4, 0, "slot of {ty} is not word aligned");
            assert!(slot >= size, "slot of {ty} does not cover the value");
        }
    }

    #[test]
    fn functions_have_no_size() {
        let signature = Type::Function {
            parameters: vec![Field::named("s", Type::STRING)],
            results: Vec::new(),
        };

        assert!(signature.size_of().is_err());
        assert!(signature.stack_slot_size().is_err());
    }

    #[test]
    fn display_is_a_parenthesized_comma_list() {
        let pair = Type::Tuple(vec![
            Field::named("n", Type::INT),
            Field::anonymous(Type::STRING),
        ]);

        assert_eq!(
            strip_ansi_escapes::strip_str(pair.to_string()),
            "(n int, string)"
        );
    }
}
