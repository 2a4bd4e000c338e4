//! Stack scope bookkeeping for code generation.
//!
//! A [`Frame`] records, for one lexical scope, which names live in it and how
//! many bytes the scope currently holds on the hardware stack. Offsets stored
//! with each variable are relative to the frame's state at the moment of
//! definition; every push that happens afterwards shifts the variable's true
//! distance from the stack pointer. A name is therefore resolved against the
//! live size counters on every use, and the result must never be cached
//! across a push, pop, or definition.
//!
//! Frames are arena-allocated. Parent links are arena handles, chains are
//! strictly nested with the generator's traversal of the AST, and a
//! function's frames are dropped in bulk with its arena.

use hashbrown::HashMap;

use crate::{
    backend::{
        CodegenError,
        x86::{Instruction, Memory, Op32, Register},
    },
    index::{IndexVec, simple_index},
    intern::InternedSymbol,
    middle::ty::Type,
};

simple_index! {
    /// Handle of a [`Frame`] inside a [`FrameArena`]
    pub struct FrameId;
}

/// The wildcard name. Defining it never collides, so the generator also uses
/// it for anonymous temporaries whose bytes only need to be accounted for.
pub fn discard_name() -> InternedSymbol {
    InternedSymbol::new("_")
}

#[derive(Debug, Clone)]
struct StackVariable {
    ty: Type,
    /// Cumulative frame size at the moment of definition
    offset: u32,
}

/// One lexical scope's stack storage
#[derive(Debug)]
pub struct Frame {
    parent: Option<FrameId>,
    name: String,
    vars: HashMap<InternedSymbol, StackVariable>,
    size: u32,
    return_size: u32,
}

impl Frame {
    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes this scope currently holds on the stack
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Bytes of this scope reserved for return values, when it is a
    /// function's outermost frame
    pub fn return_size(&self) -> u32 {
        self.return_size
    }
}

/// Where a name resolved to. Stack offsets are measured upward from the
/// stack pointer and are only valid until the next push, pop, or definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedLocation {
    Stack { offset: u32, ty: Type },
    Global { name: InternedSymbol, ty: Type },
}

impl ResolvedLocation {
    pub fn ty(&self) -> &Type {
        match self {
            ResolvedLocation::Stack { ty, .. } => ty,
            ResolvedLocation::Global { ty, .. } => ty,
        }
    }

    /// The location as a memory operand
    pub fn address(&self) -> Memory {
        match self {
            ResolvedLocation::Stack { offset, .. } => {
                Memory::register_relative(*offset as i32, Register::STACK_POINTER)
            }
            ResolvedLocation::Global { name, .. } => Memory::absolute(*name),
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameArena {
    frames: IndexVec<FrameId, Frame>,
}

impl FrameArena {
    /// Open a fresh, empty scope under `parent`
    pub fn new_frame(&mut self, parent: Option<FrameId>, name: impl Into<String>) -> FrameId {
        self.frames.push(Frame {
            parent,
            name: name.into(),
            vars: HashMap::new(),
            size: 0,
            return_size: 0,
        })
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id]
    }

    pub fn set_return_size(&mut self, id: FrameId, bytes: u32) {
        self.frames[id].return_size = bytes;
    }

    /// Reserve a slot for `name` in `frame`, recording the cumulative offset.
    /// Aliases name the same storage; they are used to address anonymous
    /// return slots by position. Returns the reserved slot size in bytes.
    pub fn define_variable(
        &mut self,
        frame: FrameId,
        name: InternedSymbol,
        ty: &Type,
        aliases: &[InternedSymbol],
    ) -> Result<u32, CodegenError> {
        let slot = ty.stack_slot_size()?;
        let frame = &mut self.frames[frame];

        if frame.vars.contains_key(&name) && name != discard_name() {
            return Err(CodegenError::DuplicateDefinition {
                name,
                scope: frame.name.clone(),
            });
        }

        frame.size += slot;

        let variable = StackVariable {
            ty: ty.clone(),
            offset: frame.size,
        };

        for alias in aliases {
            frame.vars.insert(*alias, variable.clone());
        }
        frame.vars.insert(name, variable);

        Ok(slot)
    }

    /// Resolve `name` starting from `frame` and walking outward; the first
    /// scope holding the name wins, and the global table terminates the
    /// chain. The returned stack offset is recomputed from the live size
    /// counters, so intervening pushes since the definition are accounted
    /// for.
    pub fn lookup(
        &self,
        frame: FrameId,
        name: InternedSymbol,
        globals: &HashMap<InternedSymbol, Type>,
    ) -> Result<ResolvedLocation, CodegenError> {
        let mut distance = 0;
        let mut next = Some(frame);

        while let Some(id) = next {
            let frame = &self.frames[id];
            distance += frame.size;

            if let Some(variable) = frame.vars.get(&name) {
                return Ok(ResolvedLocation::Stack {
                    offset: distance - variable.offset,
                    ty: variable.ty.clone(),
                });
            }

            next = frame.parent;
        }

        match globals.get(&name) {
            Some(ty) => Ok(ResolvedLocation::Global {
                name,
                ty: ty.clone(),
            }),
            None => Err(CodegenError::UndefinedName { name }),
        }
    }

    /// Shrink `frame` by one slot of `ty` without emitting code. Used when
    /// the generator knows a value is consumed without an explicit pop
    /// instruction. Returns the freed byte count.
    pub fn pop(&mut self, frame: FrameId, ty: &Type) -> Result<u32, CodegenError> {
        let slot = ty.stack_slot_size()?;
        let frame = &mut self.frames[frame];

        debug_assert!(
            frame.size >= slot,
            "scope {} does not hold {slot} bytes to pop",
            frame.name
        );
        frame.size -= slot;

        Ok(slot)
    }

    /// Fold a raw instruction's declared stack effect into `frame` so the
    /// counters stay honest across escape-hatch text.
    pub fn note_raw_stack_effect(&mut self, frame: FrameId, stack_bytes: i32) {
        let frame = &mut self.frames[frame];
        let size = i64::from(frame.size) + i64::from(stack_bytes);

        debug_assert!(size >= 0, "raw text pops more than scope {} holds", frame.name);
        frame.size = size.max(0) as u32;
    }

    /// Pop the value on top of the stack into `name`'s storage, emitting the
    /// transfer and adjusting bookkeeping. Offsets are resolved after the
    /// bookkeeping pop so they are relative to the stack pointer as it
    /// stands once the value is gone.
    pub fn pop_to(
        &mut self,
        frame: FrameId,
        name: InternedSymbol,
        globals: &HashMap<InternedSymbol, Type>,
    ) -> Result<Vec<Instruction>, CodegenError> {
        let ty = self.lookup(frame, name, globals)?.ty().clone();
        let size = ty.size_of()?;
        let slot = ty.stack_slot_size()?;

        if size != slot {
            return Err(CodegenError::UnsupportedOperandSize { ty, size });
        }

        self.pop(frame, &ty)?;
        let location = self.lookup(frame, name, globals)?;
        let eax = Op32::Register(Register::Eax);

        match (slot, &location) {
            (4, _) => Ok(vec![
                Instruction::Pop(eax.clone()),
                Instruction::commented(
                    Instruction::Mov {
                        src: eax,
                        dest: Op32::Memory(location.address()),
                    },
                    format!("popping to variable {name}"),
                ),
            ]),
            (8, ResolvedLocation::Stack { offset, .. }) => {
                // The first pop moves the stack pointer one word before the
                // second store happens, so the same textual offset addresses
                // the pointer word and then the length word.
                let word = Op32::Memory(Memory::register_relative(
                    (offset + 4) as i32,
                    Register::STACK_POINTER,
                ));

                Ok(vec![
                    Instruction::Pop(eax.clone()),
                    Instruction::commented(
                        Instruction::Mov {
                            src: eax.clone(),
                            dest: word.clone(),
                        },
                        format!("popping to variable {name}"),
                    ),
                    Instruction::Pop(eax.clone()),
                    Instruction::commented(
                        Instruction::Mov { src: eax, dest: word },
                        format!("popping to variable {name}"),
                    ),
                ])
            }
            _ => Err(CodegenError::UnsupportedOperandSize { ty, size }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::x86::render, middle::ty::Field};

    fn arena_with_frame() -> (FrameArena, FrameId) {
        let mut arena = FrameArena::default();
        let frame = arena.new_frame(None, "test");

        (arena, frame)
    }

    fn no_globals() -> HashMap<InternedSymbol, Type> {
        HashMap::new()
    }

    fn sym(name: &str) -> InternedSymbol {
        InternedSymbol::new(name)
    }

    #[test]
    fn fresh_variable_sits_on_top_of_the_stack() {
        let (mut arena, frame) = arena_with_frame();

        arena
            .define_variable(frame, sym("x"), &Type::INT, &[])
            .unwrap();

        let location = arena.lookup(frame, sym("x"), &no_globals()).unwrap();

        assert_eq!(
            location,
            ResolvedLocation::Stack {
                offset: 0,
                ty: Type::INT,
            }
        );
    }

    #[test]
    fn lookup_is_idempotent_without_mutation() {
        let (mut arena, frame) = arena_with_frame();

        arena
            .define_variable(frame, sym("x"), &Type::STRING, &[])
            .unwrap();

        let first = arena.lookup(frame, sym("x"), &no_globals()).unwrap();
        let second = arena.lookup(frame, sym("x"), &no_globals()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn later_pushes_shift_earlier_variables() {
        let (mut arena, frame) = arena_with_frame();
        let globals = no_globals();

        arena
            .define_variable(frame, sym("x"), &Type::INT, &[])
            .unwrap();
        arena
            .define_variable(frame, sym("y"), &Type::STRING, &[])
            .unwrap();

        let x = arena.lookup(frame, sym("x"), &globals).unwrap();
        let y = arena.lookup(frame, sym("y"), &globals).unwrap();

        assert!(matches!(x, ResolvedLocation::Stack { offset: 8, .. }));
        assert!(matches!(y, ResolvedLocation::Stack { offset: 0, .. }));
    }

    #[test]
    fn inner_scopes_shadow_outer_ones() {
        let (mut arena, outer) = arena_with_frame();
        let inner = arena.new_frame(Some(outer), "inner");

        arena
            .define_variable(outer, sym("x"), &Type::INT, &[])
            .unwrap();
        arena
            .define_variable(inner, sym("x"), &Type::STRING, &[])
            .unwrap();

        let location = arena.lookup(inner, sym("x"), &no_globals()).unwrap();

        assert_eq!(
            location,
            ResolvedLocation::Stack {
                offset: 0,
                ty: Type::STRING,
            }
        );
    }

    #[test]
    fn outer_variables_account_for_inner_scope_growth() {
        let (mut arena, outer) = arena_with_frame();
        let inner = arena.new_frame(Some(outer), "inner");
        let globals = no_globals();

        arena
            .define_variable(outer, sym("x"), &Type::INT, &[])
            .unwrap();

        let before = arena.lookup(inner, sym("x"), &globals).unwrap();
        assert!(matches!(before, ResolvedLocation::Stack { offset: 0, .. }));

        arena
            .define_variable(inner, discard_name(), &Type::STRING, &[])
            .unwrap();

        let after = arena.lookup(inner, sym("x"), &globals).unwrap();
        assert!(matches!(after, ResolvedLocation::Stack { offset: 8, .. }));
    }

    #[test]
    fn duplicate_definitions_are_rejected() {
        let (mut arena, frame) = arena_with_frame();

        arena
            .define_variable(frame, sym("x"), &Type::INT, &[])
            .unwrap();

        let error = arena
            .define_variable(frame, sym("x"), &Type::INT, &[])
            .unwrap_err();

        assert!(matches!(
            error,
            CodegenError::DuplicateDefinition { name, .. } if name == sym("x")
        ));
    }

    #[test]
    fn the_discard_wildcard_redefines_freely() {
        let (mut arena, frame) = arena_with_frame();

        arena
            .define_variable(frame, discard_name(), &Type::INT, &[])
            .unwrap();
        arena
            .define_variable(frame, discard_name(), &Type::STRING, &[])
            .unwrap();

        assert_eq!(arena.frame(frame).size(), 12);
    }

    #[test]
    fn unknown_names_are_an_error() {
        let (arena, frame) = arena_with_frame();

        let error = arena.lookup(frame, sym("ghost"), &no_globals()).unwrap_err();

        assert!(matches!(
            error,
            CodegenError::UndefinedName { name } if name == sym("ghost")
        ));
    }

    #[test]
    fn globals_terminate_the_chain_and_resolve_symbolically() {
        let (mut arena, outer) = arena_with_frame();
        let inner = arena.new_frame(Some(outer), "inner");

        let mut globals = no_globals();
        let signature = Type::Function {
            parameters: Vec::new(),
            results: vec![Field::anonymous(Type::INT)],
        };
        globals.insert(sym("helper"), signature.clone());

        let location = arena.lookup(inner, sym("helper"), &globals).unwrap();

        assert_eq!(
            location,
            ResolvedLocation::Global {
                name: sym("helper"),
                ty: signature,
            }
        );
    }

    #[test]
    fn aliases_share_the_same_storage() {
        let (mut arena, frame) = arena_with_frame();
        let globals = no_globals();

        arena
            .define_variable(frame, sym("total"), &Type::INT, &[sym("ret.0")])
            .unwrap();

        let by_name = arena.lookup(frame, sym("total"), &globals).unwrap();
        let by_alias = arena.lookup(frame, sym("ret.0"), &globals).unwrap();

        assert_eq!(by_name, by_alias);
    }

    #[test]
    fn pop_frees_one_slot_of_bookkeeping() {
        let (mut arena, frame) = arena_with_frame();

        arena
            .define_variable(frame, sym("x"), &Type::INT, &[])
            .unwrap();
        arena
            .define_variable(frame, discard_name(), &Type::STRING, &[])
            .unwrap();

        let freed = arena.pop(frame, &Type::STRING).unwrap();

        assert_eq!(freed, 8);
        assert_eq!(arena.frame(frame).size(), 4);

        let x = arena.lookup(frame, sym("x"), &no_globals()).unwrap();
        assert!(matches!(x, ResolvedLocation::Stack { offset: 0, .. }));
    }

    #[test]
    fn raw_stack_effects_adjust_bookkeeping() {
        let (mut arena, frame) = arena_with_frame();

        arena
            .define_variable(frame, sym("x"), &Type::INT, &[])
            .unwrap();
        arena.note_raw_stack_effect(frame, 8);

        let x = arena.lookup(frame, sym("x"), &no_globals()).unwrap();
        assert!(matches!(x, ResolvedLocation::Stack { offset: 8, .. }));

        arena.note_raw_stack_effect(frame, -8);

        let x = arena.lookup(frame, sym("x"), &no_globals()).unwrap();
        assert!(matches!(x, ResolvedLocation::Stack { offset: 0, .. }));
    }

    #[test]
    fn pop_to_a_word_sized_variable() {
        let (mut arena, frame) = arena_with_frame();

        arena
            .define_variable(frame, sym("x"), &Type::INT, &[])
            .unwrap();
        // the value about to be stored
        arena
            .define_variable(frame, discard_name(), &Type::INT, &[])
            .unwrap();

        let code = arena.pop_to(frame, sym("x"), &no_globals()).unwrap();

        assert_eq!(
            render(&code),
            "\tpopl %eax\n\tmovl %eax, 0(%esp)\t# popping to variable x\n"
        );
        assert_eq!(arena.frame(frame).size(), 4);
    }

    #[test]
    fn pop_to_a_string_variable_moves_both_words() {
        let (mut arena, frame) = arena_with_frame();

        arena
            .define_variable(frame, sym("s"), &Type::STRING, &[])
            .unwrap();
        arena
            .define_variable(frame, discard_name(), &Type::STRING, &[])
            .unwrap();

        let code = arena.pop_to(frame, sym("s"), &no_globals()).unwrap();

        assert_eq!(
            render(&code),
            "\tpopl %eax\n\
             \tmovl %eax, 4(%esp)\t# popping to variable s\n\
             \tpopl %eax\n\
             \tmovl %eax, 4(%esp)\t# popping to variable s\n"
        );
        assert_eq!(arena.frame(frame).size(), 8);
    }
}
