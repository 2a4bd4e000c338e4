//! AST-to-instruction code generation.
//!
//! The generator makes two passes over a module: a pre-scan that pools every
//! string literal, then one code generation pass per function. All mutable
//! compilation state lives in a [`Session`] value threaded through the
//! generator, so repeated or concurrent compilations are independent.
//!
//! # Calling convention
//!
//! The convention is callee-cleans throughout:
//!
//! - The caller pushes one zeroed slot per declared result (in declaration
//!   order), then the arguments right to left, then issues `call`.
//! - The callee addresses parameters and result slots relative to the stack
//!   pointer. On return it deallocates every local scope, pops the return
//!   address into the scratch register, deallocates its parameter region,
//!   and jumps back through the scratch register.
//! - The result slots are the only bytes that survive; they are owned by the
//!   caller and form the value of the call expression. The runtime print
//!   routine removes its argument pair the same way.

use hashbrown::HashMap;

use crate::{
    backend::{
        CodegenError, CodegenOptions, runtime,
        stack::{FrameArena, FrameId, ResolvedLocation, discard_name},
        x86::{self, Instruction, JumpTarget, Memory, Op32, Register, SectionKind},
    },
    intern::InternedSymbol,
    middle::{
        ast::{self, Expression, ExpressionKind, FunctionDefinition, Literal, Module, Statement},
        ty::Type,
    },
};

/// Mutable state for one compilation: the global symbol table and the string
/// literal pool
#[derive(Debug, Default)]
pub struct Session {
    pub globals: HashMap<InternedSymbol, Type>,
    pub literals: LiteralPool,
    pub options: CodegenOptions,
}

impl Session {
    pub fn new(options: CodegenOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }
}

/// Deduplicated string constants, each emitted exactly once in the data
/// section and referred to by label everywhere else
#[derive(Debug, Default)]
pub struct LiteralPool {
    labels: HashMap<InternedSymbol, InternedSymbol>,
    /// Texts in first-seen order, for deterministic output
    texts: Vec<InternedSymbol>,
}

impl LiteralPool {
    /// The label under which `text` is stored, allocating one on first sight
    pub fn intern(&mut self, text: InternedSymbol) -> InternedSymbol {
        if let Some(label) = self.labels.get(&text) {
            return *label;
        }

        let label = InternedSymbol::new(&format!(
            "str.{}.{}",
            self.texts.len(),
            sanitize_label(text.value())
        ));

        self.labels.insert(text, label);
        self.texts.push(text);

        label
    }

    pub fn label_of(&self, text: InternedSymbol) -> Option<InternedSymbol> {
        self.labels.get(&text).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Storage for every pooled literal: a label, the raw bytes, and a
    /// symbolic constant holding the byte count
    pub fn definitions(&self) -> Vec<Instruction> {
        let mut code = Vec::new();

        for text in &self.texts {
            let label = self.labels[text];

            code.push(Instruction::Label(label));
            code.push(Instruction::commented(
                Instruction::Ascii(text.value().to_owned()),
                "a non-null-terminated string",
            ));
            code.push(Instruction::commented(
                Instruction::SymbolicConstant {
                    name: length_label(label),
                    value: format!(". - {label}"),
                },
                "length of string",
            ));
        }

        code
    }
}

/// `<label>.len`, the symbolic constant holding a pooled literal's byte count
fn length_label(label: InternedSymbol) -> InternedSymbol {
    InternedSymbol::new(&format!("{label}.len"))
}

fn sanitize_label(text: &str) -> String {
    text.chars()
        .take(12)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Literal pre-scan pass. Every string literal in the module is pooled
/// before generation starts, so label allocation does not depend on the
/// order bodies happen to be compiled in.
pub fn scan_literals(pool: &mut LiteralPool, module: &Module) {
    for function in &module.functions {
        for statement in &function.body {
            scan_statement(pool, statement);
        }
    }
}

fn scan_statement(pool: &mut LiteralPool, statement: &Statement) {
    match statement {
        Statement::Empty => {}
        Statement::Expression(expression) => scan_expression(pool, expression),
        Statement::Return(values) => {
            for value in values {
                scan_expression(pool, value);
            }
        }
    }
}

fn scan_expression(pool: &mut LiteralPool, expression: &Expression) {
    match &expression.kind {
        ExpressionKind::Literal(Literal::String(text)) => {
            pool.intern(*text);
        }
        ExpressionKind::Literal(Literal::Integer(_)) => {}
        ExpressionKind::Call { target, arguments } => {
            scan_expression(pool, target);
            for argument in arguments {
                scan_expression(pool, argument);
            }
        }
        ExpressionKind::Identifier { .. } => {}
    }
}

/// Compile a type-checked module to assembler text
pub fn compile_to_assembly(
    module: &Module,
    options: CodegenOptions,
) -> Result<String, CodegenError> {
    let mut session = Session::new(options);
    let code = compile_module(&mut session, module)?;

    Ok(x86::render(&code))
}

/// Compile a module into an instruction sequence: the runtime prelude, one
/// body per function, then pooled literal storage in the data section
pub fn compile_module(
    session: &mut Session,
    module: &Module,
) -> Result<Vec<Instruction>, CodegenError> {
    scan_literals(&mut session.literals, module);

    // Register every signature before compiling any body so functions may
    // call functions defined after them.
    for function in &module.functions {
        if session.globals.contains_key(&function.name) {
            return Err(CodegenError::DuplicateDefinition {
                name: function.name,
                scope: "globals".to_owned(),
            });
        }
        session.globals.insert(function.name, function.signature());
    }

    let mut code = runtime::prelude(&session.options);

    for function in &module.functions {
        code.extend(FunctionCodegen::compile(session, function)?);
    }

    if !session.literals.is_empty() {
        code.push(Instruction::Section(SectionKind::Data));
        code.extend(session.literals.definitions());
    }

    Ok(code)
}

/// Per-function generation state. The frame arena lives exactly as long as
/// the function is being compiled and its frames are dropped in bulk with it.
struct FunctionCodegen<'a> {
    session: &'a mut Session,
    function: &'a FunctionDefinition,
    arena: FrameArena,
    function_frame: FrameId,
    return_label: InternedSymbol,
    code: Vec<Instruction>,
}

impl<'a> FunctionCodegen<'a> {
    fn compile(
        session: &'a mut Session,
        function: &'a FunctionDefinition,
    ) -> Result<Vec<Instruction>, CodegenError> {
        let mut arena = FrameArena::default();
        let function_frame = arena.new_frame(None, function.name.value());
        let return_label = InternedSymbol::new(&format!("{}.ret", function.name));

        let mut this = Self {
            session,
            function,
            arena,
            function_frame,
            return_label,
            code: Vec::new(),
        };

        let body_frame = this.prologue()?;

        for statement in &function.body {
            this.statement(body_frame, statement)?;
        }

        this.postlogue(body_frame);
        this.epilogue();

        Ok(this.code)
    }

    /// Lay out the function frame and emit the entry label. Result slots
    /// come first in declaration order (each also addressable by position),
    /// then the parameters in reverse declaration order to mirror the
    /// caller's right-to-left pushes, then one word for the return address
    /// that `call` pushes on top.
    fn prologue(&mut self) -> Result<FrameId, CodegenError> {
        let function = self.function;

        for (i, field) in function.results.iter().enumerate() {
            let slot_name = return_slot_name(i);

            match field.name {
                Some(name) => {
                    self.arena
                        .define_variable(self.function_frame, name, &field.ty, &[slot_name])?;
                }
                None => {
                    self.arena
                        .define_variable(self.function_frame, slot_name, &field.ty, &[])?;
                }
            }
        }

        let return_size = self.arena.frame(self.function_frame).size();
        self.arena.set_return_size(self.function_frame, return_size);

        for (i, field) in function.parameters.iter().enumerate().rev() {
            let name = field.name.unwrap_or_else(|| parameter_name(i));

            self.arena
                .define_variable(self.function_frame, name, &field.ty, &[])?;
        }

        self.arena.define_variable(
            self.function_frame,
            InternedSymbol::new("ret.addr"),
            &Type::INT,
            &[],
        )?;

        self.emit(Instruction::commented(
            Instruction::Global(function.name),
            format!("function {}", function.name),
        ));

        Ok(self
            .arena
            .new_frame(Some(self.function_frame), format!("{}.body", function.name)))
    }

    fn statement(&mut self, frame: FrameId, statement: &Statement) -> Result<(), CodegenError> {
        match statement {
            Statement::Empty => Ok(()),
            Statement::Expression(expression) => {
                self.expression(frame, expression)?;

                match &expression.ty {
                    Type::Tuple(fields) if fields.is_empty() => Ok(()),
                    ty @ Type::Tuple(_) => {
                        // A discarded multi-value result still occupies its
                        // slots; free them.
                        let bytes = self.arena.pop(frame, ty)?;
                        self.emit_annotated(
                            add_to_stack_pointer(bytes),
                            format!("discard unused {} value", plain(ty)),
                        );
                        Ok(())
                    }
                    ty => Err(CodegenError::UnusedValue { ty: ty.clone() }),
                }
            }
            Statement::Return(values) => {
                for (i, value) in values.iter().enumerate() {
                    self.expression(frame, value)?;

                    let stores =
                        self.arena
                            .pop_to(frame, return_slot_name(i), &self.session.globals)?;
                    self.code.extend(stores);
                }

                self.postlogue(frame);
                Ok(())
            }
        }
    }

    fn expression(&mut self, frame: FrameId, expression: &Expression) -> Result<(), CodegenError> {
        match &expression.kind {
            ExpressionKind::Literal(Literal::String(text)) => self.string_literal(frame, *text),
            ExpressionKind::Literal(Literal::Integer(_)) => Err(CodegenError::UnsupportedConstruct {
                construct: "integer literals",
            }),
            ExpressionKind::Identifier { name, binding } => {
                if binding.is_none() {
                    return Err(CodegenError::MissingBinding { name: *name });
                }

                self.identifier(frame, *name)
            }
            ExpressionKind::Call { target, arguments } => {
                let ExpressionKind::Identifier { name, .. } = &target.kind else {
                    return Err(CodegenError::UnsupportedConstruct {
                        construct: "calls through computed function values",
                    });
                };

                if name.value() == ast::PRINTLN {
                    self.builtin_println(frame, arguments)
                } else {
                    self.call(frame, *name, arguments)
                }
            }
        }
    }

    /// Push a pooled literal as its (pointer, length) pair, pointer ending up
    /// on top
    fn string_literal(&mut self, frame: FrameId, text: InternedSymbol) -> Result<(), CodegenError> {
        let Some(label) = self.session.literals.label_of(text) else {
            return Err(CodegenError::UnknownLiteral { text });
        };

        self.emit_annotated(
            Instruction::Push(Op32::Symbol(length_label(label))),
            "push string length",
        );
        self.emit_annotated(Instruction::Push(Op32::Symbol(label)), "push string pointer");

        self.arena
            .define_variable(frame, discard_name(), &Type::STRING, &[])?;

        Ok(())
    }

    /// Replicate a variable's current value onto the top of the stack
    fn identifier(&mut self, frame: FrameId, name: InternedSymbol) -> Result<(), CodegenError> {
        let location = self.arena.lookup(frame, name, &self.session.globals)?;
        let ty = location.ty().clone();
        let slot = ty.stack_slot_size()?;
        let eax = Op32::Register(Register::Eax);

        match (slot, &location) {
            (4, _) => {
                self.emit_annotated(
                    Instruction::Mov {
                        src: Op32::Memory(location.address()),
                        dest: eax.clone(),
                    },
                    format!("load variable {name}"),
                );
                self.emit_annotated(Instruction::Push(eax), format!("push copy of {name}"));
            }
            (8, ResolvedLocation::Stack { offset, .. }) => {
                // The first push moves the stack pointer one word, so the
                // same textual offset addresses the length word and then the
                // pointer word.
                let word = Op32::Memory(Memory::register_relative(
                    (offset + 4) as i32,
                    Register::STACK_POINTER,
                ));

                self.emit_annotated(
                    Instruction::Mov {
                        src: word.clone(),
                        dest: eax.clone(),
                    },
                    format!("load length of {name}"),
                );
                self.emit_annotated(
                    Instruction::Push(eax.clone()),
                    format!("push copy of {name} length"),
                );
                self.emit_annotated(
                    Instruction::Mov {
                        src: word,
                        dest: eax.clone(),
                    },
                    format!("load pointer of {name}"),
                );
                self.emit_annotated(
                    Instruction::Push(eax),
                    format!("push copy of {name} pointer"),
                );
            }
            (8, ResolvedLocation::Global { .. }) => {
                return Err(CodegenError::UnsupportedConstruct {
                    construct: "string-valued globals",
                });
            }
            (size, _) => {
                return Err(CodegenError::UnsupportedOperandSize { ty, size });
            }
        }

        self.arena.define_variable(frame, discard_name(), &ty, &[])?;

        Ok(())
    }

    /// println compiles to a call of the runtime's low-level print routine.
    /// The argument is staged in a throwaway scope: the routine removes the
    /// argument bytes itself, so the scope is abandoned rather than popped.
    fn builtin_println(
        &mut self,
        frame: FrameId,
        arguments: &[Expression],
    ) -> Result<(), CodegenError> {
        let [argument] = arguments else {
            return Err(CodegenError::UnsupportedConstruct {
                construct: "println with other than one argument",
            });
        };

        if !argument.ty.is_string() {
            return Err(CodegenError::UnsupportedConstruct {
                construct: "println of non-string values",
            });
        }

        let args_frame = self.arena.new_frame(Some(frame), "println.args");
        self.expression(args_frame, argument)?;

        self.emit_annotated(
            Instruction::Call(JumpTarget::Symbol(InternedSymbol::new(runtime::PRINT_STR))),
            "print the string on top of the stack",
        );

        Ok(())
    }

    fn call(
        &mut self,
        frame: FrameId,
        name: InternedSymbol,
        arguments: &[Expression],
    ) -> Result<(), CodegenError> {
        let Some(signature) = self.session.globals.get(&name).cloned() else {
            return Err(CodegenError::UndefinedName { name });
        };
        let Type::Function { results, .. } = signature else {
            return Err(CodegenError::NotCallable {
                name,
                ty: signature,
            });
        };

        // The callee stores results by address into slots reserved here; the
        // slots survive the call as the value of this expression.
        for (i, field) in results.iter().enumerate() {
            let slot = field.ty.stack_slot_size()?;

            for _ in 0..slot / 4 {
                self.emit_annotated(
                    Instruction::Push(Op32::Immediate(0)),
                    format!("reserve return slot {i} ({})", plain(&field.ty)),
                );
            }

            self.arena
                .define_variable(frame, discard_name(), &field.ty, &[])?;
        }

        // Arguments are evaluated and pushed right to left. The callee's
        // epilogue removes them, so the staging scope is abandoned unpopped.
        let args_frame = self.arena.new_frame(Some(frame), format!("{name}.args"));

        for argument in arguments.iter().rev() {
            self.expression(args_frame, argument)?;
        }

        self.emit(Instruction::Call(JumpTarget::Symbol(name)));

        Ok(())
    }

    /// Unwind every scope between `frame` and the function frame, then jump
    /// to the shared return label. Bookkeeping stays untouched: the scopes
    /// are only gone on the jumping control path.
    fn postlogue(&mut self, frame: FrameId) {
        let mut current = frame;

        while current != self.function_frame {
            let bytes = self.arena.frame(current).size();

            if bytes > 0 {
                let scope = self.arena.frame(current).name().to_owned();
                self.emit_annotated(add_to_stack_pointer(bytes), format!("deallocate {scope}"));
            }

            current = self
                .arena
                .frame(current)
                .parent()
                .expect("every scope chains back to the function frame");
        }

        self.emit(Instruction::Jmp(JumpTarget::Symbol(self.return_label)));
    }

    /// The shared return path, emitted exactly once per function after the
    /// body. The return address is popped into the scratch register so the
    /// parameter region above it can be deallocated before control transfers
    /// back; the result slots stay for the caller.
    fn epilogue(&mut self) {
        let parameter_bytes = {
            let frame = self.arena.frame(self.function_frame);
            frame.size() - frame.return_size() - 4
        };

        self.emit(Instruction::Label(self.return_label));
        self.emit(Instruction::commented(
            Instruction::Pop(Op32::Register(Register::SCRATCH)),
            "pop return address",
        ));

        if parameter_bytes > 0 {
            self.emit(Instruction::commented(
                add_to_stack_pointer(parameter_bytes),
                "deallocate parameters",
            ));
        }

        self.emit(Instruction::Jmp(JumpTarget::Indirect(Register::SCRATCH)));
    }

    fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    fn emit_annotated(&mut self, instruction: Instruction, comment: impl Into<String>) {
        if self.session.options.comments {
            self.code.push(Instruction::commented(instruction, comment));
        } else {
            self.code.push(instruction);
        }
    }
}

/// Name under which result slot `i` is addressable regardless of whether the
/// declaration named it
fn return_slot_name(i: usize) -> InternedSymbol {
    InternedSymbol::new(&format!("ret.{i}"))
}

fn parameter_name(i: usize) -> InternedSymbol {
    InternedSymbol::new(&format!("arg.{i}"))
}

fn add_to_stack_pointer(bytes: u32) -> Instruction {
    Instruction::Add {
        src: Op32::Immediate(bytes as i32),
        dest: Op32::Register(Register::STACK_POINTER),
    }
}

fn plain(ty: &Type) -> String {
    strip_ansi_escapes::strip_str(ty.to_string())
}
