//! i386 instruction IR and its textual rendering.
//!
//! The operand and instruction sets are closed: everything the code generator
//! can emit is a variant here, and rendering is purely syntactic. Output uses
//! the GNU assembler's AT&T conventions (source operand first, `$` for
//! immediates, `%` for registers, `name:` for labels, `.directive` for
//! sections and data).
//!
//! Operand widths are separate types rather than a runtime property: an
//! instruction that needs a 32-bit operand takes an [`Op32`], and an operand
//! that cannot serve a width simply has no constructor for it, so a width
//! mismatch cannot be built in the first place.

use itertools::Itertools;

use crate::intern::InternedSymbol;

/// A general purpose register, of which the i386 has only eight. Three are
/// reserved by the code generator: the stack pointer, the frame pointer, and
/// one scratch register clobbered by call epilogues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Register {
    Eax,
    Ebx,
    Ecx,
    Edx,
    Edi,
    Esi,
    Ebp,
    Esp,
}

impl Register {
    pub const STACK_POINTER: Self = Self::Esp;
    pub const FRAME_POINTER: Self = Self::Ebp;
    pub const SCRATCH: Self = Self::Ecx;

    fn name_16(self) -> &'static str {
        match self {
            Self::Eax => "ax",
            Self::Ebx => "bx",
            Self::Ecx => "cx",
            Self::Edx => "dx",
            Self::Edi => "di",
            Self::Esi => "si",
            Self::Ebp => "bp",
            Self::Esp => "sp",
        }
    }
}

/// The low byte of one of the four legacy registers. Only these four can
/// serve 8-bit operands; the rest of [`Register`] has no byte form here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ByteRegister {
    Al,
    Bl,
    Cl,
    Dl,
}

/// Index multiplier inside a memory operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scale {
    #[default]
    One,
    Two,
    Four,
    Eight,
}

impl Scale {
    fn value(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }
}

impl core::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// The constant part of a memory operand's address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Displacement {
    Constant(i32),
    Symbol(InternedSymbol),
}

impl core::fmt::Display for Displacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Displacement::Constant(value) => write!(f, "{value}"),
            Displacement::Symbol(name) => write!(f, "{name}"),
        }
    }
}

/// A memory reference: displacement plus optional base and index registers.
/// Renders as `disp(%base,%index,scale)`; when base and index are both
/// absent the scale is still written as an explicit placeholder (`disp(,1)`),
/// which the assembler requires for the parenthesized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memory {
    pub displacement: Option<Displacement>,
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub scale: Scale,
}

impl Memory {
    pub fn register_relative(displacement: i32, base: Register) -> Self {
        Self {
            displacement: Some(Displacement::Constant(displacement)),
            base: Some(base),
            index: None,
            scale: Scale::One,
        }
    }

    pub fn absolute(symbol: InternedSymbol) -> Self {
        Self {
            displacement: Some(Displacement::Symbol(symbol)),
            base: None,
            index: None,
            scale: Scale::One,
        }
    }
}

impl core::fmt::Display for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(displacement) = &self.displacement {
            write!(f, "{displacement}")?;
        }

        match (self.base, self.index) {
            (Some(base), Some(index)) => write!(f, "(%{base},%{index},{})", self.scale),
            (Some(base), None) => write!(f, "(%{base})"),
            (None, Some(index)) => write!(f, "(,%{index},{})", self.scale),
            (None, None) => write!(f, "(,{})", self.scale),
        }
    }
}

/// An operand that can serve a 32-bit instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op32 {
    Register(Register),
    Immediate(i32),
    /// The address of a label, as an immediate
    Symbol(InternedSymbol),
    Memory(Memory),
}

impl core::fmt::Display for Op32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op32::Register(register) => write!(f, "%{register}"),
            Op32::Immediate(value) => write!(f, "${value}"),
            Op32::Symbol(name) => write!(f, "${name}"),
            Op32::Memory(memory) => write!(f, "{memory}"),
        }
    }
}

/// An operand that can serve a 16-bit instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op16 {
    Register(Register),
    Immediate(i16),
    Symbol(InternedSymbol),
    Memory(Memory),
}

impl core::fmt::Display for Op16 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op16::Register(register) => write!(f, "%{}", register.name_16()),
            Op16::Immediate(value) => write!(f, "${value}"),
            Op16::Symbol(name) => write!(f, "${name}"),
            Op16::Memory(memory) => write!(f, "{memory}"),
        }
    }
}

/// An operand that can serve an 8-bit instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op8 {
    Register(ByteRegister),
    Immediate(u8),
    Symbol(InternedSymbol),
    Memory(Memory),
}

impl core::fmt::Display for Op8 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op8::Register(register) => write!(f, "%{register}"),
            Op8::Immediate(value) => write!(f, "${value}"),
            Op8::Symbol(name) => write!(f, "${name}"),
            Op8::Memory(memory) => write!(f, "{memory}"),
        }
    }
}

/// Destination of a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpTarget {
    Symbol(InternedSymbol),
    /// Through the address held in a register
    Indirect(Register),
}

impl core::fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JumpTarget::Symbol(name) => write!(f, "{name}"),
            JumpTarget::Indirect(register) => write!(f, "*%{register}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Text,
    Data,
}

impl core::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionKind::Text => f.write_str(".text"),
            SectionKind::Data => f.write_str(".data"),
        }
    }
}

/// One line of the output: a machine instruction or a structural
/// pseudo-instruction (label, section, comment, raw data)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Mov { src: Op32, dest: Op32 },
    Add { src: Op32, dest: Op32 },
    And { src: Op32, dest: Op32 },
    Shl { src: Op32, dest: Op32 },
    Shr { src: Op32, dest: Op32 },
    Imul { src: Op32, dest: Op32 },
    /// Sets flags only; neither operand is a destination
    Cmp { lhs: Op32, rhs: Op32 },
    /// Software interrupt; the operand is the vector number
    Int(Op8),
    Push(Op32),
    Pop(Op32),
    Ret,
    Call(JumpTarget),
    Jmp(JumpTarget),
    Jne(JumpTarget),
    Section(SectionKind),
    /// A label definition
    Label(InternedSymbol),
    /// An exported label definition
    Global(InternedSymbol),
    /// A standalone comment banner. Distinct from [`Commented`]: the two
    /// shapes render differently and wrapping never changes the semantics of
    /// any wrapped instruction.
    ///
    /// [`Commented`]: Instruction::Commented
    Comment(String),
    /// An instruction with a trailing annotation
    Commented(Box<Instruction>, String),
    /// `name = expression`, evaluated by the assembler
    SymbolicConstant {
        name: InternedSymbol,
        value: String,
    },
    /// Raw, non-null-terminated string storage
    Ascii(String),
    /// A raw 32-bit data word
    DataWord(i32),
    /// Escape hatch for instruction forms the IR does not model. The caller
    /// must declare the text's net effect on the stack pointer in bytes
    /// (positive for pushes) so frame bookkeeping can account for it.
    Raw { text: String, stack_bytes: i32 },
}

impl Instruction {
    pub fn commented(instruction: Instruction, comment: impl Into<String>) -> Instruction {
        Instruction::Commented(Box::new(instruction), comment.into())
    }

    /// The stack effect declared by raw text, reaching through trailing
    /// comments. Zero for every modeled instruction: their effects are known
    /// to the code generator, which accounts for them itself.
    pub fn declared_stack_bytes(&self) -> i32 {
        match self {
            Instruction::Raw { stack_bytes, .. } => *stack_bytes,
            Instruction::Commented(inner, _) => inner.declared_stack_bytes(),
            _ => 0,
        }
    }

    fn render_line(&self) -> String {
        match self {
            Instruction::Mov { src, dest } => format!("\tmovl {src}, {dest}"),
            Instruction::Add { src, dest } => format!("\taddl {src}, {dest}"),
            Instruction::And { src, dest } => format!("\tandl {src}, {dest}"),
            Instruction::Shl { src, dest } => format!("\tshll {src}, {dest}"),
            Instruction::Shr { src, dest } => format!("\tshrl {src}, {dest}"),
            Instruction::Imul { src, dest } => format!("\timull {src}, {dest}"),
            Instruction::Cmp { lhs, rhs } => format!("\tcmpl {lhs}, {rhs}"),
            Instruction::Int(vector) => format!("\tint {vector}"),
            Instruction::Push(operand) => format!("\tpushl {operand}"),
            Instruction::Pop(operand) => format!("\tpopl {operand}"),
            Instruction::Ret => "\tret".to_owned(),
            Instruction::Call(target) => format!("\tcall {target}"),
            Instruction::Jmp(target) => format!("\tjmp {target}"),
            Instruction::Jne(target) => format!("\tjne {target}"),
            Instruction::Section(section) => section.to_string(),
            Instruction::Label(name) => format!("{name}:"),
            Instruction::Global(name) => format!(".global {name}\n{name}:"),
            Instruction::Comment(text) => format!("\n#  {text}"),
            Instruction::Commented(inner, text) => {
                format!("{}\t# {}", inner.render_line(), text)
            }
            Instruction::SymbolicConstant { name, value } => format!("\t{name} = {value}"),
            Instruction::Ascii(text) => format!("\t.ascii\t\"{}\"", escape_ascii(text)),
            Instruction::DataWord(value) => format!("\t.long {value}"),
            Instruction::Raw { text, .. } => text.clone(),
        }
    }
}

/// Render an instruction sequence to assembler text, one node per line in
/// exactly the input order. Order is load bearing: the assembler processes
/// lines sequentially and label positions matter.
pub fn render(code: &[Instruction]) -> String {
    let mut output = code.iter().map(Instruction::render_line).join("\n");
    output.push('\n');
    output
}

fn escape_ascii(text: &str) -> String {
    let mut output = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\n' => output.push_str("\\n"),
            c => output.push(c),
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn sym(name: &str) -> InternedSymbol {
        InternedSymbol::new(name)
    }

    #[test]
    fn renders_two_operand_instructions_source_first() {
        let mov = Instruction::Mov {
            src: Op32::Immediate(1),
            dest: Op32::Register(Register::Ebx),
        };

        assert_eq!(mov.render_line(), "\tmovl $1, %ebx");

        let cmp = Instruction::Cmp {
            lhs: Op32::Immediate(0),
            rhs: Op32::Memory(Memory::register_relative(4, Register::Esp)),
        };

        assert_eq!(cmp.render_line(), "\tcmpl $0, 4(%esp)");
    }

    #[test]
    fn renders_register_relative_memory_operands() {
        let operand = Op32::Memory(Memory::register_relative(8, Register::Esp));

        assert_eq!(operand.to_string(), "8(%esp)");
    }

    #[test]
    fn renders_base_and_index_memory_operands() {
        let memory = Memory {
            displacement: Some(Displacement::Constant(4)),
            base: Some(Register::Ebx),
            index: Some(Register::Esi),
            scale: Scale::Four,
        };

        assert_eq!(memory.to_string(), "4(%ebx,%esi,4)");

        let index_only = Memory {
            displacement: None,
            base: None,
            index: Some(Register::Esi),
            scale: Scale::Two,
        };

        assert_eq!(index_only.to_string(), "(,%esi,2)");
    }

    #[test]
    fn absolute_memory_operands_keep_the_scale_placeholder() {
        let memory = Memory::absolute(sym("msg"));

        assert_eq!(memory.to_string(), "msg(,1)");
    }

    #[test]
    fn symbols_are_immediates_outside_memory_operands() {
        assert_eq!(Op32::Symbol(sym("msg")).to_string(), "$msg");
        assert_eq!(Op16::Immediate(-3).to_string(), "$-3");
        assert_eq!(Op16::Register(Register::Eax).to_string(), "%ax");
        assert_eq!(Op8::Register(ByteRegister::Al).to_string(), "%al");
        assert_eq!(Op8::Immediate(0x80).to_string(), "$128");
    }

    #[test]
    fn bare_comments_and_trailing_comments_are_distinct_shapes() {
        let banner = Instruction::Comment("Print string...".to_owned());

        assert_eq!(banner.render_line(), "\n#  Print string...");

        let annotated = Instruction::commented(Instruction::Ret, "all done");

        assert_eq!(annotated.render_line(), "\tret\t# all done");
    }

    #[test]
    fn renders_labels_sections_and_data() {
        assert_eq!(Instruction::Label(sym("msg")).render_line(), "msg:");
        assert_eq!(
            Instruction::Global(sym("_start")).render_line(),
            ".global _start\n_start:"
        );
        assert_eq!(
            Instruction::Section(SectionKind::Data).render_line(),
            ".data"
        );
        assert_eq!(Instruction::DataWord(7).render_line(), "\t.long 7");
        assert_eq!(
            Instruction::SymbolicConstant {
                name: sym("len"),
                value: ". - msg".to_owned(),
            }
            .render_line(),
            "\tlen = . - msg"
        );
    }

    #[test]
    fn escapes_ascii_storage() {
        let ascii = Instruction::Ascii("say \"hi\"\\\n".to_owned());

        assert_eq!(ascii.render_line(), "\t.ascii\t\"say \\\"hi\\\"\\\\\\n\"");
    }

    #[test]
    fn renders_control_transfers() {
        assert_eq!(
            Instruction::Call(JumpTarget::Symbol(sym("main"))).render_line(),
            "\tcall main"
        );
        assert_eq!(
            Instruction::Jmp(JumpTarget::Indirect(Register::Ecx)).render_line(),
            "\tjmp *%ecx"
        );
        assert_eq!(
            Instruction::Jne(JumpTarget::Symbol(sym("loop"))).render_line(),
            "\tjne loop"
        );
    }

    #[test]
    fn raw_text_declares_its_stack_effect() {
        let raw = Instruction::Raw {
            text: "\tpushl %eax".to_owned(),
            stack_bytes: 4,
        };

        assert_eq!(raw.declared_stack_bytes(), 4);
        assert_eq!(raw.render_line(), "\tpushl %eax");
        assert_eq!(
            Instruction::commented(raw, "saved").declared_stack_bytes(),
            4
        );
        assert_eq!(Instruction::Ret.declared_stack_bytes(), 0);
    }

    #[test]
    fn renders_a_whole_program_in_order() {
        let code = vec![
            Instruction::Section(SectionKind::Data),
            Instruction::Label(sym("msg")),
            Instruction::commented(
                Instruction::Ascii("Hello, world!\n".to_owned()),
                "a non-null-terminated string",
            ),
            Instruction::commented(
                Instruction::SymbolicConstant {
                    name: sym("len"),
                    value: ". - msg".to_owned(),
                },
                "length of string",
            ),
            Instruction::Section(SectionKind::Text),
            Instruction::Global(sym("_start")),
            Instruction::Comment("Print string...".to_owned()),
            Instruction::Mov {
                src: Op32::Symbol(sym("len")),
                dest: Op32::Register(Register::Edx),
            },
            Instruction::Mov {
                src: Op32::Symbol(sym("msg")),
                dest: Op32::Register(Register::Ecx),
            },
            Instruction::Mov {
                src: Op32::Immediate(1),
                dest: Op32::Register(Register::Ebx),
            },
            Instruction::Mov {
                src: Op32::Immediate(4),
                dest: Op32::Register(Register::Eax),
            },
            Instruction::Int(Op8::Immediate(0x80)),
        ];

        assert_eq!(
            render(&code),
            indoc! {r#"
                .data
                msg:
                	.ascii	"Hello, world!\n"	# a non-null-terminated string
                	len = . - msg	# length of string
                .text
                .global _start
                _start:

                #  Print string...
                	movl $len, %edx
                	movl $msg, %ecx
                	movl $1, %ebx
                	movl $4, %eax
                	int $128
            "#}
        );
    }
}
