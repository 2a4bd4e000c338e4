//! Runtime routines woven into every program: the process entry point, the
//! low-level print routine behind the `println` builtin, and an optional
//! hex-dump debugging helper. Everything here is plain Linux i386 system
//! call plumbing; no libc is linked.

use crate::{
    backend::{
        CodegenOptions,
        x86::{Instruction, JumpTarget, Memory, Op8, Op32, Register, SectionKind},
    },
    intern::InternedSymbol,
};

/// Name of the low-level print routine `println` calls compile to
pub const PRINT_STR: &str = "print.str";

/// Process entry point the linker resolves by default
pub const ENTRY: &str = "_start";

/// Debug helper that hex-dumps %eax to standard output
pub const DEBUG_PRINT_EAX: &str = "debug.print_eax";

const SYS_WRITE: i32 = 4;
const SYS_EXIT: i32 = 1;
const STDOUT: i32 = 1;
const SYSCALL_VECTOR: u8 = 0x80;

fn reg(register: Register) -> Op32 {
    Op32::Register(register)
}

fn imm(value: i32) -> Op32 {
    Op32::Immediate(value)
}

fn mov(src: Op32, dest: Op32) -> Instruction {
    Instruction::Mov { src, dest }
}

fn stack_word(offset: i32) -> Op32 {
    Op32::Memory(Memory::register_relative(offset, Register::STACK_POINTER))
}

/// The text section opener, `_start`, and the runtime routines. Emitted
/// ahead of all user code.
pub fn prelude(options: &CodegenOptions) -> Vec<Instruction> {
    let mut code = vec![
        Instruction::Section(SectionKind::Text),
        Instruction::commented(
            Instruction::Global(InternedSymbol::new(ENTRY)),
            "this says where to start execution",
        ),
        Instruction::Call(JumpTarget::Symbol(InternedSymbol::new("main"))),
        Instruction::Comment("And exit...".to_owned()),
        Instruction::commented(mov(imm(0), reg(Register::Ebx)), "first argument: exit code"),
        Instruction::commented(
            mov(imm(SYS_EXIT), reg(Register::Eax)),
            "system call number (sys_exit)",
        ),
        Instruction::Int(Op8::Immediate(SYSCALL_VECTOR)),
    ];

    code.extend(print_str());

    if options.debug_runtime {
        code.extend(debug_print_eax());
    }

    code
}

/// write(stdout, pointer, length) for the (pointer, length) pair sitting
/// above the return address, then pop the pair on the way out: the routine
/// cleans its own arguments, exactly like generated functions do.
fn print_str() -> Vec<Instruction> {
    vec![
        Instruction::Comment("Print a string given as (pointer, length)...".to_owned()),
        Instruction::Label(InternedSymbol::new(PRINT_STR)),
        Instruction::commented(
            mov(stack_word(8), reg(Register::Edx)),
            "third argument: data length",
        ),
        Instruction::commented(
            mov(stack_word(4), reg(Register::Ecx)),
            "second argument: pointer to data",
        ),
        Instruction::commented(
            mov(imm(STDOUT), reg(Register::Ebx)),
            "first argument: file handle (stdout)",
        ),
        Instruction::commented(
            mov(imm(SYS_WRITE), reg(Register::Eax)),
            "system call number (sys_write)",
        ),
        Instruction::Int(Op8::Immediate(SYSCALL_VECTOR)),
        Instruction::commented(
            Instruction::Pop(reg(Register::SCRATCH)),
            "pop return address",
        ),
        Instruction::commented(
            Instruction::Add {
                src: imm(8),
                dest: reg(Register::STACK_POINTER),
            },
            "deallocate the argument pair",
        ),
        Instruction::Jmp(JumpTarget::Indirect(Register::SCRATCH)),
    ]
}

/// Hex-dump %eax as `eax=XXXXXXXX` plus newline without disturbing any
/// register. Builds the thirteen output bytes in a buffer just below the
/// stack pointer, four hex digits at a time.
fn debug_print_eax() -> Vec<Instruction> {
    let eax = || reg(Register::Eax);
    let ebx = || reg(Register::Ebx);
    let ecx = || reg(Register::Ecx);
    let edx = || reg(Register::Edx);
    let buffer_word = |offset: i32| {
        Op32::Memory(Memory::register_relative(offset, Register::Ecx))
    };

    // Each nibble is isolated with a mask, biased into the ASCII range, and
    // shifted to its position in the output word.
    vec![
        Instruction::Comment("Debug utility routines!".to_owned()),
        Instruction::Label(InternedSymbol::new(DEBUG_PRINT_EAX)),
        Instruction::commented(Instruction::Push(edx()), "Save registers..."),
        Instruction::Push(ecx()),
        Instruction::Push(ebx()),
        Instruction::Push(eax()),
        Instruction::commented(
            mov(reg(Register::Esp), ecx()),
            "second argument: pointer to data",
        ),
        Instruction::commented(
            Instruction::Add {
                src: imm(-20),
                dest: ecx(),
            },
            "the output buffer lives just below the saved registers",
        ),
        mov(eax(), ebx()),
        Instruction::And {
            src: imm(15),
            dest: ebx(),
        },
        Instruction::Shl {
            src: imm(24),
            dest: ebx(),
        },
        Instruction::commented(
            Instruction::Add {
                src: imm(805306368),
                dest: ebx(),
            },
            "least significant hex",
        ),
        mov(eax(), edx()),
        Instruction::And {
            src: imm(240),
            dest: edx(),
        },
        Instruction::Add {
            src: imm(768),
            dest: edx(),
        },
        Instruction::Shl {
            src: imm(12),
            dest: edx(),
        },
        Instruction::commented(
            Instruction::Add {
                src: edx(),
                dest: ebx(),
            },
            "second most significant hex",
        ),
        mov(eax(), edx()),
        Instruction::And {
            src: imm(3840),
            dest: edx(),
        },
        Instruction::Add {
            src: imm(12288),
            dest: edx(),
        },
        Instruction::commented(
            Instruction::Add {
                src: edx(),
                dest: ebx(),
            },
            "third most significant hex",
        ),
        mov(eax(), edx()),
        Instruction::And {
            src: imm(61440),
            dest: edx(),
        },
        Instruction::Add {
            src: imm(196608),
            dest: edx(),
        },
        Instruction::Shr {
            src: imm(12),
            dest: edx(),
        },
        Instruction::commented(
            Instruction::Add {
                src: edx(),
                dest: ebx(),
            },
            "fourth most significant hex",
        ),
        Instruction::commented(
            mov(ebx(), buffer_word(8)),
            "store four hex digits covering the low 16 bits of EAX",
        ),
        mov(eax(), edx()),
        Instruction::And {
            src: imm(983040),
            dest: edx(),
        },
        Instruction::Add {
            src: imm(3145728),
            dest: edx(),
        },
        Instruction::Shr {
            src: imm(16),
            dest: edx(),
        },
        Instruction::commented(mov(edx(), ebx()), "fifth most significant hex"),
        mov(eax(), edx()),
        Instruction::And {
            src: imm(15728640),
            dest: edx(),
        },
        Instruction::Add {
            src: imm(50331648),
            dest: edx(),
        },
        Instruction::Shr {
            src: imm(12),
            dest: edx(),
        },
        Instruction::commented(
            Instruction::Add {
                src: edx(),
                dest: ebx(),
            },
            "sixth most significant hex",
        ),
        mov(eax(), edx()),
        Instruction::And {
            src: imm(251658240),
            dest: edx(),
        },
        Instruction::Add {
            src: imm(805306368),
            dest: edx(),
        },
        Instruction::Shr {
            src: imm(8),
            dest: edx(),
        },
        Instruction::commented(
            Instruction::Add {
                src: edx(),
                dest: ebx(),
            },
            "seventh most significant hex",
        ),
        mov(eax(), edx()),
        Instruction::Shr {
            src: imm(4),
            dest: edx(),
        },
        Instruction::And {
            src: imm(251658240),
            dest: edx(),
        },
        Instruction::Add {
            src: imm(805306368),
            dest: edx(),
        },
        Instruction::commented(
            Instruction::Add {
                src: edx(),
                dest: ebx(),
            },
            "eighth most significant hex",
        ),
        Instruction::commented(
            mov(ebx(), buffer_word(4)),
            "store four hex digits covering the high 16 bits of EAX",
        ),
        Instruction::commented(mov(imm(10), buffer_word(12)), "add newline"),
        Instruction::commented(mov(imm(980967781), buffer_word(0)), "add the eax= prefix"),
        Instruction::commented(
            mov(imm(13), reg(Register::Edx)),
            "third argument: data length",
        ),
        Instruction::commented(
            mov(imm(STDOUT), reg(Register::Ebx)),
            "first argument: file handle (stdout)",
        ),
        Instruction::commented(
            mov(imm(SYS_WRITE), reg(Register::Eax)),
            "system call number (sys_write)",
        ),
        Instruction::Int(Op8::Immediate(SYSCALL_VECTOR)),
        Instruction::commented(Instruction::Pop(eax()), "Restore saved registers..."),
        Instruction::Pop(ebx()),
        Instruction::Pop(ecx()),
        Instruction::Pop(edx()),
        Instruction::Ret,
    ]
}
