use std::path::PathBuf;

use clap::Parser as ClapParser;
use creekc::{
    backend::{CodegenOptions, codegen, toolchain},
    intern::InternedSymbol,
    middle::ast::{Expression, FunctionDefinition, Module, Statement},
};

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path of the executable to produce
    #[arg(default_value = "a.out")]
    output: PathBuf,

    /// Print the generated assembly instead of invoking the toolchain
    #[arg(long)]
    emit_asm: bool,

    /// Annotate the generated assembly with code generator commentary
    #[arg(long)]
    comments: bool,

    /// Include the hex-dump debugging helpers in the runtime
    #[arg(long)]
    debug_runtime: bool,
}

fn main() {
    let args = Args::parse();

    let options = CodegenOptions {
        comments: args.comments,
        debug_runtime: args.debug_runtime,
    };

    let assembly = match codegen::compile_to_assembly(&hello_module(), options) {
        Ok(assembly) => assembly,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    if args.emit_asm {
        print!("{assembly}");
        return;
    }

    if let Err(error) = toolchain::assemble_and_link(&assembly, &args.output) {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

/// There is no parser yet, so the driver compiles this built-in module.
fn hello_module() -> Module {
    Module {
        functions: vec![FunctionDefinition {
            name: InternedSymbol::new("main"),
            parameters: Vec::new(),
            results: Vec::new(),
            body: vec![Statement::Expression(Expression::println(
                Expression::string_literal("Hello, world!\n"),
            ))],
        }],
    }
}
