//! External assembler and linker invocation: assembly text in, stripped
//! executable out. Both tools run as blocking subprocesses, once each, and
//! the first failure aborts the build.

use std::{path::Path, process::Command};

use mktemp::Temp;

use crate::backend::CodegenError;

/// Assemble `assembly` and link the result into an executable at `output`
pub fn assemble_and_link(assembly: &str, output: &Path) -> Result<(), CodegenError> {
    let assembly_file = Temp::new_file()?;
    let object_file = Temp::new_file()?;
    let assembly_path = assembly_file.to_path_buf();
    let object_path = object_file.to_path_buf();

    std::fs::write(&assembly_path, assembly)?;

    run(create_assembler_command(&assembly_path, &object_path), "as")?;
    run(create_linker_command(&object_path, output), "ld")
}

fn create_assembler_command(input_file: &Path, output_file: &Path) -> Command {
    let mut cmd = Command::new("as");

    cmd.arg("--32").arg("-o").arg(output_file).arg(input_file);

    cmd
}

fn create_linker_command(input_file: &Path, output_file: &Path) -> Command {
    let mut cmd = Command::new("ld");

    cmd.args(["-m", "elf_i386", "-s"])
        .arg("-o")
        .arg(output_file)
        .arg(input_file);

    cmd
}

fn run(mut command: Command, tool: &'static str) -> Result<(), CodegenError> {
    let status = command.status().map_err(|error| match error.kind() {
        std::io::ErrorKind::NotFound => CodegenError::ToolNotFound { tool },
        _ => CodegenError::Io(error),
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(CodegenError::ToolFailed { tool, status })
    }
}
