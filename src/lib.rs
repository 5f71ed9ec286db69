pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod error;
pub mod gc;
pub mod lexer;
pub mod natives;
pub mod object;
pub mod reporter;
pub mod table;
pub mod token;
pub mod value;
pub mod vm;

use gc::Heap;
use reporter::Reporter;
use vm::Vm;

/// Compiles and runs one source string against `vm`, wiring the compiler and
/// VM together in one place so both the file runner and the REPL share it.
pub fn interpret<'a>(source: &'a str, vm: &mut Vm, reporter: &mut dyn Reporter<'a>) -> Result<(), ()> {
    match compiler::compile(source, vm.heap(), reporter) {
        Some(function) => vm.interpret(function, reporter),
        None => Err(()),
    }
}

pub fn new_heap() -> Heap {
    Heap::new()
}
