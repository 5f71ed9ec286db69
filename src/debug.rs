use super::object::ObjFunction;

#[cfg(feature = "debug-bytecode")]
pub fn debug_bytecode(function: &ObjFunction, name: &str) {
    print!("{}", function.chunk.disassemble(name));
}

#[cfg(not(feature = "debug-bytecode"))]
pub fn debug_bytecode(_function: &ObjFunction, _name: &str) {}
