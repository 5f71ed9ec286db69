use std::fmt;

/// One frame of a runtime backtrace: the enclosing function's name (`None` for
/// the top-level script) and the line the call/error happened at. Printed
/// innermost-first.
#[derive(Debug, Clone)]
pub struct Backtrace(pub Vec<(Option<String>, u32)>);

impl fmt::Display for Backtrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, line) in &self.0 {
            match name {
                Some(name) => writeln!(f, "[line {}] in {}()", line, name)?,
                None => writeln!(f, "[line {}] in script", line)?,
            }
        }
        Ok(())
    }
}

/// Everything the compiler can reject a program for. Each variant carries just
/// what its message needs; the surrounding `[line N] Error at 'x':` framing is
/// added by `Report`'s `Display`, not repeated here.
#[derive(Debug, Clone)]
pub enum CompileError {
    UnexpectedToken,
    UnterminatedString,
    InvalidNumber,
    ExpectedToken(&'static str),
    ExpectedExpression,
    InvalidAssignmentTarget,
    DuplicateLocal(String),
    SelfReferentialInitializer(String),
    TooManyLocals,
    TooManyUpvalues,
    TooManyConstants,
    TooManyArguments,
    TooManyParameters,
    JumpTooLarge,
    ReturnAtTopLevel,
    ReturnValueFromInitializer,
    ThisOutsideClass,
    SuperOutsideClass,
    SuperWithoutSuperclass,
    ClassInheritsItself(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnexpectedToken => write!(f, "Unexpected character."),
            CompileError::UnterminatedString => write!(f, "Unterminated string."),
            CompileError::InvalidNumber => write!(f, "Invalid number literal."),
            CompileError::ExpectedToken(what) => write!(f, "Expect {}.", what),
            CompileError::ExpectedExpression => write!(f, "Expect expression."),
            CompileError::InvalidAssignmentTarget => write!(f, "Invalid assignment target."),
            CompileError::DuplicateLocal(name) => {
                write!(f, "Already a variable named '{}' in this scope.", name)
            }
            CompileError::SelfReferentialInitializer(name) => write!(
                f,
                "Can't read local variable '{}' in its own initializer.",
                name
            ),
            CompileError::TooManyLocals => write!(f, "Too many local variables in function."),
            CompileError::TooManyUpvalues => write!(f, "Too many closure variables in function."),
            CompileError::TooManyConstants => write!(f, "Too many constants in one chunk."),
            CompileError::TooManyArguments => write!(f, "Can't have more than 255 arguments."),
            CompileError::TooManyParameters => write!(f, "Can't have more than 255 parameters."),
            CompileError::JumpTooLarge => write!(f, "Too much code to jump over."),
            CompileError::ReturnAtTopLevel => write!(f, "Can't return from top-level code."),
            CompileError::ReturnValueFromInitializer => {
                write!(f, "Can't return a value from an initializer.")
            }
            CompileError::ThisOutsideClass => write!(f, "Can't use 'this' outside of a class."),
            CompileError::SuperOutsideClass => write!(f, "Can't use 'super' outside of a class."),
            CompileError::SuperWithoutSuperclass => {
                write!(f, "Can't use 'super' in a class with no superclass.")
            }
            CompileError::ClassInheritsItself(name) => {
                write!(f, "A class can't inherit from itself ('{}').", name)
            }
        }
    }
}

/// Everything that can go wrong while the VM is running. `Backtrace` is
/// attached by the VM when it unwinds, not by the site that first notices the
/// error, since only the VM knows the live call-frame stack.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    TypeMismatch { expected: &'static str, got: &'static str, context: &'static str },
    AddOperandsMismatch,
    UndefinedVariable(String),
    UndefinedProperty(String),
    NotCallable(&'static str),
    WrongArity { expected: u8, got: usize },
    StackOverflow,
    OnlyInstancesHaveProperties,
    OnlyInstancesHaveFields,
    SuperclassMustBeClass,
    NativeCallFailed(&'static str, String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TypeMismatch {
                expected,
                got,
                context,
            } => write!(f, "Expected {} for {}, got {}.", expected, context, got),
            RuntimeError::AddOperandsMismatch => {
                write!(f, "Operands must be two numbers or two strings.")
            }
            RuntimeError::UndefinedVariable(name) => write!(f, "Undefined variable '{}'.", name),
            RuntimeError::UndefinedProperty(name) => write!(f, "Undefined property '{}'.", name),
            RuntimeError::NotCallable(got) => write!(f, "Can only call functions and classes, not {}.", got),
            RuntimeError::WrongArity { expected, got } => {
                write!(f, "Expected {} arguments but got {}.", expected, got)
            }
            RuntimeError::StackOverflow => write!(f, "Stack overflow."),
            RuntimeError::OnlyInstancesHaveProperties => {
                write!(f, "Only instances have properties.")
            }
            RuntimeError::OnlyInstancesHaveFields => write!(f, "Only instances have fields."),
            RuntimeError::SuperclassMustBeClass => write!(f, "Superclass must be a class."),
            RuntimeError::NativeCallFailed(name, msg) => {
                write!(f, "Call to native function '{}' failed: {}.", name, msg)
            }
        }
    }
}
