use super::token::Token;
use std::fmt;

#[derive(Debug, Clone, Copy)]
pub enum Phase {
    Tokenizing,
    Compiling,
    Runtime,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Tokenizing => write!(f, "tokenizing"),
            Phase::Compiling => write!(f, "compile"),
            Phase::Runtime => write!(f, "runtime"),
        }
    }
}

#[derive(Debug)]
pub struct Report<'a> {
    pub phase: Phase,
    pub msg: String,
    pub token: Token<'a>,
}

impl<'a> Report<'a> {
    pub fn new(phase: Phase, msg: String, token: Token<'a>) -> Self {
        Report { phase, msg, token }
    }
}

impl<'a> fmt::Display for Report<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[line {}] Error at {}: {}",
            self.token.line, self.token, self.msg
        )
    }
}

pub trait Reporter<'a> {
    fn warning(&mut self, report: Report<'a>);
    fn error(&mut self, report: Report<'a>);
    fn runtime_error(&mut self, msg: &str, backtrace: &[(Option<String>, u32)]);
}
