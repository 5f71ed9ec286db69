use super::chunk::{Chunk, OpCode};
use super::debug;
use super::error::CompileError;
use super::gc::{GcRoots, Heap};
use super::lexer::Lexer;
use super::object::{GcRef, ObjData, ObjFunction};
use super::reporter::{Phase, Report, Reporter};
use super::token::{Token, TokenKind};
use super::value::Value;

/// Pratt-parser binding powers, from loosest to tightest. Encoded as a match
/// over `TokenKind` (see `rule_precedence`) rather than a table of
/// fn-pointers, since a table of parse-function pointers closing over
/// `&mut Compiler` fights the borrow checker for no real benefit at this
/// scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

fn rule_precedence(kind: TokenKind) -> Precedence {
    use TokenKind::*;
    match kind {
        OParen | Dot => Precedence::Call,
        Minus | Plus => Precedence::Term,
        Slash | Star => Precedence::Factor,
        BangEqual | EqualEqual => Precedence::Equality,
        Greater | GreaterEqual | Less | LessEqual => Precedence::Comparison,
        And => Precedence::And,
        Or => Precedence::Or,
        _ => Precedence::None,
    }
}

struct Local<'a> {
    name: Token<'a>,
    depth: Option<usize>,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Function,
    Method,
    Initializer,
    Script,
}

struct FuncState<'a> {
    function_type: FunctionType,
    name: Option<String>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'a>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: usize,
}

impl<'a> FuncState<'a> {
    fn new(function_type: FunctionType, name: Option<String>) -> Self {
        // Slot 0 is reserved: `this` for methods/initializers (so `this`
        // resolves as an ordinary local), unnamed (unreachable by any real
        // identifier) for plain functions and the top-level script.
        let reserved = if function_type == FunctionType::Method
            || function_type == FunctionType::Initializer
        {
            "this"
        } else {
            ""
        };
        Self {
            function_type,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local {
                name: Token::synthetic(reserved),
                depth: Some(0),
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

/// Single-pass compiler: parses and emits bytecode in the same walk, with no
/// intermediate AST. `funcs` is an explicit stack of in-progress function
/// states (current = last); an enclosing function is referred to by index
/// rather than by back-pointer.
pub struct Compiler<'a, 'h, 'r> {
    lexer: Lexer<'a>,
    current: Token<'a>,
    previous: Token<'a>,
    had_error: bool,
    panic_mode: bool,
    reporter: &'r mut dyn Reporter<'a>,
    heap: &'h Heap,
    funcs: Vec<FuncState<'a>>,
    classes: Vec<ClassState>,
}

impl<'a, 'h, 'r> GcRoots for Compiler<'a, 'h, 'r> {
    fn mark_roots(&self, heap: &Heap) {
        for func in &self.funcs {
            for constant in func.chunk.constants() {
                heap.mark_value(*constant);
            }
        }
    }
}

impl<'a, 'h, 'r> Compiler<'a, 'h, 'r> {
    fn new(source: &'a str, heap: &'h Heap, reporter: &'r mut dyn Reporter<'a>) -> Self {
        Self {
            lexer: Lexer::new(source),
            current: Token::synthetic(""),
            previous: Token::synthetic(""),
            had_error: false,
            panic_mode: false,
            reporter,
            heap,
            funcs: vec![FuncState::new(FunctionType::Script, None)],
            classes: Vec::new(),
        }
    }

    // --- token stream -----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.scan_token();
            match self.current.kind {
                TokenKind::Unknown => self.error_at_current(CompileError::UnexpectedToken),
                TokenKind::UnterminatedString => {
                    self.error_at_current(CompileError::UnterminatedString)
                }
                TokenKind::InvalidNumber => self.error_at_current(CompileError::InvalidNumber),
                _ => break,
            }
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, what: &'static str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(CompileError::ExpectedToken(what));
        }
    }

    fn error_at(&mut self, token: Token<'a>, err: CompileError) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.reporter
            .error(Report::new(Phase::Compiling, err.to_string(), token));
    }

    fn error(&mut self, err: CompileError) {
        let token = self.previous;
        self.error_at(token, err);
    }

    fn error_at_current(&mut self, err: CompileError) {
        let token = self.current;
        self.error_at(token, err);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            use TokenKind::*;
            match self.current.kind {
                Class | Fun | Var | For | If | While | Print | Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // --- chunk helpers ------------------------------------------------

    fn current_func(&self) -> &FuncState<'a> {
        self.funcs.last().unwrap()
    }

    fn current_func_mut(&mut self) -> &mut FuncState<'a> {
        self.funcs.last_mut().unwrap()
    }

    fn current_chunk(&self) -> &Chunk {
        &self.current_func().chunk
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_func_mut().chunk
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.current_chunk_mut().emit_op(op, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk_mut().emit_byte(byte, line);
    }

    fn emit_op_byte(&mut self, op: OpCode, byte: u8) {
        let line = self.previous.line;
        self.current_chunk_mut().emit_op_byte(op, byte, line);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        let line = self.previous.line;
        self.current_chunk_mut().emit_jump(op, line)
    }

    fn patch_jump(&mut self, offset: usize) {
        if self.current_chunk().len() - offset - 2 > u16::MAX as usize {
            self.error(CompileError::JumpTooLarge);
            return;
        }
        self.current_chunk_mut().patch_jump(offset);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.previous.line;
        self.current_chunk_mut().emit_loop(loop_start, line);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.current_chunk_mut().add_constant(value);
        if index > u8::MAX as usize {
            self.error(CompileError::TooManyConstants);
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let byte = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, byte);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let r = self.heap.intern_str(name);
        self.make_constant(Value::Obj(r))
    }

    fn emit_return(&mut self) {
        if self.current_func().function_type == FunctionType::Initializer {
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Null);
        }
        self.emit_op(OpCode::Return);
    }

    // --- scopes & variables ---------------------------------------------

    fn begin_scope(&mut self) {
        self.current_func_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let depth = {
            let func = self.current_func_mut();
            func.scope_depth -= 1;
            func.scope_depth
        };
        loop {
            let action = match self.current_func().locals.last() {
                Some(local) if local.depth.map_or(false, |d| d > depth) => {
                    Some(local.is_captured)
                }
                _ => None,
            };
            match action {
                Some(is_captured) => {
                    if is_captured {
                        self.emit_op(OpCode::CloseUpvalue);
                    } else {
                        self.emit_op(OpCode::Pop);
                    }
                    self.current_func_mut().locals.pop();
                }
                None => break,
            }
        }
    }

    fn add_local(&mut self, name: Token<'a>) {
        if self.current_func().locals.len() >= 256 {
            self.error_at(name, CompileError::TooManyLocals);
            return;
        }
        self.current_func_mut().locals.push(Local {
            name,
            depth: None,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self, name: Token<'a>) {
        if self.current_func().scope_depth == 0 {
            return;
        }
        let scope_depth = self.current_func().scope_depth;
        let duplicate = self
            .current_func()
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth.map_or(true, |d| d >= scope_depth))
            .any(|l| l.depth == Some(scope_depth) && l.name.lexeme == name.lexeme);
        if duplicate {
            self.error_at(name, CompileError::DuplicateLocal(name.lexeme.to_string()));
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, what: &'static str) -> u8 {
        self.consume(TokenKind::Identifier, what);
        let name = self.previous;
        self.declare_variable(name);
        if self.current_func().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(name.lexeme)
    }

    fn mark_initialized(&mut self) {
        if self.current_func().scope_depth == 0 {
            return;
        }
        let depth = self.current_func().scope_depth;
        self.current_func_mut().locals.last_mut().unwrap().depth = Some(depth);
    }

    fn define_variable(&mut self, global: u8) {
        if self.current_func().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    fn resolve_local(&mut self, func_index: usize, name: &str) -> Option<usize> {
        let found = self.funcs[func_index]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.name.lexeme == name)
            .map(|(i, l)| (i, l.depth));
        match found {
            Some((i, None)) => {
                self.error(CompileError::SelfReferentialInitializer(name.to_string()));
                Some(i)
            }
            Some((i, Some(_))) => Some(i),
            None => None,
        }
    }

    fn add_upvalue(&mut self, func_index: usize, index: u8, is_local: bool) -> usize {
        let existing = self.funcs[func_index]
            .upvalues
            .iter()
            .position(|uv| uv.index == index && uv.is_local == is_local);
        if let Some(i) = existing {
            return i;
        }
        if self.funcs[func_index].upvalues.len() >= 255 {
            self.error(CompileError::TooManyUpvalues);
            return 0;
        }
        self.funcs[func_index]
            .upvalues
            .push(UpvalueDesc { index, is_local });
        self.funcs[func_index].upvalues.len() - 1
    }

    fn resolve_upvalue(&mut self, func_index: usize, name: &str) -> Option<usize> {
        if func_index == 0 {
            return None;
        }
        let enclosing = func_index - 1;
        if let Some(slot) = self.resolve_local(enclosing, name) {
            self.funcs[enclosing].locals[slot].is_captured = true;
            return Some(self.add_upvalue(func_index, slot as u8, true));
        }
        if let Some(slot) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(func_index, slot as u8, false));
        }
        None
    }

    fn named_variable(&mut self, name: Token<'a>, can_assign: bool) {
        let func_index = self.funcs.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(func_index, name.lexeme)
        {
            (OpCode::GetLocal, OpCode::SetLocal, slot as u8)
        } else if let Some(slot) = self.resolve_upvalue(func_index, name.lexeme) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot as u8)
        } else {
            let constant = self.identifier_constant(name.lexeme);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    // --- expressions ------------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign) {
            self.error(CompileError::ExpectedExpression);
            return;
        }
        while precedence <= rule_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind, can_assign);
        }
        if can_assign && self.match_token(TokenKind::Equal) {
            self.error(CompileError::InvalidAssignmentTarget);
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        use TokenKind::*;
        match kind {
            OParen => self.grouping(),
            Minus | Bang => self.unary(),
            Number => self.number(),
            String => self.string(),
            False | True | Nil => self.literal(),
            Identifier => self.variable(can_assign),
            This => self.this_expr(),
            Super => self.super_expr(),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) {
        use TokenKind::*;
        match kind {
            Minus | Plus | Slash | Star | BangEqual | EqualEqual | Greater | GreaterEqual
            | Less | LessEqual => self.binary(),
            And => self.and_expr(),
            Or => self.or_expr(),
            OParen => self.call(),
            Dot => self.dot(can_assign),
            _ => {}
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::CParen, "')' after expression");
    }

    fn number(&mut self) {
        let n: f64 = self.previous.lexeme.parse().unwrap_or(f64::NAN);
        self.emit_constant(Value::Number(n));
    }

    fn string(&mut self) {
        let lexeme = self.previous.lexeme;
        let contents = &lexeme[1..lexeme.len() - 1];
        let r = self.heap.intern_str(contents);
        self.emit_constant(Value::Obj(r));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Null),
            _ => unreachable!(),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    fn this_expr(&mut self) {
        if self.classes.is_empty() {
            self.error(CompileError::ThisOutsideClass);
        }
        self.named_variable(self.previous, false);
    }

    fn super_expr(&mut self) {
        if self.classes.is_empty() {
            self.error(CompileError::SuperOutsideClass);
        } else if !self.classes.last().unwrap().has_superclass {
            self.error(CompileError::SuperWithoutSuperclass);
        }
        self.consume(TokenKind::Dot, "'.' after 'super'");
        self.consume(TokenKind::Identifier, "superclass method name");
        let method = self.identifier_constant(self.previous.lexeme);

        self.named_variable(Token::synthetic("this"), false);
        if self.match_token(TokenKind::OParen) {
            let arg_count = self.argument_list();
            self.named_variable(Token::synthetic("super"), false);
            self.emit_op_byte(OpCode::SuperInvoke, method);
            self.emit_byte(arg_count);
        } else {
            self.named_variable(Token::synthetic("super"), false);
            self.emit_op_byte(OpCode::GetSuper, method);
        }
    }

    fn unary(&mut self) {
        let kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self) {
        let kind = self.previous.kind;
        self.parse_precedence(rule_precedence(kind).next());
        match kind {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!(),
        }
    }

    fn and_expr(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u16 = 0;
        if !self.check(TokenKind::CParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error(CompileError::TooManyArguments);
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::CParen, "')' after arguments");
        count as u8
    }

    fn call(&mut self) {
        let arg_count = self.argument_list();
        self.emit_op_byte(OpCode::Call, arg_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "property name after '.'");
        let name = self.identifier_constant(self.previous.lexeme);
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(OpCode::SetProperty, name);
        } else if self.match_token(TokenKind::OParen) {
            let arg_count = self.argument_list();
            self.emit_op_byte(OpCode::Invoke, name);
            self.emit_byte(arg_count);
        } else {
            self.emit_op_byte(OpCode::GetProperty, name);
        }
    }

    // --- statements ---------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::OBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::CBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::CBrace, "'}' after block");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "';' after value");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "';' after expression");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::OParen, "'(' after 'if'");
        self.expression();
        self.consume(TokenKind::CParen, "')' after condition");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();
        self.consume(TokenKind::OParen, "'(' after 'while'");
        self.expression();
        self.consume(TokenKind::CParen, "')' after condition");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::OParen, "'(' after 'for'");

        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "';' after loop condition");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::CParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::CParen, "')' after for clauses");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.funcs.len() == 1 {
            self.error(CompileError::ReturnAtTopLevel);
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.current_func().function_type == FunctionType::Initializer {
                self.error(CompileError::ReturnValueFromInitializer);
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "';' after return value");
            self.emit_op(OpCode::Return);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("variable name");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Null);
        }
        self.consume(TokenKind::Semicolon, "';' after variable declaration");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("function name");
        self.mark_initialized();
        let name = self.previous.lexeme.to_string();
        self.function(FunctionType::Function, name);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType, name: String) {
        self.funcs.push(FuncState::new(function_type, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::OParen, "'(' after function name");
        if !self.check(TokenKind::CParen) {
            loop {
                self.current_func_mut().arity += 1;
                if self.current_func().arity > 255 {
                    self.error_at_current(CompileError::TooManyParameters);
                }
                let param = self.parse_variable("parameter name");
                self.define_variable(param);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::CParen, "')' after parameters");
        self.consume(TokenKind::OBrace, "'{' before function body");
        self.block();

        let (func_ref, upvalues) = self.end_function();
        let index = self.make_constant(Value::Obj(func_ref));
        self.emit_op_byte(OpCode::Closure, index);
        for uv in &upvalues {
            self.emit_byte(if uv.is_local { 1 } else { 0 });
            self.emit_byte(uv.index);
        }
    }

    fn end_function(&mut self) -> (GcRef, Vec<UpvalueDesc>) {
        self.emit_return();
        // Collect while `func_state` is still on `self.funcs`, so `mark_roots`
        // can see its chunk's constants; once it's popped, nothing covers it
        // until `func_ref` is handed back to the caller, so no further
        // allocation in this function may trigger a collection.
        self.heap.collect_if_needed(self);
        let func_state = self.funcs.pop().unwrap();
        let display_name = func_state
            .name
            .clone()
            .unwrap_or_else(|| "script".to_string());
        let name_ref = func_state.name.as_deref().map(|n| self.heap.intern_str(n));
        let upvalue_count = func_state.upvalues.len();
        let obj = ObjFunction {
            name: name_ref,
            arity: func_state.arity,
            upvalue_count,
            chunk: func_state.chunk,
        };
        let func_ref = self.heap.alloc(ObjData::Function(obj));

        #[cfg(feature = "debug-bytecode")]
        if !self.had_error {
            debug::debug_bytecode(
                func_ref.as_obj().data.as_function().unwrap(),
                &display_name,
            );
        }
        #[cfg(not(feature = "debug-bytecode"))]
        let _ = display_name;

        (func_ref, func_state.upvalues)
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "method name");
        let name = self.previous.lexeme.to_string();
        let constant = self.identifier_constant(&name);
        let function_type = if name == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(function_type, name);
        self.emit_op_byte(OpCode::Method, constant);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "class name");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name.lexeme);
        self.declare_variable(class_name);

        self.emit_op_byte(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "superclass name");
            self.variable(false);
            if class_name.lexeme == self.previous.lexeme {
                self.error(CompileError::ClassInheritsItself(
                    class_name.lexeme.to_string(),
                ));
            }

            self.begin_scope();
            self.add_local(Token::synthetic("super"));
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::OBrace, "'{' before class body");
        while !self.check(TokenKind::CBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::CBrace, "'}' after class body");
        self.emit_op(OpCode::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }
}

/// Compiles `source` into a top-level `ObjFunction`, or `None` if any compile
/// error was reported. Errors are delivered through `reporter`, never by
/// panicking or aborting the process — it's up to the caller to decide what
/// to do with a failed compile.
pub fn compile<'a>(
    source: &'a str,
    heap: &Heap,
    reporter: &mut dyn Reporter<'a>,
) -> Option<GcRef> {
    let mut compiler = Compiler::new(source, heap, reporter);
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let (func_ref, _upvalues) = compiler.end_function();
    if compiler.had_error {
        None
    } else {
        Some(func_ref)
    }
}
