use super::chunk::OpCode;
use super::error::RuntimeError;
use super::gc::{GcRoots, Heap};
use super::natives;
use super::object::{
    GcRef, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjNative, ObjUpvalue, ObjData,
    UpvalueState,
};
use super::reporter::Reporter;
use super::table::Table;
use super::value::Value;
use std::cell::{Cell, RefCell};
use std::convert::TryFrom;
use std::io::{self, Write};

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * 256;

fn name_str(r: GcRef) -> String {
    r.as_obj().data.as_string().unwrap().as_str().to_string()
}

struct CallFrame {
    closure: GcRef, // ObjClosure
    ip: usize,
    slots_base: usize,
}

/// Stack-based bytecode interpreter: a value stack, a call-frame stack bounded
/// at `FRAMES_MAX`, a globals table, and the list of upvalues still open onto
/// the stack. Owns the `Heap` outright, since nothing outlives it.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table<Value>,
    open_upvalues: Vec<GcRef>,
    heap: Heap,
    output: Box<dyn Write>,
}

impl GcRoots for Vm {
    fn mark_roots(&self, heap: &Heap) {
        for v in &self.stack {
            heap.mark_value(*v);
        }
        for frame in &self.frames {
            heap.mark_object(frame.closure);
        }
        for (k, v) in self.globals.iter() {
            heap.mark_object(*k);
            heap.mark_value(*v);
        }
        for uv in &self.open_upvalues {
            heap.mark_object(*uv);
        }
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Builds a VM whose `print` statements write to `output` instead of
    /// stdout, so tests can assert on program output without shelling out to
    /// a built binary.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        let heap = Heap::new();
        let mut globals = Table::new();
        for (name, arity, function) in natives::NATIVES {
            let name_ref = heap.intern_str(name);
            let native_ref = heap.alloc(ObjData::Native(ObjNative {
                name,
                arity: *arity,
                function: *function,
            }));
            globals.set(name_ref, Value::Obj(native_ref));
        }
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals,
            open_upvalues: Vec::new(),
            heap,
            output,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Gives the collector a chance to run *before* the allocation it guards,
    /// not after — a collection triggered once the new object already exists
    /// would sweep it, since nothing has rooted it yet.
    fn alloc(&mut self, data: ObjData) -> GcRef {
        self.heap.collect_if_needed(self);
        self.heap.alloc(data)
    }

    fn intern(&mut self, s: &str) -> GcRef {
        self.heap.collect_if_needed(self);
        self.heap.intern_str(s)
    }

    /// Runs `function` (the script's top-level `ObjFunction`) to completion.
    /// A runtime error is reported through `reporter` and the VM's stacks are
    /// reset so a REPL session can keep going after a failed line.
    pub fn interpret<'a>(&mut self, function: GcRef, reporter: &mut dyn Reporter<'a>) -> Result<(), ()> {
        self.stack.clear();
        self.frames.clear();

        let closure = self.alloc(ObjData::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.stack.push(Value::Obj(closure));
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots_base: 0,
        });

        match self.run() {
            Ok(()) => Ok(()),
            Err(err) => {
                let backtrace = self.build_backtrace();
                reporter.runtime_error(&err.to_string(), &backtrace);
                self.stack.clear();
                self.frames.clear();
                self.open_upvalues.clear();
                Err(())
            }
        }
    }

    fn build_backtrace(&self) -> Vec<(Option<String>, u32)> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let function = closure_function(frame.closure);
                let function_obj = function.as_obj().data.as_function().unwrap();
                let name = function_obj.name.map(name_str);
                let line = function_obj.chunk.line_at(frame.ip.saturating_sub(1));
                (name, line)
            })
            .collect()
    }

    // --- stack primitives ---------------------------------------------

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= STACK_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // --- bytecode stream ------------------------------------------------

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let byte = closure_function(frame.closure)
            .as_obj()
            .data
            .as_function()
            .unwrap()
            .chunk
            .byte_at(frame.ip);
        frame.ip += 1;
        byte
    }

    fn read_u16_operand(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_op(&mut self) -> OpCode {
        let byte = self.read_byte();
        OpCode::try_from(byte).expect("corrupt bytecode")
    }

    fn read_constant(&mut self, index: u8) -> Value {
        let closure = self.frames.last().unwrap().closure;
        closure_function(closure)
            .as_obj()
            .data
            .as_function()
            .unwrap()
            .chunk
            .constant_at(index as usize)
    }

    fn read_constant_obj(&mut self, index: u8) -> GcRef {
        self.read_constant(index)
            .as_obj()
            .expect("name constants are always strings")
    }

    #[cfg(feature = "debug-execution")]
    fn trace_stack(&self) {
        print!("          ");
        for v in &self.stack {
            print!("[ {} ]", v);
        }
        println!();
    }

    // --- upvalues -----------------------------------------------------

    fn upvalue_value(&self, upvalue: GcRef) -> Value {
        match upvalue.as_obj().data.as_upvalue().unwrap().state.get() {
            UpvalueState::Open(i) => self.stack[i],
            UpvalueState::Closed(v) => v,
        }
    }

    fn set_upvalue_value(&mut self, upvalue: GcRef, value: Value) {
        let obj = upvalue.as_obj().data.as_upvalue().unwrap();
        match obj.state.get() {
            UpvalueState::Open(i) => self.stack[i] = value,
            UpvalueState::Closed(_) => obj.state.set(UpvalueState::Closed(value)),
        }
    }

    fn capture_upvalue(&mut self, stack_index: usize) -> GcRef {
        if let Some(existing) = self.open_upvalues.iter().find(|r| {
            matches!(
                r.as_obj().data.as_upvalue().unwrap().state.get(),
                UpvalueState::Open(i) if i == stack_index
            )
        }) {
            return *existing;
        }
        let r = self.alloc(ObjData::Upvalue(ObjUpvalue {
            state: Cell::new(UpvalueState::Open(stack_index)),
        }));
        self.open_upvalues.push(r);
        r
    }

    fn close_upvalues(&mut self, from_index: usize) {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            let r = self.open_upvalues[i];
            let upvalue = r.as_obj().data.as_upvalue().unwrap();
            match upvalue.state.get() {
                UpvalueState::Open(idx) if idx >= from_index => {
                    let value = self.stack[idx];
                    upvalue.state.set(UpvalueState::Closed(value));
                    self.open_upvalues.remove(i);
                }
                _ => i += 1,
            }
        }
    }

    // --- calling ----------------------------------------------------

    fn call_closure(&mut self, closure: GcRef, arg_count: u8) -> Result<(), RuntimeError> {
        let function = closure.as_obj().data.as_closure().unwrap().function;
        let arity = function.as_obj().data.as_function().unwrap().arity;
        if arg_count != arity {
            return Err(RuntimeError::WrongArity {
                expected: arity,
                got: arg_count as usize,
            });
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(RuntimeError::StackOverflow);
        }
        let slots_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots_base,
        });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
        let r = match callee.as_obj() {
            Some(r) => r,
            None => return Err(RuntimeError::NotCallable(callee.type_name())),
        };
        match &r.as_obj().data {
            ObjData::Closure(_) => self.call_closure(r, arg_count),
            ObjData::Native(native) => {
                let (function, arity, name) = (native.function, native.arity, native.name);
                if arg_count != arity {
                    return Err(RuntimeError::WrongArity {
                        expected: arity,
                        got: arg_count as usize,
                    });
                }
                let args_start = self.stack.len() - arg_count as usize;
                let result = function(&self.stack[args_start..])
                    .map_err(|msg| RuntimeError::NativeCallFailed(name, msg))?;
                self.stack.truncate(args_start - 1);
                self.push(result)
            }
            ObjData::Class(_) => {
                let instance = self.alloc(ObjData::Instance(ObjInstance {
                    class: r,
                    fields: RefCell::new(Table::new()),
                }));
                let args_start = self.stack.len() - arg_count as usize - 1;
                self.stack[args_start] = Value::Obj(instance);

                let init_name = self.intern("init");
                let initializer = r
                    .as_obj()
                    .data
                    .as_class()
                    .unwrap()
                    .methods
                    .borrow()
                    .get(&init_name)
                    .copied();
                match initializer {
                    Some(init) => self.call_closure(init, arg_count),
                    None if arg_count != 0 => Err(RuntimeError::WrongArity {
                        expected: 0,
                        got: arg_count as usize,
                    }),
                    None => Ok(()),
                }
            }
            ObjData::BoundMethod(bound) => {
                let (receiver, method) = (bound.receiver, bound.method);
                let args_start = self.stack.len() - arg_count as usize - 1;
                self.stack[args_start] = receiver;
                self.call_closure(method, arg_count)
            }
            other => Err(RuntimeError::NotCallable(other.type_name())),
        }
    }

    fn bind_method(&mut self, class: GcRef, name: GcRef) -> Result<(), RuntimeError> {
        let method = class
            .as_obj()
            .data
            .as_class()
            .unwrap()
            .methods
            .borrow()
            .get(&name)
            .copied();
        let method = method.ok_or_else(|| RuntimeError::UndefinedProperty(name_str(name)))?;
        let receiver = self.pop();
        let bound = self.alloc(ObjData::BoundMethod(ObjBoundMethod { receiver, method }));
        self.push(Value::Obj(bound))
    }

    fn invoke_from_class(
        &mut self,
        class: GcRef,
        name: GcRef,
        arg_count: u8,
    ) -> Result<(), RuntimeError> {
        let method = class
            .as_obj()
            .data
            .as_class()
            .unwrap()
            .methods
            .borrow()
            .get(&name)
            .copied();
        match method {
            Some(m) => self.call_closure(m, arg_count),
            None => Err(RuntimeError::UndefinedProperty(name_str(name))),
        }
    }

    fn invoke(&mut self, name: GcRef, arg_count: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count as usize);
        let instance = match receiver.as_obj() {
            Some(r) if r.as_obj().data.as_instance().is_some() => r,
            _ => return Err(RuntimeError::OnlyInstancesHaveProperties),
        };
        let field = instance
            .as_obj()
            .data
            .as_instance()
            .unwrap()
            .fields
            .borrow()
            .get(&name)
            .copied();
        if let Some(value) = field {
            let args_start = self.stack.len() - arg_count as usize - 1;
            self.stack[args_start] = value;
            return self.call_value(value, arg_count);
        }
        let class = instance.as_obj().data.as_instance().unwrap().class;
        self.invoke_from_class(class, name, arg_count)
    }

    // --- arithmetic -----------------------------------------------------

    fn operand_type_error(&self, a: Value, b: Value, context: &'static str) -> RuntimeError {
        let got = if a.as_number().is_none() {
            a.type_name()
        } else {
            b.type_name()
        };
        RuntimeError::TypeMismatch {
            expected: "number",
            got,
            context,
        }
    }

    fn binary_arith(
        &mut self,
        context: &'static str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => self.push(Value::Number(f(x, y))),
            _ => Err(self.operand_type_error(a, b, context)),
        }
    }

    fn binary_cmp(
        &mut self,
        context: &'static str,
        f: impl Fn(f64, f64) -> bool,
    ) -> Result<(), RuntimeError> {
        let b = self.pop();
        let a = self.pop();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => self.push(Value::Bool(f(x, y))),
            _ => Err(self.operand_type_error(a, b, context)),
        }
    }

    // --- the dispatch loop ----------------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            #[cfg(feature = "debug-execution")]
            self.trace_stack();

            match self.read_op() {
                OpCode::Constant => {
                    let idx = self.read_byte();
                    let v = self.read_constant(idx);
                    self.push(v)?;
                }
                OpCode::Null => self.push(Value::Null)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte();
                    let base = self.frames.last().unwrap().slots_base;
                    let v = self.stack[base + slot as usize];
                    self.push(v)?;
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte();
                    let base = self.frames.last().unwrap().slots_base;
                    let v = self.peek(0);
                    self.stack[base + slot as usize] = v;
                }
                OpCode::GetGlobal => {
                    let idx = self.read_byte();
                    let name = self.read_constant_obj(idx);
                    match self.globals.get(&name) {
                        Some(v) => {
                            let v = *v;
                            self.push(v)?;
                        }
                        None => return Err(RuntimeError::UndefinedVariable(name_str(name))),
                    }
                }
                OpCode::DefineGlobal => {
                    let idx = self.read_byte();
                    let name = self.read_constant_obj(idx);
                    let v = self.pop();
                    self.globals.set(name, v);
                }
                OpCode::SetGlobal => {
                    let idx = self.read_byte();
                    let name = self.read_constant_obj(idx);
                    if self.globals.get(&name).is_none() {
                        return Err(RuntimeError::UndefinedVariable(name_str(name)));
                    }
                    let v = self.peek(0);
                    self.globals.set(name, v);
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte();
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = closure.as_obj().data.as_closure().unwrap().upvalues[slot as usize];
                    let v = self.upvalue_value(upvalue);
                    self.push(v)?;
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte();
                    let v = self.peek(0);
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = closure.as_obj().data.as_closure().unwrap().upvalues[slot as usize];
                    self.set_upvalue_value(upvalue, v);
                }
                OpCode::GetProperty => {
                    let idx = self.read_byte();
                    let name = self.read_constant_obj(idx);
                    let receiver = self.peek(0);
                    let instance = match receiver.as_obj() {
                        Some(r) if r.as_obj().data.as_instance().is_some() => r,
                        _ => return Err(RuntimeError::OnlyInstancesHaveProperties),
                    };
                    let field = instance
                        .as_obj()
                        .data
                        .as_instance()
                        .unwrap()
                        .fields
                        .borrow()
                        .get(&name)
                        .copied();
                    match field {
                        Some(v) => {
                            self.pop();
                            self.push(v)?;
                        }
                        None => {
                            let class = instance.as_obj().data.as_instance().unwrap().class;
                            self.bind_method(class, name)?;
                        }
                    }
                }
                OpCode::SetProperty => {
                    let idx = self.read_byte();
                    let name = self.read_constant_obj(idx);
                    let receiver = self.peek(1);
                    let instance = match receiver.as_obj() {
                        Some(r) if r.as_obj().data.as_instance().is_some() => r,
                        _ => return Err(RuntimeError::OnlyInstancesHaveFields),
                    };
                    let value = self.peek(0);
                    instance
                        .as_obj()
                        .data
                        .as_instance()
                        .unwrap()
                        .fields
                        .borrow_mut()
                        .set(name, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value)?;
                }
                OpCode::GetSuper => {
                    let idx = self.read_byte();
                    let name = self.read_constant_obj(idx);
                    let superclass = self.pop().as_obj().expect("superclass is a class value");
                    self.bind_method(superclass, name)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(Value::values_equal(a, b)))?;
                }
                OpCode::Greater => self.binary_cmp(">", |a, b| a > b)?,
                OpCode::Less => self.binary_cmp("<", |a, b| a < b)?,
                OpCode::Add => {
                    let b = self.pop();
                    let a = self.pop();
                    match (a, b) {
                        (Value::Number(x), Value::Number(y)) => self.push(Value::Number(x + y))?,
                        _ if a.as_string().is_some() && b.as_string().is_some() => {
                            let s = format!("{}{}", a.as_string().unwrap(), b.as_string().unwrap());
                            let r = self.intern(&s);
                            self.push(Value::Obj(r))?;
                        }
                        _ => return Err(RuntimeError::AddOperandsMismatch),
                    }
                }
                OpCode::Subtract => self.binary_arith("-", |a, b| a - b)?,
                OpCode::Multiply => self.binary_arith("*", |a, b| a * b)?,
                OpCode::Divide => self.binary_arith("/", |a, b| a / b)?,
                OpCode::Negate => {
                    let v = self.pop();
                    match v.as_number() {
                        Some(n) => self.push(Value::Number(-n))?,
                        None => {
                            return Err(RuntimeError::TypeMismatch {
                                expected: "number",
                                got: v.type_name(),
                                context: "unary -",
                            })
                        }
                    }
                }
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()))?;
                }
                OpCode::Print => {
                    let v = self.pop();
                    writeln!(self.output, "{}", v).expect("write to vm output");
                }
                OpCode::Jump => {
                    let offset = self.read_u16_operand();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16_operand();
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16_operand();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte();
                    let callee = self.peek(arg_count as usize);
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Invoke => {
                    let idx = self.read_byte();
                    let name = self.read_constant_obj(idx);
                    let arg_count = self.read_byte();
                    self.invoke(name, arg_count)?;
                }
                OpCode::SuperInvoke => {
                    let idx = self.read_byte();
                    let name = self.read_constant_obj(idx);
                    let arg_count = self.read_byte();
                    let superclass = self.pop().as_obj().expect("superclass is a class value");
                    self.invoke_from_class(superclass, name, arg_count)?;
                }
                OpCode::Closure => {
                    let idx = self.read_byte();
                    let function = self.read_constant_obj(idx);
                    let upvalue_count = function.as_obj().data.as_function().unwrap().upvalue_count;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte();
                        if is_local {
                            let base = self.frames.last().unwrap().slots_base;
                            upvalues.push(self.capture_upvalue(base + index as usize));
                        } else {
                            let enclosing = self.frames.last().unwrap().closure;
                            let uv =
                                enclosing.as_obj().data.as_closure().unwrap().upvalues[index as usize];
                            upvalues.push(uv);
                        }
                    }
                    let closure = self.alloc(ObjData::Closure(ObjClosure { function, upvalues }));
                    self.push(Value::Obj(closure))?;
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.slots_base);
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots_base);
                    self.push(result)?;
                }
                OpCode::Class => {
                    let idx = self.read_byte();
                    let name = self.read_constant_obj(idx);
                    let class = self.alloc(ObjData::Class(ObjClass {
                        name,
                        methods: RefCell::new(Table::new()),
                    }));
                    self.push(Value::Obj(class))?;
                }
                OpCode::Inherit => {
                    let superclass_val = self.peek(1);
                    let subclass = self.peek(0).as_obj().expect("subclass is a class value");
                    let superclass = match superclass_val.as_obj() {
                        Some(r) if r.as_obj().data.as_class().is_some() => r,
                        _ => return Err(RuntimeError::SuperclassMustBeClass),
                    };
                    {
                        let super_methods = superclass.as_obj().data.as_class().unwrap().methods.borrow();
                        subclass
                            .as_obj()
                            .data
                            .as_class()
                            .unwrap()
                            .methods
                            .borrow_mut()
                            .add_all(&super_methods);
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let idx = self.read_byte();
                    let name = self.read_constant_obj(idx);
                    let method = self.pop().as_obj().expect("method body is a closure value");
                    let class = self.peek(0).as_obj().expect("class is a class value");
                    class
                        .as_obj()
                        .data
                        .as_class()
                        .unwrap()
                        .methods
                        .borrow_mut()
                        .set(name, method);
                }
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn closure_function(closure: GcRef) -> GcRef {
    closure.as_obj().data.as_closure().unwrap().function
}
