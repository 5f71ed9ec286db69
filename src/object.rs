use super::chunk::Chunk;
use super::table::Table;
use super::value::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;

/// A `Copy` handle to a heap-allocated object. Deliberately a raw, non-owning
/// pointer rather than `Rc<RefCell<_>>` — the collector in `gc.rs` needs to
/// trace and free cyclic graphs (an instance pointing at a class pointing at
/// a method closure pointing at an upvalue pointing back at the instance),
/// which refcounting cannot reclaim on its own. All unsafety is confined to
/// this type and `gc::Heap`; everywhere else only sees safe `&ObjData`
/// borrows.
#[derive(Clone, Copy)]
pub struct GcRef(pub(crate) NonNull<Obj>);

impl GcRef {
    pub fn as_obj(&self) -> &Obj {
        // Safe as long as the heap that owns this object hasn't swept it; the
        // VM/compiler never hold a `GcRef` across a point where the object they
        // refer to could have been collected without being rooted.
        unsafe { self.0.as_ref() }
    }

    pub fn ptr_eq(&self, other: &GcRef) -> bool {
        self.0 == other.0
    }
}

impl PartialEq for GcRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
impl Eq for GcRef {}

pub struct Obj {
    pub is_marked: Cell<bool>,
    pub next: Cell<Option<GcRef>>,
    pub data: ObjData,
}

pub struct ObjString {
    pub hash: u32,
    pub chars: String,
}

impl ObjString {
    pub fn as_str(&self) -> &str {
        &self.chars
    }
}

pub struct ObjFunction {
    pub name: Option<GcRef>, // ObjString, None for the top-level script
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

#[derive(Clone, Copy)]
pub enum UpvalueState {
    /// Still aliases a live stack slot.
    Open(usize),
    Closed(Value),
}

pub struct ObjUpvalue {
    pub state: Cell<UpvalueState>,
}

pub struct ObjClosure {
    pub function: GcRef, // ObjFunction
    pub upvalues: Vec<GcRef>, // ObjUpvalue, one per captured variable
}

pub struct ObjClass {
    pub name: GcRef, // ObjString
    pub methods: RefCell<Table<GcRef>>, // name -> ObjClosure
}

pub struct ObjInstance {
    pub class: GcRef, // ObjClass
    pub fields: RefCell<Table<Value>>,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: GcRef, // ObjClosure
}

pub enum ObjData {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Upvalue(ObjUpvalue),
    Closure(ObjClosure),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl ObjData {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjData::String(_) => "string",
            ObjData::Function(_) => "function",
            ObjData::Native(_) => "native function",
            ObjData::Upvalue(_) => "upvalue",
            ObjData::Closure(_) => "function",
            ObjData::Class(_) => "class",
            ObjData::Instance(_) => "instance",
            ObjData::BoundMethod(_) => "function",
        }
    }

    pub fn as_string(&self) -> Option<&ObjString> {
        match self {
            ObjData::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ObjFunction> {
        match self {
            ObjData::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ObjClosure> {
        match self {
            ObjData::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&ObjNative> {
        match self {
            ObjData::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ObjClass> {
        match self {
            ObjData::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&ObjInstance> {
        match self {
            ObjData::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bound_method(&self) -> Option<&ObjBoundMethod> {
        match self {
            ObjData::BoundMethod(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&ObjUpvalue> {
        match self {
            ObjData::Upvalue(u) => Some(u),
            _ => None,
        }
    }
}

fn function_name(function: &ObjFunction) -> String {
    match &function.name {
        Some(name) => name.as_obj().data.as_string().unwrap().as_str().to_string(),
        None => "script".to_string(),
    }
}

impl fmt::Display for ObjData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjData::String(s) => write!(f, "{}", s.chars),
            ObjData::Function(func) => write!(f, "<fn {}>", function_name(func)),
            ObjData::Native(n) => write!(f, "<native fn {}>", n.name),
            ObjData::Upvalue(_) => write!(f, "upvalue"),
            ObjData::Closure(c) => {
                write!(f, "<fn {}>", function_name(c.function.as_obj().data.as_function().unwrap()))
            }
            ObjData::Class(c) => write!(f, "{}", c.name.as_obj().data.as_string().unwrap().as_str()),
            ObjData::Instance(i) => write!(
                f,
                "{} instance",
                i.class.as_obj().data.as_class().unwrap().name.as_obj().data.as_string().unwrap().as_str()
            ),
            ObjData::BoundMethod(b) => write!(
                f,
                "<fn {}>",
                function_name(
                    b.method
                        .as_obj()
                        .data
                        .as_closure()
                        .unwrap()
                        .function
                        .as_obj()
                        .data
                        .as_function()
                        .unwrap()
                )
            ),
        }
    }
}
