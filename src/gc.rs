use super::object::{
    GcRef, Obj, ObjData, ObjString, UpvalueState,
};
use super::table::{hash_str, Interner};
use super::value::Value;
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

const GROW_FACTOR: usize = 2;
const INITIAL_NEXT_GC: usize = 1024 * 1024;

/// Anything the collector must treat as a root: every live value stack slot,
/// every call frame's closure, every open upvalue, the globals table, and
/// (only while a compile is in flight) the compiler's own under-construction
/// functions. Implemented by both `Vm` and `Compiler` so a collection
/// triggered from either phase walks the right set.
pub trait GcRoots {
    fn mark_roots(&self, heap: &Heap);
}

impl GcRoots for () {
    fn mark_roots(&self, _heap: &Heap) {}
}

/// Owns every object ever allocated, the string-interning table, and the
/// mark/sweep bookkeeping. Non-moving: a `GcRef` stays valid for as long as
/// the object it points to remains reachable.
pub struct Heap {
    head: Cell<Option<GcRef>>,
    bytes_allocated: Cell<usize>,
    next_gc: Cell<usize>,
    pub stress: Cell<bool>,
    gray: RefCell<Vec<GcRef>>,
    strings: RefCell<Interner>,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            head: Cell::new(None),
            bytes_allocated: Cell::new(0),
            next_gc: Cell::new(INITIAL_NEXT_GC),
            stress: Cell::new(false),
            gray: RefCell::new(Vec::new()),
            strings: RefCell::new(Interner::new()),
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.get()
    }

    pub fn should_collect(&self) -> bool {
        self.stress.get() || self.bytes_allocated.get() > self.next_gc.get()
    }

    /// Low-level allocation: links the object into the all-objects list and
    /// charges its size against `bytes_allocated`. Does not itself decide to
    /// collect — callers (the VM, the compiler, the interner) call
    /// `collect_if_needed` at their own allocation points instead of having
    /// policy hidden inside a single primitive.
    pub fn alloc(&self, data: ObjData) -> GcRef {
        let size = std::mem::size_of::<Obj>();
        let boxed = Box::new(Obj {
            is_marked: Cell::new(false),
            next: Cell::new(self.head.get()),
            data,
        });
        let ptr = NonNull::new(Box::into_raw(boxed)).unwrap();
        let r = GcRef(ptr);
        self.head.set(Some(r));
        self.bytes_allocated.set(self.bytes_allocated.get() + size);
        r
    }

    pub fn collect_if_needed(&self, roots: &dyn GcRoots) {
        if self.should_collect() {
            self.collect(roots);
        }
    }

    pub fn collect(&self, roots: &dyn GcRoots) {
        #[cfg(feature = "debug-gc")]
        println!("-- gc begin");

        roots.mark_roots(self);
        self.trace_references();
        self.strings.borrow_mut().remove_unmarked();
        self.sweep();

        self.next_gc
            .set(self.bytes_allocated.get() * GROW_FACTOR);

        #[cfg(feature = "debug-gc")]
        println!("-- gc end");
    }

    pub fn mark_value(&self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    pub fn mark_object(&self, r: GcRef) {
        let obj = r.as_obj();
        if obj.is_marked.get() {
            return;
        }
        obj.is_marked.set(true);
        self.gray.borrow_mut().push(r);
    }

    fn trace_references(&self) {
        loop {
            let r = self.gray.borrow_mut().pop();
            let r = match r {
                Some(r) => r,
                None => break,
            };
            self.blacken(r);
        }
    }

    fn blacken(&self, r: GcRef) {
        let obj = r.as_obj();
        match &obj.data {
            ObjData::String(_) | ObjData::Native(_) => {}
            ObjData::Upvalue(u) => {
                if let UpvalueState::Closed(v) = u.state.get() {
                    self.mark_value(v);
                }
            }
            ObjData::Function(f) => {
                if let Some(name) = f.name {
                    self.mark_object(name);
                }
                for constant in f.chunk.constants() {
                    self.mark_value(*constant);
                }
            }
            ObjData::Closure(c) => {
                self.mark_object(c.function);
                for uv in &c.upvalues {
                    self.mark_object(*uv);
                }
            }
            ObjData::Class(c) => {
                self.mark_object(c.name);
                for (k, v) in c.methods.borrow().iter() {
                    self.mark_object(*k);
                    self.mark_object(*v);
                }
            }
            ObjData::Instance(i) => {
                self.mark_object(i.class);
                for (k, v) in i.fields.borrow().iter() {
                    self.mark_object(*k);
                    self.mark_value(*v);
                }
            }
            ObjData::BoundMethod(b) => {
                self.mark_value(b.receiver);
                self.mark_object(b.method);
            }
        }
    }

    fn sweep(&self) {
        let mut previous: Option<GcRef> = None;
        let mut current = self.head.get();
        while let Some(r) = current {
            let obj = r.as_obj();
            let next = obj.next.get();
            if obj.is_marked.get() {
                obj.is_marked.set(false);
                previous = Some(r);
                current = next;
            } else {
                match previous {
                    Some(p) => p.as_obj().next.set(next),
                    None => self.head.set(next),
                }
                current = next;
                let size = std::mem::size_of::<Obj>();
                self.bytes_allocated.set(self.bytes_allocated.get() - size);
                unsafe {
                    drop(Box::from_raw(r.0.as_ptr()));
                }
            }
        }
    }

    /// Interns `s`, allocating a new `ObjString` only on a miss. Strings are
    /// deduplicated by *content*, not identity — see `table::Interner`.
    pub fn intern_str(&self, s: &str) -> GcRef {
        let hash = hash_str(s);
        if let Some(existing) = self.strings.borrow().find(s, hash) {
            return existing;
        }
        let r = self.alloc(ObjData::String(ObjString {
            hash,
            chars: s.to_string(),
        }));
        self.strings.borrow_mut().insert(r);
        r
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.head.get();
        while let Some(r) = current {
            let next = r.as_obj().next.get();
            unsafe {
                drop(Box::from_raw(r.0.as_ptr()));
            }
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjData;

    struct NoRoots;
    impl GcRoots for NoRoots {
        fn mark_roots(&self, _heap: &Heap) {}
    }

    #[test]
    fn unreachable_objects_are_collected() {
        let heap = Heap::new();
        let a = heap.intern_str("kept");
        heap.mark_object(a);
        let _garbage = heap.alloc(ObjData::String(ObjString {
            hash: hash_str("garbage"),
            chars: "garbage".to_string(),
        }));
        heap.collect(&NoRoots);
        // `a` was marked before the collection ran, as a real root-marker would
        // do; after sweep only it should remain reachable via re-interning.
        let again = heap.intern_str("kept");
        assert!(again.ptr_eq(&a));
    }

    #[test]
    fn stress_mode_collects_every_allocation() {
        let heap = Heap::new();
        heap.stress.set(true);
        for i in 0..5 {
            heap.intern_str(&format!("s{i}"));
            heap.collect_if_needed(&NoRoots);
        }
    }
}
