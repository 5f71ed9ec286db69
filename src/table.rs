use super::object::GcRef;

const MAX_LOAD: f64 = 0.75;

enum Slot<V> {
    Empty,
    Tombstone,
    Occupied(GcRef, V),
}

/// Open-addressed, linear-probing hash table keyed by interned-string identity
/// (two keys are "equal" iff they're the same heap object — sound only because
/// every `ObjString` the compiler/VM ever produce went through the `Interner`).
/// Kept deliberately separate from `Interner`: that one probes by string
/// *content* to decide whether to allocate at all, this one never compares
/// content, only pointers, because by the time a key reaches here it has
/// already been interned.
pub struct Table<V> {
    entries: Vec<Slot<V>>,
    count: usize, // occupied + tombstones
}

impl<V> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Table<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, Slot::Occupied(..)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn key_hash(key: &GcRef) -> u32 {
        key.as_obj().data.as_string().expect("table key must be an interned string").hash
    }

    fn find_slot(entries: &[Slot<V>], key: &GcRef) -> usize {
        let capacity = entries.len();
        let mut index = (Self::key_hash(key) as usize) & (capacity - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            match &entries[index] {
                Slot::Empty => return first_tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied(k, _) => {
                    if k.ptr_eq(key) {
                        return index;
                    }
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() {
            8
        } else {
            self.entries.len() * 2
        };
        let mut new_entries: Vec<Slot<V>> = (0..new_capacity).map(|_| Slot::Empty).collect();
        let mut live = 0;
        for slot in std::mem::take(&mut self.entries) {
            if let Slot::Occupied(k, v) = slot {
                let index = Self::find_slot(&new_entries, &k);
                new_entries[index] = Slot::Occupied(k, v);
                live += 1;
            }
        }
        self.entries = new_entries;
        self.count = live;
    }

    /// Inserts, returning the previous value if the key was already present.
    pub fn set(&mut self, key: GcRef, value: V) -> Option<V> {
        if self.entries.is_empty() || (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            self.grow();
        }
        let index = Self::find_slot(&self.entries, &key);
        let was_new = matches!(self.entries[index], Slot::Empty);
        let old = match std::mem::replace(&mut self.entries[index], Slot::Occupied(key, value)) {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        };
        if was_new {
            self.count += 1;
        }
        old
    }

    pub fn get(&self, key: &GcRef) -> Option<&V> {
        if self.entries.is_empty() {
            return None;
        }
        match &self.entries[Self::find_slot(&self.entries, key)] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &GcRef) -> Option<&mut V> {
        if self.entries.is_empty() {
            return None;
        }
        let index = Self::find_slot(&self.entries, key);
        match &mut self.entries[index] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn delete(&mut self, key: &GcRef) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_slot(&self.entries, key);
        match self.entries[index] {
            Slot::Occupied(..) => {
                self.entries[index] = Slot::Tombstone;
                true
            }
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GcRef, &V)> {
        self.entries.iter().filter_map(|e| match e {
            Slot::Occupied(k, v) => Some((k, v)),
            _ => None,
        })
    }

    /// Bulk-copies every entry from `other` into `self`, used for `INHERIT`
    /// (a subclass starts out with all of its superclass's methods).
    pub fn add_all(&mut self, other: &Table<V>)
    where
        V: Clone,
    {
        for (k, v) in other.iter() {
            self.set(*k, v.clone());
        }
    }
}

/// Content-addressed deduplication table for strings: every distinct string
/// value that appears in the program gets at most one `ObjString` allocation.
/// Probes by hash *and* byte content, unlike `Table<V>`, since at the point a
/// string is being interned there is no `GcRef` for it yet.
#[derive(Default)]
pub struct Interner {
    entries: Vec<Option<GcRef>>,
    count: usize,
}

pub fn hash_str(s: &str) -> u32 {
    // FNV-1a.
    let mut hash: u32 = 2166136261;
    for byte in s.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing interned `ObjString` for `s`, if any.
    pub fn find(&self, s: &str, hash: u32) -> Option<GcRef> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            match self.entries[index] {
                None => return None,
                Some(r) => {
                    let existing = r.as_obj().data.as_string().unwrap();
                    if existing.hash == hash && existing.chars == s {
                        return Some(r);
                    }
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() {
            8
        } else {
            self.entries.len() * 2
        };
        let mut new_entries: Vec<Option<GcRef>> = vec![None; new_capacity];
        for slot in self.entries.drain(..) {
            if let Some(r) = slot {
                let hash = r.as_obj().data.as_string().unwrap().hash;
                let mut index = (hash as usize) & (new_capacity - 1);
                while new_entries[index].is_some() {
                    index = (index + 1) & (new_capacity - 1);
                }
                new_entries[index] = Some(r);
            }
        }
        self.entries = new_entries;
    }

    /// Registers a freshly allocated `ObjString` so future lookups find it.
    /// Callers must have already checked `find` returned `None`.
    pub fn insert(&mut self, obj: GcRef) {
        if self.entries.is_empty() || (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            self.grow();
        }
        let hash = obj.as_obj().data.as_string().unwrap().hash;
        let capacity = self.entries.len();
        let mut index = (hash as usize) & (capacity - 1);
        while self.entries[index].is_some() {
            index = (index + 1) & (capacity - 1);
        }
        self.entries[index] = Some(obj);
        self.count += 1;
    }

    /// Drops interned strings the collector didn't mark, run after tracing but
    /// before sweep so the sweep itself doesn't need to know about interning.
    pub fn remove_unmarked(&mut self) {
        for slot in self.entries.iter_mut() {
            if let Some(r) = slot {
                if !r.as_obj().is_marked.get() {
                    *slot = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::Heap;

    #[test]
    fn set_get_delete_roundtrip() {
        let heap = Heap::new();
        let a = heap.intern_str("alpha");
        let b = heap.intern_str("beta");
        let mut table: Table<i32> = Table::new();
        assert_eq!(table.set(a, 1), None);
        assert_eq!(table.set(b, 2), None);
        assert_eq!(table.get(&a), Some(&1));
        assert!(table.delete(&a));
        assert_eq!(table.get(&a), None);
        assert_eq!(table.get(&b), Some(&2));
    }

    #[test]
    fn grows_past_load_factor() {
        let heap = Heap::new();
        let mut table: Table<i32> = Table::new();
        let mut keys = Vec::new();
        for i in 0..40 {
            let key = heap.intern_str(&format!("k{i}"));
            table.set(key, i);
            keys.push(key);
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(key), Some(&(i as i32)));
        }
    }

    #[test]
    fn interner_deduplicates_by_content() {
        let heap = Heap::new();
        let a = heap.intern_str("same");
        let b = heap.intern_str("same");
        assert!(a.ptr_eq(&b));
    }
}
