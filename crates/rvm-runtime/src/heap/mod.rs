//! A [Heap] is a revisioned store of [Value] trees, laid out in a contiguous [Region] of bytes.
//!
//! Every [Heap::set] appends the records of a new value tree, plus a commit record, after the
//! bytes already in use and then rewrites the header. Committed bytes are never changed again,
//! so earlier revisions stay readable forever. Records are hash-consed, meaning that a record
//! equal to one already in the region is referred to by index instead of being written again.
//! Unchanged subtrees are thereby shared between revisions.
//!
//! Values loaded with [Heap::get] keep their children as [Lazy] values, which load one record
//! when resolved.

use std::cell::RefCell;
use std::fmt::Debug;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;

use log::{debug, trace, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::function::{Function, Functions};
use crate::value::{Body, Closure, Flags, Value, ValueKind};

use self::layout::{Header, Raw, Record, HEADER_SIZE};
use self::mapped::MappedRegion;
use self::region::{BufferRegion, FileRegion, Region};

pub mod layout;
pub mod mapped;
pub mod region;

/// Revision number. Revisions are numbered from one.
pub type Revision = u64;

/// Asks [Heap::get] and [Heap::lazy] for the latest committed revision.
pub const LATEST: Revision = 0;

fn no_such_revision(revision: Revision) -> Error {
    Error::owned(ErrorKind::User, format!("no such revision: {revision}"))
}

/// Bookkeeping shared by a heap and the lazy values it hands out.
pub(crate) struct Store<'a> {
    /// Backing store, or `None` once the heap is freed.
    region: Option<Box<dyn Region + 'a>>,
    header: Header,

    /// Root index of every revision, oldest first.
    roots: Vec<u64>,

    /// Record hash to record index.
    interned: im::HashMap<u64, u64>,
    functions: Functions,
}

impl<'a> Store<'a> {
    fn region(&self) -> Result<&(dyn Region + 'a)> {
        self.region
            .as_deref()
            .ok_or(Error::borrowed(ErrorKind::User, "heap is closed"))
    }

    fn region_mut(&mut self) -> Result<&mut (dyn Region + 'a)> {
        match self.region.as_mut() {
            Some(region) => Ok(region.as_mut()),
            None => Err(Error::borrowed(ErrorKind::User, "heap is closed")),
        }
    }

    /// Committed bytes, header included.
    fn committed(&self) -> Result<&[u8]> {
        Ok(&self.region()?.bytes()[..self.header.length as usize])
    }

    fn root(&self, revision: Revision) -> Result<u64> {
        let revision = if revision == LATEST {
            self.header.revision
        } else {
            revision
        };
        match revision.checked_sub(1) {
            Some(nth) => self
                .roots
                .get(nth as usize)
                .copied()
                .ok_or_else(|| no_such_revision(revision)),
            None => Err(no_such_revision(revision)),
        }
    }

    /// Walks the commit chain backwards, collecting the root of every revision.
    fn read_roots(&self) -> Result<Vec<u64>> {
        let bytes = self.committed()?;
        if self.header.revision > self.header.length / 32 {
            return Err(layout::corrupt("revision count", 24));
        }
        let mut roots = vec![0; self.header.revision as usize];
        let mut commit = self.header.latest;

        for expected in (1..=self.header.revision).rev() {
            match Raw::read(bytes, commit)?.decode()? {
                Record::Commit {
                    revision,
                    root,
                    previous,
                } if revision == expected && previous < commit => {
                    roots[expected as usize - 1] = root;
                    commit = previous;
                }
                _ => return Err(layout::corrupt("commit chain", commit)),
            }
        }
        Ok(roots)
    }

    /// Scans every committed record, rebuilding the hash-consing table.
    fn read_interned(&self) -> Result<im::HashMap<u64, u64>> {
        let bytes = self.committed()?;
        let mut interned = im::HashMap::new();
        let mut index = HEADER_SIZE as u64;

        while index < self.header.length {
            let raw = Raw::read(bytes, index)?;
            if raw.kind != ValueKind::Undefined {
                interned.insert(record_hash(raw.kind, raw.payload), index);
            }
            index += raw.size() as u64;
        }
        Ok(interned)
    }
}

fn record_hash(kind: ValueKind, payload: &[u8]) -> u64 {
    fxhash::hash64(&(kind as u8, payload))
}

/// A value yet to be loaded from the heap that owns it.
#[derive(Clone)]
pub struct Lazy<'a> {
    store: Rc<RefCell<Store<'a>>>,
    index: u64,
}

impl<'a> Lazy<'a> {
    /// Index of the value within its heap.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Loads the value. Children of the loaded value stay lazy.
    pub fn resolve(&self) -> Result<Value<'a>> {
        load(&self.store, self.index)
    }

    /// Whether the value lives in the heap whose store is at `identity`.
    fn belongs_to(&self, identity: *const ()) -> bool {
        Rc::as_ptr(&self.store) as *const () == identity
    }
}

impl PartialEq for Lazy<'_> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.store, &other.store) && self.index == other.index
    }
}

impl Debug for Lazy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lazy({:#x})", self.index)
    }
}

fn lazy<'a>(store: &Rc<RefCell<Store<'a>>>, index: u64) -> Value<'a> {
    Value::indexed(
        index,
        Body::Lazy(Lazy {
            store: store.clone(),
            index,
        }),
    )
}

fn load<'a>(store: &Rc<RefCell<Store<'a>>>, index: u64) -> Result<Value<'a>> {
    let shared = store.borrow();
    let raw = Raw::read(shared.committed()?, index)?;
    trace!("loading {:?} record at {:#x}", raw.kind, index);

    let child = |index: u64| Rc::new(lazy(store, index));
    let body = match raw.decode()? {
        Record::Bytes(bytes) => Body::Bytes(Rc::from(bytes)),
        Record::Number(integer) => Body::Number(integer),
        Record::Symbol(name) => Body::Symbol(Rc::from(name)),
        Record::Closure { value, name } => {
            let function = shared.functions.find(name).ok_or_else(|| {
                Error::owned(ErrorKind::User, format!("unknown function: {name}"))
            })?;
            Body::Closure(Closure {
                function,
                value: (value != 0).then(|| child(value)),
            })
        }
        Record::Array(indices) => Body::Array(
            indices
                .into_iter()
                .map(|index| lazy(store, index))
                .collect(),
        ),
        Record::Link { head, tail } => Body::Link(child(head), child(tail)),
        Record::Commit { .. } => return Err(layout::corrupt("commit record as value", index)),
    };
    Ok(Value::indexed(index, body))
}

/// Records of a commit in the making, written to a scratch buffer first so that a failing commit
/// leaves the region untouched.
struct Commit<'s, 'a> {
    store: &'s Store<'a>,
    identity: *const (),

    /// Index of the first scratch byte.
    base: u64,
    scratch: Vec<u8>,
    interned: im::HashMap<u64, u64>,
    functions: Vec<&'static Function>,
}

/// Pending work of [Commit::adopt].
enum Step<'v> {
    Visit(Value<'v>),

    /// Interns a value once the indices of its children are known.
    Intern(Value<'v>, usize),
}

impl Commit<'_, '_> {
    /// Appends whatever records of `value` are not in the heap yet, children first, and returns
    /// the index of its root. The tree is walked with an explicit work list, so deep values adopt
    /// in constant stack space.
    fn adopt<'v>(&mut self, value: &Value<'v>) -> Result<u64> {
        let mut pending = vec![Step::Visit(value.clone())];
        let mut done: Vec<u64> = Vec::new();

        while let Some(step) = pending.pop() {
            match step {
                Step::Visit(value) => {
                    if let Body::Lazy(lazy) = value.body() {
                        if !lazy.belongs_to(self.identity) {
                            pending.push(Step::Visit(lazy.resolve()?));
                        } else if lazy.index >= self.base {
                            return Err(layout::corrupt("lazy value past end", lazy.index));
                        } else {
                            done.push(lazy.index);
                        }
                        continue;
                    }

                    let children = value.children().into_iter().cloned().collect::<Vec<_>>();
                    pending.push(Step::Intern(value, children.len()));
                    pending.extend(children.into_iter().rev().map(Step::Visit));
                }
                Step::Intern(value, count) => {
                    let children = done.split_off(done.len() - count);
                    let index = self.intern_value(&value, children)?;
                    done.push(index);
                }
            }
        }

        done.pop()
            .ok_or(Error::borrowed(ErrorKind::User, "nothing to commit"))
    }

    /// Interns the record of `value`, whose children are already at `children`.
    fn intern_value(&mut self, value: &Value<'_>, children: Vec<u64>) -> Result<u64> {
        match value.body() {
            Body::Bytes(bytes) => self.intern(Record::Bytes(bytes)),
            Body::Number(integer) => self.intern(Record::Number(*integer)),
            Body::Symbol(name) => self.intern(Record::Symbol(name)),
            Body::Closure(closure) => {
                self.functions.push(closure.function);
                self.intern(Record::Closure {
                    value: children.first().copied().unwrap_or(0),
                    name: closure.function.name,
                })
            }
            Body::Array(_) => self.intern(Record::Array(children)),
            Body::Link(_, _) => match children[..] {
                [head, tail] => self.intern(Record::Link { head, tail }),
                _ => Err(Error::borrowed(ErrorKind::User, "link without two children")),
            },
            Body::Lazy(lazy) => Err(layout::corrupt("unresolved lazy value", lazy.index)),
        }
    }

    fn intern(&mut self, record: Record<'_>) -> Result<u64> {
        let kind = record.kind();
        let payload = record.payload();
        let hash = record_hash(kind, &payload);

        if let Some(&index) = self.interned.get(&hash) {
            if self.holds(index, kind, &payload)? {
                return Ok(index);
            }
        }

        let index = self.append(kind, &payload);
        self.interned.insert(hash, index);
        Ok(index)
    }

    fn append(&mut self, kind: ValueKind, payload: &[u8]) -> u64 {
        let index = self.base + self.scratch.len() as u64;
        self.scratch
            .extend_from_slice(&Flags::pack(kind, index).to_le_bytes());
        self.scratch.extend_from_slice(payload);
        index
    }

    /// Whether the record at `index` has the given kind and payload. Payloads start with their
    /// own lengths, so comparing a prefix of the record is enough.
    fn holds(&self, index: u64, kind: ValueKind, payload: &[u8]) -> Result<bool> {
        let (bytes, start) = if index >= self.base {
            (&self.scratch[..], (index - self.base) as usize)
        } else {
            (self.store.committed()?, index as usize)
        };
        let flags = Flags::pack(kind, index).to_le_bytes();
        let body = start + flags.len();
        Ok(bytes.get(start..body) == Some(&flags[..])
            && bytes.get(body..body + payload.len()) == Some(payload))
    }
}

/// A revisioned store of values.
///
/// ## Initialization
///
/// Heaps are created with exactly one of [Heap::with_buffer], [Heap::with_file], [Heap::open] or
/// [Heap::temporary], which differ only in what backs the heap and who owns it.
///
/// ## Destruction
///
/// Once no longer required, a heap should be given to [Heap::free], which syncs it and releases
/// whatever the heap owns. Dropping a heap does the same but can only log failures. Lazy values
/// that outlive their heap fail to resolve.
pub struct Heap<'a> {
    store: Rc<RefCell<Store<'a>>>,
}

impl<'a> Heap<'a> {
    /// Uses a caller-owned buffer as heap. The buffer is never grown, so commits that do not fit
    /// fail with [ErrorKind::NoMemory].
    pub fn with_buffer(buffer: &'a mut [u8]) -> Result<Heap<'a>> {
        Self::mount(Box::new(BufferRegion::new(buffer)))
    }

    /// Uses a caller-owned open file as heap. The file must be readable and writable, and is
    /// never closed by the heap.
    pub fn with_file(file: &'a File) -> Result<Heap<'a>> {
        Self::mount(Box::new(FileRegion::new(file)?))
    }

    /// Mounts any region as heap, initializing it if it has never been used as one.
    pub fn mount(mut region: Box<dyn Region + 'a>) -> Result<Heap<'a>> {
        let header = match Header::read(region.bytes())? {
            Some(header) => header,
            None => {
                let header = Header::empty();
                region.reserve(HEADER_SIZE)?;
                region.write(0, &header.encode())?;
                header
            }
        };

        let mut store = Store {
            region: Some(region),
            header,
            roots: Vec::new(),
            interned: im::HashMap::new(),
            functions: Functions::new(),
        };
        store.roots = store.read_roots()?;
        store.interned = store.read_interned()?;

        debug!(
            "mounted {} heap at revision {} ({} bytes used)",
            store.region()?.name(),
            header.revision,
            header.length
        );

        Ok(Heap {
            store: Rc::new(RefCell::new(store)),
        })
    }
}

impl Heap<'static> {
    /// Mounts the file at `path` as heap, creating it if absent. At least `capacity` bytes of
    /// address space are reserved for the heap, rounded up to whole pages. The capacity may exceed
    /// the physical memory of the machine, as only touched pages are ever stored.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Heap<'static>> {
        Self::mount(Box::new(MappedRegion::open(path.as_ref(), capacity)?))
    }

    /// Mounts a heap in anonymous memory. Its contents are lost when it is freed.
    pub fn temporary(capacity: usize) -> Result<Heap<'static>> {
        Self::mount(Box::new(MappedRegion::anonymous(capacity)?))
    }
}

impl<'a> Heap<'a> {
    /// Latest committed revision, or zero if none.
    pub fn revision(&self) -> Revision {
        self.store.borrow().header.revision
    }

    /// Amount of used bytes.
    pub fn length(&self) -> u64 {
        self.store.borrow().header.length
    }

    /// Maximum amount of bytes, or `None` if the heap grows on demand.
    pub fn capacity(&self) -> Option<usize> {
        self.store.borrow().region().ok()?.capacity()
    }

    /// Makes `function` known to the heap, so that stored closures calling it can be loaded.
    pub fn register(&mut self, function: &'static Function) {
        self.store.borrow_mut().functions.register(function);
    }

    /// Gets the root value of `revision`, or of the latest revision if [LATEST]. Children of the
    /// root are [Lazy].
    pub fn get(&self, revision: Revision) -> Result<Value<'a>> {
        let index = self.store.borrow().root(revision)?;
        load(&self.store, index)
    }

    /// Gets the root value of `revision` without loading it.
    pub fn lazy(&self, revision: Revision) -> Result<Value<'a>> {
        let index = self.store.borrow().root(revision)?;
        Ok(lazy(&self.store, index))
    }

    /// Commits `value` as a new revision, and returns its number.
    ///
    /// Lazy parts of `value` that belong to this heap are referred to without being loaded, while
    /// lazy parts belonging to other heaps are loaded and copied. Nothing is changed if the commit
    /// fails.
    pub fn set(&mut self, value: &Value<'_>) -> Result<Revision> {
        let identity = Rc::as_ptr(&self.store) as *const ();
        let (scratch, root, interned, functions) = {
            let store = self.store.borrow();
            let mut commit = Commit {
                store: &store,
                identity,
                base: store.header.length,
                scratch: Vec::new(),
                interned: store.interned.clone(),
                functions: Vec::new(),
            };
            let root = commit.adopt(value)?;
            (commit.scratch, root, commit.interned, commit.functions)
        };

        let mut store = self.store.borrow_mut();
        let base = store.header.length;
        let revision = store.header.revision + 1;

        let mut scratch = scratch;
        let commit = base + scratch.len() as u64;
        scratch.extend_from_slice(&Flags::pack(ValueKind::Undefined, commit).to_le_bytes());
        scratch.extend_from_slice(
            &Record::Commit {
                revision,
                root,
                previous: store.header.latest,
            }
            .payload(),
        );

        let header = Header {
            length: base + scratch.len() as u64,
            revision,
            latest: commit,
        };

        let region = store.region_mut()?;
        region.reserve(header.length as usize)?;
        region.write(base as usize, &scratch)?;
        region.write(0, &header.encode())?;

        store.header = header;
        store.roots.push(root);
        store.interned = interned;
        for function in functions {
            store.functions.register(function);
        }

        debug!(
            "committed revision {} with root {:#x} ({} bytes written)",
            revision,
            root,
            scratch.len()
        );
        Ok(revision)
    }

    /// Blocks until every prior commit is durable.
    pub fn sync(&mut self) -> Result<()> {
        let mut store = self.store.borrow_mut();
        let region = store.region_mut()?;
        region.sync()?;
        debug!("synced {} heap", region.name());
        Ok(())
    }

    /// Syncs the heap and releases whatever it owns.
    pub fn free(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        let region = self.store.borrow_mut().region.take();
        match region {
            Some(region) => {
                let name = region.name();
                region.close()?;
                debug!("freed {} heap", name);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for Heap<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!("failed to free heap: {error}");
        }
    }
}

impl Debug for Heap<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.borrow();
        f.debug_struct("Heap")
            .field("revision", &store.header.revision)
            .field("length", &store.header.length)
            .field("open", &store.region.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_heap_has_no_revisions() {
        let mut buffer = vec![0; 256];
        let heap = Heap::with_buffer(&mut buffer).unwrap();

        assert_eq!(heap.revision(), 0);
        assert_eq!(heap.length(), HEADER_SIZE as u64);
        let error = heap.get(LATEST).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::User);
        assert_eq!(error.message(), Some("no such revision: 0"));
    }

    #[test]
    fn revision_past_latest_is_rejected() {
        let mut buffer = vec![0; 256];
        let mut heap = Heap::with_buffer(&mut buffer).unwrap();
        heap.set(&Value::number(1)).unwrap();

        assert!(heap.get(1).is_ok());
        assert_eq!(
            heap.get(2).unwrap_err().message(),
            Some("no such revision: 2")
        );
    }

    #[test]
    fn children_are_loaded_lazily() {
        let mut buffer = vec![0; 512];
        let mut heap = Heap::with_buffer(&mut buffer).unwrap();
        heap.set(&Value::link(Value::number(1), Value::bytes("tail")))
            .unwrap();

        let root = heap.get(LATEST).unwrap();
        assert!(root.is_indexed());
        let Body::Link(head, tail) = root.body() else {
            panic!("expected link, got {root}");
        };
        assert_eq!(head.kind(), ValueKind::Lazy);
        assert_eq!(tail.kind(), ValueKind::Lazy);
        assert_eq!(head.resolve().unwrap(), Value::number(1));
        assert_eq!(tail.resolve().unwrap(), Value::bytes("tail"));
    }

    #[test]
    fn equal_records_are_written_once() {
        let mut buffer = vec![0; 512];
        let mut heap = Heap::with_buffer(&mut buffer).unwrap();

        let shared = Value::bytes("shared");
        heap.set(&Value::link(shared.clone(), shared.clone()))
            .unwrap();

        let root = heap.get(LATEST).unwrap();
        let Body::Link(head, tail) = root.body() else {
            panic!("expected link");
        };
        assert_eq!(head.index(), tail.index());
    }

    #[test]
    fn lazy_values_fail_after_free() {
        let mut buffer = vec![0; 256];
        let mut heap = Heap::with_buffer(&mut buffer).unwrap();
        heap.set(&Value::number(5)).unwrap();

        let root = heap.lazy(LATEST).unwrap();
        heap.free().unwrap();

        let error = root.resolve().unwrap_err();
        assert_eq!(error.message(), Some("heap is closed"));
    }

    #[test]
    fn sync_leaves_buffer_untouched() {
        let mut buffer = vec![0; 256];
        let mut heap = Heap::with_buffer(&mut buffer).unwrap();
        heap.set(&Value::bytes("synced")).unwrap();
        heap.free().unwrap();
        let snapshot = buffer.clone();

        let mut heap = Heap::with_buffer(&mut buffer).unwrap();
        heap.sync().unwrap();
        assert_eq!(heap.revision(), 1);
        heap.free().unwrap();
        assert_eq!(buffer, snapshot);
    }
}
