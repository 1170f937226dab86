//! Symbol tables: bidirectional string/integer mappings for arc labels.
//!
//! Tables are cheap-clone handles over shared storage. A handle that is
//! about to mutate while sharing its storage first materializes a private
//! copy, so clones held elsewhere never observe the change. Compatibility
//! between tables is decided by a labeled checksum over their contents.

use std::cell::Cell;
use std::hash::Hasher;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHasher};
use thiserror::Error;
use tracing::warn;

/// Key returned for symbols that are not present.
pub const NO_SYMBOL: i64 = -1;

const SYMBOL_TABLE_MAGIC: i32 = 2125658996;

#[derive(Debug, Error)]
pub enum SymbolTableError {
    #[error("symbol table read error: {0}")]
    Io(#[from] io::Error),
    #[error("bad symbol table magic number {0:#x}")]
    BadMagic(i32),
    #[error("truncated symbol table")]
    Truncated,
    #[error("line {0}: expected symbol and key separated by whitespace")]
    BadLine(usize),
    #[error("line {0}: negative key {1} without allow_negative")]
    NegativeKey(usize, i64),
}

#[derive(Clone, Copy, Debug)]
pub struct SymbolTableTextOptions {
    pub allow_negative: bool,
}

impl Default for SymbolTableTextOptions {
    fn default() -> Self {
        SymbolTableTextOptions {
            allow_negative: false,
        }
    }
}

#[derive(Clone, Debug)]
struct SymbolTableRepr {
    name: String,
    available_key: i64,
    // Entries in insertion order; the maps point back into this vector.
    entries: Vec<(String, i64)>,
    sym_map: FxHashMap<String, i64>,
    key_map: FxHashMap<i64, usize>,
    checksum: Cell<Option<u64>>,
}

impl SymbolTableRepr {
    fn new(name: &str) -> Self {
        SymbolTableRepr {
            name: name.to_string(),
            available_key: 0,
            entries: Vec::new(),
            sym_map: FxHashMap::default(),
            key_map: FxHashMap::default(),
            checksum: Cell::new(None),
        }
    }

    fn add_symbol(&mut self, symbol: &str, key: i64) -> i64 {
        if let Some(&existing) = self.sym_map.get(symbol) {
            return existing;
        }
        if self.key_map.contains_key(&key) {
            return NO_SYMBOL;
        }
        self.sym_map.insert(symbol.to_string(), key);
        self.key_map.insert(key, self.entries.len());
        self.entries.push((symbol.to_string(), key));
        if key >= self.available_key {
            self.available_key = key + 1;
        }
        self.checksum.set(None);
        key
    }
}

/// Symbol/key mapping shared by reference across machines.
#[derive(Clone, Debug)]
pub struct SymbolTable {
    repr: Rc<SymbolTableRepr>,
}

impl SymbolTable {
    pub fn new(name: &str) -> Self {
        SymbolTable {
            repr: Rc::new(SymbolTableRepr::new(name)),
        }
    }

    // Any mutation goes through here: shared storage is copied first.
    fn mutate_check(&mut self) -> &mut SymbolTableRepr {
        Rc::make_mut(&mut self.repr)
    }

    /// Adds `symbol` with the given key. Returns the existing key if the
    /// symbol is already present, or `NO_SYMBOL` if the key is taken by a
    /// different symbol.
    pub fn add_symbol_with_key(&mut self, symbol: &str, key: i64) -> i64 {
        self.mutate_check().add_symbol(symbol, key)
    }

    /// Adds `symbol` under the next available key.
    pub fn add_symbol(&mut self, symbol: &str) -> i64 {
        if let Some(&existing) = self.repr.sym_map.get(symbol) {
            return existing;
        }
        let key = self.repr.available_key;
        self.mutate_check().add_symbol(symbol, key)
    }

    /// Merges another table into this one. Added symbols receive fresh keys
    /// starting at the current available key, preserving uniqueness.
    pub fn add_table(&mut self, other: &SymbolTable) {
        for i in 0..other.repr.entries.len() {
            let symbol = other.repr.entries[i].0.clone();
            self.add_symbol(&symbol);
        }
    }

    /// The key for `symbol`, or `NO_SYMBOL`.
    pub fn find_key(&self, symbol: &str) -> i64 {
        self.repr.sym_map.get(symbol).copied().unwrap_or(NO_SYMBOL)
    }

    /// The symbol for `key`, if present.
    pub fn find_symbol(&self, key: i64) -> Option<&str> {
        self.repr
            .key_map
            .get(&key)
            .map(|&idx| self.repr.entries[idx].0.as_str())
    }

    pub fn name(&self) -> &str {
        &self.repr.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.mutate_check().name = name.to_string();
    }

    pub fn available_key(&self) -> i64 {
        self.repr.available_key
    }

    pub fn num_symbols(&self) -> usize {
        self.repr.entries.len()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.repr.entries.iter().map(|(s, k)| (s.as_str(), *k))
    }

    /// Content checksum over symbols and their keys. Two tables map labels
    /// identically iff their labeled checksums agree.
    pub fn labeled_checksum(&self) -> u64 {
        if let Some(sum) = self.repr.checksum.get() {
            return sum;
        }
        let mut hasher = FxHasher::default();
        for (symbol, key) in self.iter() {
            hasher.write(symbol.as_bytes());
            hasher.write_u8(0);
            hasher.write_i64(key);
        }
        let sum = hasher.finish();
        self.repr.checksum.set(Some(sum));
        sum
    }

    /// Writes the binary format: magic, nul-terminated name, entry count,
    /// then one nul-terminated symbol and little-endian `i64` key per entry.
    pub fn write<Wr: Write>(&self, dest: &mut Wr) -> io::Result<()> {
        dest.write_all(&SYMBOL_TABLE_MAGIC.to_le_bytes())?;
        dest.write_all(self.repr.name.as_bytes())?;
        dest.write_all(&[0])?;
        dest.write_all(&(self.repr.entries.len() as i64).to_le_bytes())?;
        for (symbol, key) in self.iter() {
            dest.write_all(symbol.as_bytes())?;
            dest.write_all(&[0])?;
            dest.write_all(&key.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reads the binary format written by [`SymbolTable::write`].
    pub fn read<R: Read>(src: R) -> Result<SymbolTable, SymbolTableError> {
        let mut bytes = Vec::new();
        let mut src = src;
        src.read_to_end(&mut bytes)?;
        let mut pos = 0usize;

        let magic = i32::from_le_bytes(take(&bytes, &mut pos, 4)?.try_into().unwrap());
        if magic != SYMBOL_TABLE_MAGIC {
            return Err(SymbolTableError::BadMagic(magic));
        }
        let name = take_str(&bytes, &mut pos)?;
        let count = i64::from_le_bytes(take(&bytes, &mut pos, 8)?.try_into().unwrap());

        let mut table = SymbolTable::new(&name);
        for _ in 0..count {
            let symbol = take_str(&bytes, &mut pos)?;
            let key = i64::from_le_bytes(take(&bytes, &mut pos, 8)?.try_into().unwrap());
            table.add_symbol_with_key(&symbol, key);
        }
        Ok(table)
    }

    /// Writes one `symbol<TAB>key` line per entry.
    pub fn write_text<Wr: Write>(&self, dest: &mut Wr) -> io::Result<()> {
        for (symbol, key) in self.iter() {
            writeln!(dest, "{}\t{}", symbol, key)?;
        }
        Ok(())
    }

    /// Reads the text format, one `symbol<TAB>key` per line.
    pub fn read_text<R: Read>(
        src: R,
        name: &str,
        opts: &SymbolTableTextOptions,
    ) -> Result<SymbolTable, SymbolTableError> {
        let mut table = SymbolTable::new(name);
        let reader = BufReader::new(src);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let symbol = fields
                .next()
                .ok_or(SymbolTableError::BadLine(lineno + 1))?;
            let key = fields
                .next()
                .and_then(|k| k.parse::<i64>().ok())
                .ok_or(SymbolTableError::BadLine(lineno + 1))?;
            if fields.next().is_some() {
                return Err(SymbolTableError::BadLine(lineno + 1));
            }
            if key < 0 && !opts.allow_negative {
                return Err(SymbolTableError::NegativeKey(lineno + 1, key));
            }
            table.add_symbol_with_key(symbol, key);
        }
        Ok(table)
    }
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], SymbolTableError> {
    if *pos + n > bytes.len() {
        return Err(SymbolTableError::Truncated);
    }
    let slice = &bytes[*pos..*pos + n];
    *pos += n;
    Ok(slice)
}

fn take_str(bytes: &[u8], pos: &mut usize) -> Result<String, SymbolTableError> {
    let end = bytes[*pos..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(SymbolTableError::Truncated)?;
    let s = String::from_utf8_lossy(&bytes[*pos..*pos + end]).into_owned();
    *pos += end + 1;
    Ok(s)
}

/// True when the two tables are interchangeable for label interpretation.
/// Absent tables are compatible with anything. The check can be disabled
/// through the options of the calling operation.
pub fn compat_symbols(
    syms1: Option<&SymbolTable>,
    syms2: Option<&SymbolTable>,
    check: bool,
) -> bool {
    if !check {
        return true;
    }
    match (syms1, syms2) {
        (Some(a), Some(b)) => {
            if a.labeled_checksum() != b.labeled_checksum() {
                warn!(
                    "symbol table checksums do not match; table sizes are {} and {}",
                    a.num_symbols(),
                    b.num_symbols()
                );
                false
            } else {
                true
            }
        }
        _ => true,
    }
}

/// Builds a new table holding only the symbols named in `pairs`, remapped
/// from the old key to the new one.
pub fn relabel_symbol_table(table: &SymbolTable, pairs: &[(i64, i64)]) -> SymbolTable {
    let mut new_table = SymbolTable::new(&if table.name().is_empty() {
        String::new()
    } else {
        format!("relabeled_{}", table.name())
    });
    for &(old, new) in pairs {
        if let Some(symbol) = table.find_symbol(old) {
            new_table.add_symbol_with_key(symbol, new);
        }
    }
    new_table
}

#[test]
fn symbol_table_test() {
    let mut t = SymbolTable::new("test");
    assert_eq!(t.add_symbol("<eps>"), 0);
    assert_eq!(t.add_symbol("a"), 1);
    assert_eq!(t.add_symbol("b"), 2);
    assert_eq!(t.add_symbol("a"), 1);
    assert_eq!(t.find_key("b"), 2);
    assert_eq!(t.find_key("zzz"), NO_SYMBOL);
    assert_eq!(t.find_symbol(1), Some("a"));
    assert_eq!(t.find_symbol(99), None);
    assert_eq!(t.num_symbols(), 3);
    assert_eq!(t.available_key(), 3);
}

#[test]
fn copy_on_write_test() {
    let mut t = SymbolTable::new("base");
    t.add_symbol("a");
    let shared = t.clone();
    t.add_symbol("b");
    assert_eq!(t.num_symbols(), 2);
    assert_eq!(shared.num_symbols(), 1);
    assert_eq!(shared.find_key("b"), NO_SYMBOL);
}

#[test]
fn add_table_offsets_keys_test() {
    let mut t = SymbolTable::new("t");
    t.add_symbol("a");
    t.add_symbol("b");
    let mut u = SymbolTable::new("u");
    u.add_symbol("x");
    u.add_symbol("b");
    t.add_table(&u);
    assert_eq!(t.find_key("x"), 2);
    assert_eq!(t.find_key("b"), 1);
    assert_eq!(t.available_key(), 3);
}

#[test]
fn checksum_compat_test() {
    let mut a = SymbolTable::new("a");
    a.add_symbol("x");
    let mut b = SymbolTable::new("b");
    b.add_symbol("x");
    assert!(compat_symbols(Some(&a), Some(&b), true));
    b.add_symbol("y");
    assert!(!compat_symbols(Some(&a), Some(&b), true));
    assert!(compat_symbols(Some(&a), Some(&b), false));
    assert!(compat_symbols(Some(&a), None, true));
}

#[test]
fn text_roundtrip_test() {
    let mut t = SymbolTable::new("t");
    t.add_symbol("<eps>");
    t.add_symbol("hello");
    let mut buf = Vec::new();
    t.write_text(&mut buf).unwrap();
    let u = SymbolTable::read_text(
        buf.as_slice(),
        "t",
        &SymbolTableTextOptions::default(),
    )
    .unwrap();
    assert_eq!(t.labeled_checksum(), u.labeled_checksum());

    let bad = SymbolTable::read_text(
        "sym\t-4".as_bytes(),
        "neg",
        &SymbolTableTextOptions::default(),
    );
    assert!(bad.is_err());
    let ok = SymbolTable::read_text(
        "sym\t-4".as_bytes(),
        "neg",
        &SymbolTableTextOptions {
            allow_negative: true,
        },
    );
    assert!(ok.is_ok());
}

#[test]
fn binary_roundtrip_test() {
    let mut t = SymbolTable::new("bin");
    t.add_symbol("<eps>");
    t.add_symbol("alpha");
    t.add_symbol("beta");
    let mut buf = Vec::new();
    t.write(&mut buf).unwrap();
    let u = SymbolTable::read(buf.as_slice()).unwrap();
    assert_eq!(u.name(), "bin");
    assert_eq!(u.num_symbols(), 3);
    assert_eq!(u.find_key("beta"), 2);
    assert_eq!(t.labeled_checksum(), u.labeled_checksum());

    let junk = [0u8, 1, 2, 3, 4, 5, 6, 7];
    assert!(SymbolTable::read(&junk[..]).is_err());
}

#[test]
fn relabel_test() {
    let mut t = SymbolTable::new("t");
    t.add_symbol("a");
    t.add_symbol("b");
    let r = relabel_symbol_table(&t, &[(0, 5), (1, 6)]);
    assert_eq!(r.find_key("a"), 5);
    assert_eq!(r.find_key("b"), 6);
    assert_eq!(r.num_symbols(), 2);
}
