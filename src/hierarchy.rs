// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use rustc_hash::FxHashMap;
use std::fmt::{Display, Formatter};

/// Dense index of a signal in the flat signal array.
pub type SignalIdx = u32;
/// Index of a scope node. Zero is the synthetic root.
pub type ScopeIdx = u32;

const SCOPE_SEPARATOR: char = '.';

/// Meaning of one timestamp unit: `magnitude` times `unit`, e.g. `10ns`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub struct Timescale {
    pub magnitude: u32,
    pub unit: TimescaleUnit,
}

impl Timescale {
    pub fn new(magnitude: u32, unit: TimescaleUnit) -> Self {
        Timescale { magnitude, unit }
    }
}

impl Default for Timescale {
    fn default() -> Self {
        Timescale::new(1, TimescaleUnit::Unknown)
    }
}

impl Display for Timescale {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub enum TimescaleUnit {
    S,
    Ms,
    Us,
    Ns,
    Ps,
    Fs,
    Unknown,
}

/// Every known unit with its `$timescale` suffix and its power-of-ten
/// exponent relative to one second.
const TIME_UNITS: [(TimescaleUnit, &str, i8); 6] = [
    (TimescaleUnit::S, "s", 0),
    (TimescaleUnit::Ms, "ms", -3),
    (TimescaleUnit::Us, "us", -6),
    (TimescaleUnit::Ns, "ns", -9),
    (TimescaleUnit::Ps, "ps", -12),
    (TimescaleUnit::Fs, "fs", -15),
];

impl TimescaleUnit {
    pub fn from_suffix(name: &[u8]) -> Self {
        TIME_UNITS
            .iter()
            .find(|(_, suffix, _)| suffix.as_bytes() == name)
            .map(|(unit, _, _)| *unit)
            .unwrap_or(TimescaleUnit::Unknown)
    }

    pub fn to_exponent(&self) -> Option<i8> {
        TIME_UNITS
            .iter()
            .find(|(unit, _, _)| unit == self)
            .map(|(_, _, exponent)| *exponent)
    }

    pub fn suffix(&self) -> &'static str {
        TIME_UNITS
            .iter()
            .find(|(unit, _, _)| unit == self)
            .map(|(_, suffix, _)| *suffix)
            .unwrap_or("?")
    }
}

impl Display for TimescaleUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub enum VarType {
    Wire,
    Reg,
    Integer,
    Real,
    RealTime,
    Parameter,
    Event,
    Supply0,
    Supply1,
    Time,
    Tri,
    TriAnd,
    TriOr,
    TriReg,
    Tri0,
    Tri1,
    WAnd,
    WOr,
    Logic,
    Bit,
    String,
    /// Unrecognized var types are recorded, not rejected.
    Unknown,
}

impl VarType {
    pub fn from_keyword(tpe: &[u8]) -> Option<Self> {
        match tpe {
            b"wire" => Some(VarType::Wire),
            b"reg" => Some(VarType::Reg),
            b"integer" => Some(VarType::Integer),
            b"real" => Some(VarType::Real),
            b"realtime" => Some(VarType::RealTime),
            b"parameter" | b"real_parameter" => Some(VarType::Parameter),
            b"event" => Some(VarType::Event),
            b"supply0" => Some(VarType::Supply0),
            b"supply1" => Some(VarType::Supply1),
            b"time" => Some(VarType::Time),
            b"tri" => Some(VarType::Tri),
            b"triand" => Some(VarType::TriAnd),
            b"trior" => Some(VarType::TriOr),
            b"trireg" => Some(VarType::TriReg),
            b"tri0" => Some(VarType::Tri0),
            b"tri1" => Some(VarType::Tri1),
            b"wand" => Some(VarType::WAnd),
            b"wor" => Some(VarType::WOr),
            b"logic" => Some(VarType::Logic),
            b"bit" => Some(VarType::Bit),
            b"string" => Some(VarType::String),
            _ => None,
        }
    }
}

/// Bit range of a variable as declared in the header, e.g. `[7:0]` or `[2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub struct VarIndex {
    msb: i64,
    lsb: i64,
}

impl VarIndex {
    pub fn new(msb: i64, lsb: i64) -> Self {
        VarIndex { msb, lsb }
    }

    #[inline]
    pub fn msb(&self) -> i64 {
        self.msb
    }

    #[inline]
    pub fn lsb(&self) -> i64 {
        self.lsb
    }

    #[inline]
    pub fn length(&self) -> u32 {
        (self.msb - self.lsb).unsigned_abs() as u32 + 1
    }
}

/// Where the current value of a signal lives in the state store.
/// Signals are partitioned by width: exactly the 1-bit signals are packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub enum SignalStorage {
    /// Slot in the packed 2-bit state (signals with `width == 1`).
    Bit(u32),
    /// Slot in the string state (signals with `width > 1`).
    Str(u32),
}

/// A signal definition from the header. Immutable once the table is sealed.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub struct Signal {
    pub name: String,
    pub full_path: String,
    /// Identifier code used by value-change lines. Several signals may share
    /// an id code (aliasing).
    pub id_code: String,
    pub tpe: VarType,
    pub width: u32,
    pub bit_range: Option<VarIndex>,
    /// Position in the flat signal array.
    pub index: SignalIdx,
    pub storage: SignalStorage,
}

impl Signal {
    #[inline]
    pub fn is_1bit(&self) -> bool {
        matches!(self.storage, SignalStorage::Bit(_))
    }
}

/// A node in the scope tree. The root is synthetic and has an empty name.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde1", derive(serde::Serialize, serde::Deserialize))]
pub struct ScopeNode {
    pub name: String,
    /// Dot-joined names of all ancestors excluding the root.
    pub full_path: String,
    pub parent: Option<ScopeIdx>,
    pub children: Vec<ScopeIdx>,
    /// Signals declared directly in this scope.
    pub signals: Vec<SignalIdx>,
}

/// Signal definitions, the scope tree and the id-code / path lookup tables.
///
/// Built incrementally while the header is parsed, then frozen by
/// [`SymbolTable::seal`] at `$enddefinitions`.
#[derive(Debug)]
pub struct SymbolTable {
    signals: Vec<Signal>,
    scopes: Vec<ScopeNode>,
    scope_stack: Vec<ScopeIdx>,
    id_to_signals: FxHashMap<String, Vec<SignalIdx>>,
    path_to_signal: FxHashMap<String, SignalIdx>,
    num_1bit: u32,
    num_multibit: u32,
    sealed: bool,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let root = ScopeNode {
            name: String::new(),
            full_path: String::new(),
            parent: None,
            children: Vec::new(),
            signals: Vec::new(),
        };
        SymbolTable {
            signals: Vec::new(),
            scopes: vec![root],
            scope_stack: vec![0],
            id_to_signals: FxHashMap::default(),
            path_to_signal: FxHashMap::default(),
            num_1bit: 0,
            num_multibit: 0,
            sealed: false,
        }
    }

    fn current_scope(&self) -> ScopeIdx {
        *self.scope_stack.last().unwrap_or(&0)
    }

    pub fn declare_scope(&mut self, name: &str) -> ScopeIdx {
        debug_assert!(!self.sealed);
        let parent = self.current_scope();
        let parent_path = &self.scopes[parent as usize].full_path;
        let full_path = if parent_path.is_empty() {
            name.to_string()
        } else {
            let mut p = String::with_capacity(parent_path.len() + name.len() + 1);
            p.push_str(parent_path);
            p.push(SCOPE_SEPARATOR);
            p.push_str(name);
            p
        };
        let id = self.scopes.len() as ScopeIdx;
        self.scopes.push(ScopeNode {
            name: name.to_string(),
            full_path,
            parent: Some(parent),
            children: Vec::new(),
            signals: Vec::new(),
        });
        self.scopes[parent as usize].children.push(id);
        self.scope_stack.push(id);
        id
    }

    /// Pops the current scope. The synthetic root is never popped.
    pub fn close_scope(&mut self) {
        if self.scope_stack.len() > 1 {
            self.scope_stack.pop();
        }
    }

    pub fn declare_signal(
        &mut self,
        name: &str,
        id_code: &[u8],
        tpe: VarType,
        width: u32,
        bit_range: Option<VarIndex>,
    ) -> SignalIdx {
        debug_assert!(!self.sealed);
        let width = width.max(1);
        let scope = self.current_scope();
        let scope_path = &self.scopes[scope as usize].full_path;
        let full_path = if scope_path.is_empty() {
            name.to_string()
        } else {
            let mut p = String::with_capacity(scope_path.len() + name.len() + 1);
            p.push_str(scope_path);
            p.push(SCOPE_SEPARATOR);
            p.push_str(name);
            p
        };

        let index = self.signals.len() as SignalIdx;
        let storage = if width == 1 {
            let s = SignalStorage::Bit(self.num_1bit);
            self.num_1bit += 1;
            s
        } else {
            let s = SignalStorage::Str(self.num_multibit);
            self.num_multibit += 1;
            s
        };
        let id_code = String::from_utf8_lossy(id_code).into_owned();

        self.scopes[scope as usize].signals.push(index);
        self.id_to_signals
            .entry(id_code.clone())
            .or_default()
            .push(index);
        self.path_to_signal.insert(full_path.clone(), index);
        self.signals.push(Signal {
            name: name.to_string(),
            full_path,
            id_code,
            tpe,
            width,
            bit_range,
            index,
            storage,
        });
        index
    }

    /// Freezes the signal array and returns `(num_1bit, num_multibit)` so the
    /// state store can be sized.
    pub fn seal(&mut self) -> (u32, u32) {
        self.sealed = true;
        self.signals.shrink_to_fit();
        self.scopes.shrink_to_fit();
        (self.num_1bit, self.num_multibit)
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[inline]
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    #[inline]
    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    #[inline]
    pub fn root(&self) -> &ScopeNode {
        &self.scopes[0]
    }

    #[inline]
    pub fn scope(&self, id: ScopeIdx) -> &ScopeNode {
        &self.scopes[id as usize]
    }

    pub fn lookup_by_path(&self, full_path: &str) -> Option<SignalIdx> {
        self.path_to_signal.get(full_path).copied()
    }

    /// All signals sharing the given id code, in declaration order.
    pub fn alias_group(&self, id_code: &[u8]) -> Option<&[SignalIdx]> {
        // id codes are printable ASCII, so the lossy conversion never copies
        let key = String::from_utf8_lossy(id_code);
        self.id_to_signals.get(key.as_ref()).map(|v| v.as_slice())
    }

    /// Rough size of the table in bytes.
    pub fn size_in_memory(&self) -> usize {
        let signal_size = self.signals.capacity() * std::mem::size_of::<Signal>()
            + self
                .signals
                .iter()
                .map(|s| s.name.len() + s.full_path.len() + s.id_code.len())
                .sum::<usize>();
        let scope_size = self.scopes.capacity() * std::mem::size_of::<ScopeNode>()
            + self
                .scopes
                .iter()
                .map(|s| {
                    s.name.len()
                        + s.full_path.len()
                        + s.children.capacity() * std::mem::size_of::<ScopeIdx>()
                        + s.signals.capacity() * std::mem::size_of::<SignalIdx>()
                })
                .sum::<usize>();
        signal_size + scope_size + std::mem::size_of::<SymbolTable>()
    }
}
