// Copyright 2025 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Current value of every signal while scanning a trace: 1-bit signals are
//! packed two bits per signal into 64-bit words, multi-bit signals keep an
//! owned string each.

use num_enum::TryFromPrimitive;

/// Two-bit encoding of a 1-bit signal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum BitValue {
    Zero = 0,
    One = 1,
    X = 2,
    Z = 3,
}

impl BitValue {
    pub fn from_vcd(b: u8) -> Option<Self> {
        match b {
            b'0' => Some(BitValue::Zero),
            b'1' => Some(BitValue::One),
            b'x' | b'X' => Some(BitValue::X),
            b'z' | b'Z' => Some(BitValue::Z),
            _ => None,
        }
    }

    pub fn to_char(&self) -> char {
        match self {
            BitValue::Zero => '0',
            BitValue::One => '1',
            BitValue::X => 'x',
            BitValue::Z => 'z',
        }
    }
}

/// 32 two-bit slots per word, every slot `x` (0b10).
const ALL_X: u64 = 0xaaaa_aaaa_aaaa_aaaa;
const SLOTS_PER_WORD: u32 = 32;
const INITIAL_STRING: &str = "x";

/// A deep copy of the state at one point in the trace, stored by snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct StateImage {
    pub(crate) packed: Vec<u64>,
    pub(crate) strings: Vec<String>,
}

impl StateImage {
    pub fn size_in_memory(&self) -> usize {
        self.packed.capacity() * std::mem::size_of::<u64>()
            + self.strings.capacity() * std::mem::size_of::<String>()
            + self.strings.iter().map(|s| s.len()).sum::<usize>()
    }
}

#[derive(Debug, Default)]
pub struct StateStore {
    packed: Vec<u64>,
    strings: Vec<String>,
}

impl StateStore {
    pub fn empty() -> Self {
        StateStore::default()
    }

    /// Sized at end-of-header; everything starts out as `x`.
    pub fn new(num_1bit: u32, num_multibit: u32) -> Self {
        let words = num_1bit.div_ceil(SLOTS_PER_WORD) as usize;
        StateStore {
            packed: vec![ALL_X; words],
            strings: vec![INITIAL_STRING.to_string(); num_multibit as usize],
        }
    }

    #[inline]
    pub fn set_bit(&mut self, bit_index: u32, value: BitValue) {
        let word = (bit_index / SLOTS_PER_WORD) as usize;
        let shift = (bit_index % SLOTS_PER_WORD) * 2;
        let cleared = self.packed[word] & !(0b11u64 << shift);
        self.packed[word] = cleared | ((value as u64) << shift);
    }

    #[inline]
    pub fn get_bit(&self, bit_index: u32) -> BitValue {
        let word = (bit_index / SLOTS_PER_WORD) as usize;
        let shift = (bit_index % SLOTS_PER_WORD) * 2;
        let raw = ((self.packed[word] >> shift) & 0b11) as u8;
        // a masked 2-bit value always maps to a variant
        BitValue::try_from(raw).unwrap()
    }

    #[inline]
    pub fn set_str(&mut self, str_index: u32, value: &[u8]) {
        let slot = &mut self.strings[str_index as usize];
        slot.clear();
        slot.push_str(&String::from_utf8_lossy(value));
    }

    #[inline]
    pub fn get_str(&self, str_index: u32) -> &str {
        &self.strings[str_index as usize]
    }

    /// Deep copy of both arrays, for the snapshot index.
    pub fn image(&self) -> StateImage {
        StateImage {
            packed: self.packed.clone(),
            strings: self.strings.clone(),
        }
    }

    pub fn restore(&mut self, image: &StateImage) {
        self.packed.clear();
        self.packed.extend_from_slice(&image.packed);
        self.strings.clear();
        self.strings.extend_from_slice(&image.strings);
    }

    pub fn size_in_memory(&self) -> usize {
        self.packed.capacity() * std::mem::size_of::<u64>()
            + self.strings.capacity() * std::mem::size_of::<String>()
            + self.strings.iter().map(|s| s.len()).sum::<usize>()
    }
}
