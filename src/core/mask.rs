//! Fixed-width CPU bit vector and the comma-range grammar over it.

use std::fmt;

use crate::{Err, Result, err};

type Word = u64;

const WORD_BITS: usize = Word::BITS as usize;

/// Bit vector indexed by logical CPU id. The width is fixed at
/// construction to the machine's configured CPU count; every mask taking
/// part in an operation is expected to share that width.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CpuMask {
	words: Vec<Word>,
	len: usize,
}

impl CpuMask {
	#[must_use]
	pub fn new(len: usize) -> Self {
		Self {
			words: vec![0; len.div_ceil(WORD_BITS)],
			len,
		}
	}

	/// Parse a CPU list of the grammar `range (',' range)*` where `range`
	/// is `id` or `id-id`. Whitespace in any position, empty tokens,
	/// reversed ranges and ids outside `[0, len)` are all rejected.
	pub fn parse(s: &str, len: usize) -> Result<Self> {
		let mut mask = Self::new(len);
		if s.is_empty() {
			return Err!(CpuString("{s:?}"));
		}

		for token in s.split(',') {
			let (lo, hi) = match token.split_once('-') {
				| None => {
					let id = parse_id(token, s)?;
					(id, id)
				},
				| Some((lo, hi)) => (parse_id(lo, s)?, parse_id(hi, s)?),
			};

			if lo > hi {
				return Err!(CpuString("{s:?} (reversed range {lo}-{hi})"));
			}
			if hi >= len {
				return Err!(CpuString("{s:?} (id {hi} out of range 0-{})", len.saturating_sub(1)));
			}
			for id in lo..=hi {
				mask.set(id);
			}
		}

		Ok(mask)
	}

	#[inline]
	#[must_use]
	pub fn len(&self) -> usize { self.len }

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool { self.words.iter().all(|&word| word == 0) }

	#[inline]
	#[must_use]
	pub fn count_ones(&self) -> usize {
		self.words
			.iter()
			.map(|word| usize::try_from(word.count_ones()).expect("u32 fits usize"))
			.sum()
	}

	#[inline]
	pub fn set(&mut self, id: usize) {
		debug_assert!(id < self.len, "CPU id must be within the mask width");
		self.words[id / WORD_BITS] |= 1 << (id % WORD_BITS);
	}

	#[inline]
	pub fn clear(&mut self, id: usize) {
		debug_assert!(id < self.len, "CPU id must be within the mask width");
		self.words[id / WORD_BITS] &= !(1 << (id % WORD_BITS));
	}

	#[inline]
	#[must_use]
	pub fn test(&self, id: usize) -> bool {
		id < self.len && self.words[id / WORD_BITS] & (1 << (id % WORD_BITS)) != 0
	}

	/// Whether every bit set here is also set in `of`.
	#[must_use]
	pub fn is_subset(&self, of: &Self) -> bool {
		self.words
			.iter()
			.enumerate()
			.all(|(i, &word)| word & !of.words.get(i).copied().unwrap_or(0) == 0)
	}

	/// Whether any bit is set in both masks.
	#[must_use]
	pub fn intersects(&self, other: &Self) -> bool {
		self.words
			.iter()
			.zip(other.words.iter())
			.any(|(&a, &b)| a & b != 0)
	}

	/// Set bits in ascending order.
	pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
		(0..self.len).filter(move |&id| self.test(id))
	}
}

fn parse_id(token: &str, source: &str) -> Result<usize> {
	if token.is_empty() || !token.bytes().all(|byte| byte.is_ascii_digit()) {
		return Err!(CpuString("{source:?}"));
	}

	token
		.parse()
		.map_err(|_| err!(CpuString("{source:?} (id {token:?} too large)")))
}

/// Renders the canonical comma-range form, e.g. `0-3,6`.
impl fmt::Display for CpuMask {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut iter = self.iter().peekable();
		let mut first = true;
		while let Some(start) = iter.next() {
			let mut end = start;
			while iter.peek() == Some(&(end + 1)) {
				end = iter.next().expect("peeked");
			}

			if !first {
				write!(f, ",")?;
			}
			first = false;

			if start == end {
				write!(f, "{start}")?;
			} else {
				write!(f, "{start}-{end}")?;
			}
		}

		Ok(())
	}
}
