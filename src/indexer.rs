//! An immutable bijection between distinct values and a dense `0..N` index range.

use std::collections::BTreeMap;
use std::io::Read;
use std::io::Write;

use crate::error::CrfError;
use crate::error::Result;

/// Built once from a (possibly duplicate-containing) stream; the first occurrence of
/// each distinct element fixes its index. Read-only thereafter.
#[derive(Debug, Clone)]
pub struct Indexer<T> {
	elements: Vec<T>,
	by_value: BTreeMap<T, usize>,
}

const PERSIST_VERSION: &str = "1.0";

impl<T: Clone + Ord> Indexer<T> {
	/// Builds an indexer from `elements`, keeping only the first occurrence of each
	/// distinct value and assigning indices in first-seen order.
	pub fn of<I>(elements: I) -> Self
	where
		I: IntoIterator<Item = T>,
	{
		let mut unique: Vec<T> = Vec::new();
		let mut by_value: BTreeMap<T, usize> = BTreeMap::new();

		for element in elements {
			if by_value.contains_key(&element) {
				continue;
			}
			let idx: usize = unique.len();
			by_value.insert(element.clone(), idx);
			unique.push(element);
		}

		Self {
			elements: unique,
			by_value,
		}
	}

	pub fn size(&self) -> usize {
		self.elements.len()
	}

	pub fn is_empty(&self) -> bool {
		self.elements.is_empty()
	}

	pub fn get(&self, i: usize) -> Option<&T> {
		self.elements.get(i)
	}

	/// Looks up the index of `x`. Absent values return `None` — the idiomatic
	/// rendering of the "documented sentinel" this crate's spec names; see
	/// DESIGN.md for why this replaces a literal `-1`.
	pub fn index_of(&self, x: &T) -> Option<usize> {
		self.by_value.get(x).copied()
	}

	pub fn contains(&self, x: &T) -> bool {
		self.by_value.contains_key(x)
	}

	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.elements.iter()
	}
}

impl<T> Default for Indexer<T> {
	fn default() -> Self {
		Self {
			elements: Vec::new(),
			by_value: BTreeMap::new(),
		}
	}
}

impl Indexer<String> {
	/// Writes a self-describing stream: a length-prefixed version tag, then a
	/// length-prefixed list of strings in index order.
	pub fn save<W: Write>(&self, mut out: W) -> std::io::Result<()> {
		write_string(&mut out, PERSIST_VERSION)?;
		out.write_all(&(self.elements.len() as u64).to_le_bytes())?;
		for element in self.elements.iter() {
			write_string(&mut out, element)?;
		}
		Ok(())
	}

	/// Restores an indexer written by [`Indexer::save`]. Fails with
	/// [`CrfError::Config`] if the version tag does not match.
	pub fn load<R: Read>(mut input: R) -> Result<Self> {
		let version: String = read_string(&mut input)
			.map_err(|e| CrfError::Config(format!("failed to read persistence version tag: {e}")))?;
		if version != PERSIST_VERSION {
			return Err(CrfError::Config(format!(
				"indexer persistence version mismatch: expected {PERSIST_VERSION}, got {version}"
			)));
		}

		let mut count_bytes: [u8; 8] = [0; 8];
		input
			.read_exact(&mut count_bytes)
			.map_err(|e| CrfError::Config(format!("failed to read element count: {e}")))?;
		let count: u64 = u64::from_le_bytes(count_bytes);

		let mut elements: Vec<String> = Vec::with_capacity(count as usize);
		for _ in 0..count {
			let element: String =
				read_string(&mut input).map_err(|e| CrfError::Config(format!("failed to read element: {e}")))?;
			elements.push(element);
		}

		Ok(Self::of(elements))
	}
}

fn write_string<W: Write>(out: &mut W, s: &str) -> std::io::Result<()> {
	let bytes: &[u8] = s.as_bytes();
	out.write_all(&(bytes.len() as u32).to_le_bytes())?;
	out.write_all(bytes)
}

fn read_string<R: Read>(input: &mut R) -> std::io::Result<String> {
	let mut len_bytes: [u8; 4] = [0; 4];
	input.read_exact(&mut len_bytes)?;
	let len: usize = u32::from_le_bytes(len_bytes) as usize;
	let mut buf: Vec<u8> = vec![0; len];
	input.read_exact(&mut buf)?;
	String::from_utf8(buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
