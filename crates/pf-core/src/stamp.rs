//! Stamping buffers for the nodal equations.
//!
//! Components never index the system matrix directly with raw node numbers:
//! they stamp through [`Terminal`]s, so contributions at ground are dropped
//! here in one place.

use nalgebra::DMatrix;

use crate::error::{CoreError, CoreResult};
use crate::numeric::Complex;

/// Connection point of a component terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Terminal {
    /// Reference node; has no row or column in the system.
    Ground,
    /// 0-based network node index.
    Node(usize),
}

impl Terminal {
    /// Map a raw netlist index; negative values denote ground.
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            Terminal::Ground
        } else {
            Terminal::Node(raw as usize)
        }
    }

    /// System index of this terminal, or `None` when grounded.
    pub fn index(self) -> Option<usize> {
        match self {
            Terminal::Ground => None,
            Terminal::Node(i) => Some(i),
        }
    }

    pub fn is_ground(self) -> bool {
        matches!(self, Terminal::Ground)
    }
}

/// Dense complex system matrix for one topology variant.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMatrix {
    inner: DMatrix<Complex>,
}

impl SystemMatrix {
    pub fn zeros(size: usize) -> Self {
        Self {
            inner: DMatrix::zeros(size, size),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.nrows()
    }

    /// Add `value` at (row, col); rows or columns at ground are skipped.
    pub fn add(&mut self, row: Terminal, col: Terminal, value: Complex) -> CoreResult<()> {
        match (row.index(), col.index()) {
            (Some(r), Some(c)) => self.add_index(r, c, value),
            _ => Ok(()),
        }
    }

    /// Add `value` at a raw system position (virtual nodes, branch rows).
    pub fn add_index(&mut self, row: usize, col: usize, value: Complex) -> CoreResult<()> {
        let len = self.size();
        let index = row.max(col);
        if index >= len {
            return Err(CoreError::IndexOob {
                what: "system matrix position",
                index,
                len,
            });
        }
        self.inner[(row, col)] += value;
        Ok(())
    }

    /// Standard two-terminal admittance pattern.
    pub fn stamp_admittance(&mut self, a: Terminal, b: Terminal, y: Complex) -> CoreResult<()> {
        self.add(a, a, y)?;
        self.add(b, b, y)?;
        self.add(a, b, -y)?;
        self.add(b, a, -y)
    }

    pub fn get(&self, row: usize, col: usize) -> Complex {
        self.inner[(row, col)]
    }

    pub fn as_matrix(&self) -> &DMatrix<Complex> {
        &self.inner
    }

    pub fn into_matrix(self) -> DMatrix<Complex> {
        self.inner
    }
}

/// Sparse right-hand-side contribution of one component.
///
/// Entries accumulate; the buffer keeps its capacity across `clear` so a
/// component re-stamping every step does not allocate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceStamp {
    entries: Vec<(usize, Complex)>,
}

impl SourceStamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Inject `value` into the node of `terminal`; ground is skipped.
    pub fn add(&mut self, terminal: Terminal, value: Complex) {
        if let Some(i) = terminal.index() {
            self.add_index(i, value);
        }
    }

    pub fn add_index(&mut self, index: usize, value: Complex) {
        self.entries.push((index, value));
    }

    /// Current `value` flowing from `from` to `to` through an internal source.
    pub fn add_branch_current(&mut self, from: Terminal, to: Terminal, value: Complex) {
        self.add(from, -value);
        self.add(to, value);
    }

    /// Append every entry of `other` (composite components).
    pub fn extend_from(&mut self, other: &SourceStamp) {
        self.entries.extend_from_slice(&other.entries);
    }

    pub fn entries(&self) -> &[(usize, Complex)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
