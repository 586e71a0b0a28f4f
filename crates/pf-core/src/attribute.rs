//! Typed attribute arena.
//!
//! Attributes are the only channel through which tasks exchange data. They
//! are registered once while a simulation is being built
//! ([`AttributeRegistry`]) and then frozen into an [`AttributeStore`] whose
//! shape never changes. Tasks refer to attributes through [`Attr<T>`]
//! handles, so dependency declarations are plain indices that can be
//! validated once when the schedule is built.

use core::fmt;
use core::marker::PhantomData;
use std::sync::RwLock;

use nalgebra::DVector;

use crate::error::{CoreError, CoreResult};
use crate::ids::AttrId;
use crate::numeric::{Complex, Real};
use crate::stamp::SourceStamp;

pub type ComplexVector = DVector<Complex>;
pub type RealVector = DVector<Real>;

/// Value stored in one attribute cell.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Real(Real),
    Complex(Complex),
    ComplexVector(ComplexVector),
    RealVector(RealVector),
    Source(SourceStamp),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Real(_) => AttributeKind::Real,
            AttributeValue::Complex(_) => AttributeKind::Complex,
            AttributeValue::ComplexVector(_) => AttributeKind::ComplexVector,
            AttributeValue::RealVector(_) => AttributeKind::RealVector,
            AttributeValue::Source(_) => AttributeKind::Source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Real,
    Complex,
    ComplexVector,
    RealVector,
    Source,
}

impl AttributeKind {
    pub fn name(self) -> &'static str {
        match self {
            AttributeKind::Real => "real",
            AttributeKind::Complex => "complex",
            AttributeKind::ComplexVector => "complex vector",
            AttributeKind::RealVector => "real vector",
            AttributeKind::Source => "source stamp",
        }
    }
}

/// Rust types that can live in an attribute cell.
pub trait AttributeType: Sized + Send + Sync + 'static {
    const KIND: AttributeKind;

    fn into_value(self) -> AttributeValue;
    fn from_value(value: &AttributeValue) -> Option<&Self>;
    fn from_value_mut(value: &mut AttributeValue) -> Option<&mut Self>;
}

macro_rules! attribute_type {
    ($ty:ty, $variant:ident) => {
        impl AttributeType for $ty {
            const KIND: AttributeKind = AttributeKind::$variant;

            fn into_value(self) -> AttributeValue {
                AttributeValue::$variant(self)
            }

            fn from_value(value: &AttributeValue) -> Option<&Self> {
                match value {
                    AttributeValue::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn from_value_mut(value: &mut AttributeValue) -> Option<&mut Self> {
                match value {
                    AttributeValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

attribute_type!(Real, Real);
attribute_type!(Complex, Complex);
attribute_type!(ComplexVector, ComplexVector);
attribute_type!(RealVector, RealVector);
attribute_type!(SourceStamp, Source);

/// Typed handle to an attribute cell.
pub struct Attr<T> {
    id: AttrId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Attr<T> {
    fn new(id: AttrId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(self) -> AttrId {
        self.id
    }
}

impl<T> Clone for Attr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Attr<T> {}

impl<T> PartialEq for Attr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Attr<T> {}

impl<T> core::hash::Hash for Attr<T> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Attr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attr({})", self.id)
    }
}

impl<T> From<Attr<T>> for AttrId {
    fn from(attr: Attr<T>) -> Self {
        attr.id
    }
}

#[derive(Debug)]
struct AttributeSlot {
    owner: String,
    name: String,
    kind: AttributeKind,
    logged: bool,
    value: RwLock<AttributeValue>,
}

impl AttributeSlot {
    fn label(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

/// Mutable-shape registry used while a simulation is being constructed.
#[derive(Debug, Default)]
pub struct AttributeRegistry {
    slots: Vec<AttributeSlot>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attribute owned by `owner`.
    pub fn register<T: AttributeType>(
        &mut self,
        owner: &str,
        name: &str,
        initial: T,
    ) -> CoreResult<Attr<T>> {
        self.insert(owner, name, initial, false)
    }

    /// Register an attribute that is included in per-step records.
    pub fn register_logged<T: AttributeType>(
        &mut self,
        owner: &str,
        name: &str,
        initial: T,
    ) -> CoreResult<Attr<T>> {
        self.insert(owner, name, initial, true)
    }

    fn insert<T: AttributeType>(
        &mut self,
        owner: &str,
        name: &str,
        initial: T,
        logged: bool,
    ) -> CoreResult<Attr<T>> {
        if self
            .slots
            .iter()
            .any(|s| s.owner == owner && s.name == name)
        {
            return Err(CoreError::InvalidArg {
                what: "attribute registered twice for the same owner",
            });
        }
        let id = AttrId::from_usize(self.slots.len());
        self.slots.push(AttributeSlot {
            owner: owner.to_string(),
            name: name.to_string(),
            kind: T::KIND,
            logged,
            value: RwLock::new(initial.into_value()),
        });
        Ok(Attr::new(id))
    }

    /// Look up a typed handle by owner and name.
    pub fn find<T: AttributeType>(&self, owner: &str, name: &str) -> Option<Attr<T>> {
        find_in(&self.slots, owner, name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Freeze the registry into the store used while stepping.
    pub fn freeze(self) -> AttributeStore {
        AttributeStore { slots: self.slots }
    }
}

fn find_in<T: AttributeType>(slots: &[AttributeSlot], owner: &str, name: &str) -> Option<Attr<T>> {
    slots
        .iter()
        .position(|s| s.owner == owner && s.name == name && s.kind == T::KIND)
        .map(|i| Attr::new(AttrId::from_usize(i)))
}

/// Fixed-shape attribute arena shared by all tasks of a simulation.
///
/// Every cell is individually locked. The schedule guarantees a single
/// writer per step, so locks are uncontended in practice; they exist so
/// readers never observe a half-written value.
#[derive(Debug, Default)]
pub struct AttributeStore {
    slots: Vec<AttributeSlot>,
}

impl AttributeStore {
    fn slot(&self, id: AttrId) -> CoreResult<&AttributeSlot> {
        self.slots.get(id.slot()).ok_or(CoreError::IndexOob {
            what: "attribute",
            index: id.slot(),
            len: self.slots.len(),
        })
    }

    /// Run `f` with shared access to the value.
    pub fn read<T: AttributeType, R>(&self, attr: Attr<T>, f: impl FnOnce(&T) -> R) -> CoreResult<R> {
        let slot = self.slot(attr.id)?;
        let guard = slot
            .value
            .read()
            .map_err(|_| CoreError::Poisoned { attr: slot.label() })?;
        let value = T::from_value(&guard).ok_or_else(|| type_error::<T>(slot))?;
        Ok(f(value))
    }

    /// Run `f` with exclusive access to the value.
    pub fn write<T: AttributeType, R>(
        &self,
        attr: Attr<T>,
        f: impl FnOnce(&mut T) -> R,
    ) -> CoreResult<R> {
        let slot = self.slot(attr.id)?;
        let mut guard = slot
            .value
            .write()
            .map_err(|_| CoreError::Poisoned { attr: slot.label() })?;
        let value = T::from_value_mut(&mut guard).ok_or_else(|| type_error::<T>(slot))?;
        Ok(f(value))
    }

    /// Copy the current value out.
    pub fn get<T: AttributeType + Clone>(&self, attr: Attr<T>) -> CoreResult<T> {
        self.read(attr, T::clone)
    }

    /// Overwrite the current value.
    pub fn set<T: AttributeType>(&self, attr: Attr<T>, value: T) -> CoreResult<()> {
        self.write(attr, |v| *v = value)
    }

    /// Untyped snapshot of a cell, used by record writers.
    pub fn snapshot(&self, id: AttrId) -> CoreResult<AttributeValue> {
        let slot = self.slot(id)?;
        let guard = slot
            .value
            .read()
            .map_err(|_| CoreError::Poisoned { attr: slot.label() })?;
        Ok(guard.clone())
    }

    pub fn find<T: AttributeType>(&self, owner: &str, name: &str) -> Option<Attr<T>> {
        find_in(&self.slots, owner, name)
    }

    /// Owner and name of an attribute.
    pub fn describe(&self, id: AttrId) -> Option<(&str, &str)> {
        self.slots
            .get(id.slot())
            .map(|s| (s.owner.as_str(), s.name.as_str()))
    }

    /// Human-readable `owner.name` label.
    pub fn label(&self, id: AttrId) -> String {
        self.slots
            .get(id.slot())
            .map_or_else(|| format!("<attr {id}>"), AttributeSlot::label)
    }

    /// Ids of all attributes flagged for per-step records, in registration order.
    pub fn logged(&self) -> impl Iterator<Item = AttrId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.logged)
            .map(|(i, _)| AttrId::from_usize(i))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn type_error<T: AttributeType>(slot: &AttributeSlot) -> CoreError {
    CoreError::AttributeType {
        attr: slot.label(),
        expected: T::KIND.name(),
        actual: slot.kind.name(),
    }
}
