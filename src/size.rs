//! Cheap, non-recursive byte estimates for tracked values.
//!
//! Nothing here walks nested data: a `Vec<String>` is `len * size_of::<String>()`,
//! not the sum of its strings. Estimates are for relative comparisons only.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    mem::size_of,
    rc::Rc,
    sync::Arc,
};

/// Byte-size estimate of a value passed to [`crate::Profiler::record`].
///
/// The default is the static size of the value. Application types opt in
/// with an empty impl, or override when they own a heap buffer:
///
/// ```rust
/// use memsight::EstimateSize;
///
/// struct Packet {
///     payload: Vec<u8>,
/// }
///
/// impl EstimateSize for Packet {
///     fn estimated_size(&self) -> u64 {
///         self.payload.estimated_size()
///     }
/// }
///
/// let packet = Packet { payload: vec![0; 1500] };
/// assert_eq!(packet.estimated_size(), 1500);
/// ```
pub trait EstimateSize {
    fn estimated_size(&self) -> u64 {
        std::mem::size_of_val(self) as u64
    }
}

macro_rules! static_size {
    ($($ty:ty),* $(,)?) => {
        $(impl EstimateSize for $ty {})*
    };
}

static_size!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
);

fn sequence<T>(len: usize) -> u64 {
    (len as u64).saturating_mul(size_of::<T>() as u64)
}

fn associative<K, V>(len: usize) -> u64 {
    (len as u64).saturating_mul((size_of::<K>() + size_of::<V>()) as u64)
}

impl EstimateSize for str {
    fn estimated_size(&self) -> u64 {
        self.len() as u64
    }
}

impl EstimateSize for String {
    fn estimated_size(&self) -> u64 {
        self.len() as u64
    }
}

impl<T> EstimateSize for [T] {
    fn estimated_size(&self) -> u64 {
        sequence::<T>(self.len())
    }
}

impl<T, const N: usize> EstimateSize for [T; N] {
    fn estimated_size(&self) -> u64 {
        sequence::<T>(N)
    }
}

impl<T> EstimateSize for Vec<T> {
    fn estimated_size(&self) -> u64 {
        sequence::<T>(self.len())
    }
}

impl<T> EstimateSize for VecDeque<T> {
    fn estimated_size(&self) -> u64 {
        sequence::<T>(self.len())
    }
}

impl<K, V, S> EstimateSize for HashMap<K, V, S> {
    fn estimated_size(&self) -> u64 {
        associative::<K, V>(self.len())
    }
}

impl<K, V> EstimateSize for BTreeMap<K, V> {
    fn estimated_size(&self) -> u64 {
        associative::<K, V>(self.len())
    }
}

impl<K, S> EstimateSize for HashSet<K, S> {
    fn estimated_size(&self) -> u64 {
        sequence::<K>(self.len())
    }
}

impl<K> EstimateSize for BTreeSet<K> {
    fn estimated_size(&self) -> u64 {
        sequence::<K>(self.len())
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for &T {
    fn estimated_size(&self) -> u64 {
        (**self).estimated_size()
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Box<T> {
    fn estimated_size(&self) -> u64 {
        (**self).estimated_size()
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Rc<T> {
    fn estimated_size(&self) -> u64 {
        (**self).estimated_size()
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Arc<T> {
    fn estimated_size(&self) -> u64 {
        (**self).estimated_size()
    }
}

impl<T: EstimateSize> EstimateSize for Option<T> {
    fn estimated_size(&self) -> u64 {
        self.as_ref().map_or(0, EstimateSize::estimated_size)
    }
}

/// Caller-chosen shape of a value, for call sites that track something they
/// do not hold as a Rust value (foreign buffers, pooled slabs, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar { size: u64 },
    Sequence { len: u64, elem_size: u64 },
    Associative { len: u64, key_size: u64, value_size: u64 },
    Text { len: u64 },
    Opaque { size: u64 },
}

impl Shape {
    pub fn bytes(&self) -> u64 {
        match *self {
            Shape::Scalar { size } | Shape::Opaque { size } => size,
            Shape::Sequence { len, elem_size } => len.saturating_mul(elem_size),
            Shape::Associative {
                len,
                key_size,
                value_size,
            } => len.saturating_mul(key_size.saturating_add(value_size)),
            Shape::Text { len } => len,
        }
    }
}
