use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// Values that can live in a [`TxnCell`](crate::TxnCell).
///
/// `Clone` gives transactions their private copies. [`TxnValue::same_value`] decides
/// whether a write changed anything: a write of an identical value is not published, does
/// not bump the cell's version and does not wake blocked transactions.
///
/// The default comparison is `==`. Floating point values compare their bit patterns
/// instead, so `-0.0` differs from `0.0` and a NaN is identical to itself.
///
/// # Examples
///
/// ```
/// use thoth::TxnValue;
///
/// #[derive(Clone, PartialEq)]
/// struct Account {
///     owner: String,
///     balance: i64,
/// }
///
/// impl TxnValue for Account {}
///
/// assert!(f64::NAN.same_value(&f64::NAN));
/// assert!(!0.0_f64.same_value(&-0.0));
/// ```
pub trait TxnValue: Clone + PartialEq + Send + Sync + 'static {
    /// Returns `true` if `other` is indistinguishable from `self`.
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

macro_rules! txn_value_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(impl TxnValue for $ty {})*
    };
}

txn_value_by_eq!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, String,
    &'static str, Duration,
);

impl TxnValue for f32 {
    fn same_value(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl TxnValue for f64 {
    fn same_value(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

fn same_elements<'a, T, I>(left: I, right: I) -> bool
where
    T: TxnValue,
    I: ExactSizeIterator<Item = &'a T>,
{
    left.len() == right.len() && left.zip(right).all(|(l, r)| l.same_value(r))
}

impl<T: TxnValue> TxnValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(left), Some(right)) => left.same_value(right),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: TxnValue> TxnValue for Box<T> {
    fn same_value(&self, other: &Self) -> bool {
        (**self).same_value(other)
    }
}

impl<T: TxnValue> TxnValue for Arc<T> {
    fn same_value(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other) || (**self).same_value(other)
    }
}

impl<T: TxnValue> TxnValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        same_elements(self.iter(), other.iter())
    }
}

impl<T: TxnValue> TxnValue for VecDeque<T> {
    fn same_value(&self, other: &Self) -> bool {
        same_elements(self.iter(), other.iter())
    }
}

impl<T: TxnValue, const N: usize> TxnValue for [T; N] {
    fn same_value(&self, other: &Self) -> bool {
        same_elements(self.iter(), other.iter())
    }
}

impl<K, V> TxnValue for BTreeMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: TxnValue,
{
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((lk, lv), (rk, rv))| lk == rk && lv.same_value(rv))
    }
}

impl<K, V, S> TxnValue for HashMap<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: TxnValue,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|v| value.same_value(v)))
    }
}

macro_rules! txn_value_tuple {
    ($($name:ident $index:tt),+) => {
        impl<$($name: TxnValue),+> TxnValue for ($($name,)+) {
            fn same_value(&self, other: &Self) -> bool {
                $(self.$index.same_value(&other.$index))&&+
            }
        }
    };
}

txn_value_tuple!(A 0);
txn_value_tuple!(A 0, B 1);
txn_value_tuple!(A 0, B 1, C 2);
txn_value_tuple!(A 0, B 1, C 2, D 3);
