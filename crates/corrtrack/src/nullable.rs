//! Serde adapter for fields that mark missing values with NaN.
//!
//! JSON has no NaN, so non-finite numbers are written as `null` and read
//! back as NaN. Use with `#[serde(with = "crate::nullable")]`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub(crate) trait Nullable: Sized {
    type Repr: Serialize + DeserializeOwned;

    fn to_repr(&self) -> Self::Repr;
    fn from_repr(repr: Self::Repr) -> Self;
}

impl Nullable for f64 {
    type Repr = Option<f64>;

    fn to_repr(&self) -> Option<f64> {
        self.is_finite().then_some(*self)
    }

    fn from_repr(repr: Option<f64>) -> Self {
        repr.unwrap_or(f64::NAN)
    }
}

impl Nullable for [f64; 2] {
    type Repr = [Option<f64>; 2];

    fn to_repr(&self) -> Self::Repr {
        [self[0].to_repr(), self[1].to_repr()]
    }

    fn from_repr(repr: Self::Repr) -> Self {
        repr.map(f64::from_repr)
    }
}

impl<T: Nullable> Nullable for Vec<T> {
    type Repr = Vec<T::Repr>;

    fn to_repr(&self) -> Self::Repr {
        self.iter().map(Nullable::to_repr).collect()
    }

    fn from_repr(repr: Self::Repr) -> Self {
        repr.into_iter().map(T::from_repr).collect()
    }
}

pub(crate) fn serialize<T: Nullable, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    value.to_repr().serialize(serializer)
}

pub(crate) fn deserialize<'de, T: Nullable, D: Deserializer<'de>>(deserializer: D) -> Result<T, D::Error> {
    T::Repr::deserialize(deserializer).map(T::from_repr)
}
