// This file is part of Astarte.
//
// Copyright 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Structured CBOR value with composite accessors.
//!
//! Message bodies travel inside the envelope as an opaque CBOR item. [`Value`] keeps that
//! item decoded and lets the caller inspect or build composites without committing to a
//! typed message, which is needed by the dispatcher to route a body before its type is
//! known. Every accessor returns an error on a type or index mismatch, it never panics on
//! adversarial input.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::Error;

use super::Message;

/// A decoded CBOR item.
///
/// Wraps a [`ciborium::Value`] and exposes array and map edits on top of it. Elements are
/// plain [`ciborium::Value`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(ciborium::Value);

impl Value {
    /// Creates an empty CBOR array.
    pub fn array() -> Self {
        Self(ciborium::Value::Array(Vec::new()))
    }

    /// Creates an empty CBOR map.
    pub fn map() -> Self {
        Self(ciborium::Value::Map(Vec::new()))
    }

    /// Decodes a value from CBOR bytes.
    pub fn from_cbor(buf: &[u8]) -> Result<Self, Error> {
        let value = ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode cbor value");

            Error::new(ErrorKind::Decode, "a cbor value")
        })?;

        Ok(Self(value))
    }

    /// Encodes the value to CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        ciborium::into_writer(&self.0, &mut buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode cbor value");

            Error::new(ErrorKind::Encode, "a cbor value")
        })?;

        Ok(buf)
    }

    /// Decodes the value into a typed message body.
    pub fn decode_into<M>(&self) -> Result<M, Error>
    where
        M: Message,
    {
        let buf = self.to_cbor()?;

        M::decode(&buf)
    }

    /// Returns the element at the index of an array.
    pub fn get(&self, idx: usize) -> Result<&ciborium::Value, Error> {
        self.as_array()?
            .get(idx)
            .ok_or(Error::new(ErrorKind::NotFound, "the array element"))
    }

    /// Writes the element at the index of an array.
    ///
    /// Slots between the current length and the index are filled with `null`.
    pub fn set(&mut self, idx: usize, value: ciborium::Value) -> Result<(), Error> {
        let array = self.as_array_mut()?;

        if idx < array.len() {
            array[idx] = value;

            return Ok(());
        }

        array.resize(idx, ciborium::Value::Null);
        array.push(value);

        Ok(())
    }

    /// Appends an element to an array.
    pub fn push(&mut self, value: ciborium::Value) -> Result<(), Error> {
        self.as_array_mut()?.push(value);

        Ok(())
    }

    /// Number of elements of an array, or of pairs of a map.
    pub fn len(&self) -> Result<usize, Error> {
        match &self.0 {
            ciborium::Value::Array(items) => Ok(items.len()),
            ciborium::Value::Map(pairs) => Ok(pairs.len()),
            _ => Err(Error::new(ErrorKind::Shape, "an array or map")),
        }
    }

    /// Checks that an array holds exactly the given number of elements.
    pub fn check_arity(&self, arity: usize) -> Result<(), Error> {
        let len = self.as_array()?.len();

        if len != arity {
            return Err(Error::new(ErrorKind::Shape, "an array of fixed arity"));
        }

        Ok(())
    }

    /// Looks an entry of a map up by key equality.
    pub fn entry(&self, key: &ciborium::Value) -> Result<Option<&ciborium::Value>, Error> {
        let pairs = self.as_map()?;

        Ok(pairs.iter().find_map(|(k, v)| (k == key).then_some(v)))
    }

    /// Inserts an entry in a map, replacing the value of an existing key.
    pub fn insert(&mut self, key: ciborium::Value, value: ciborium::Value) -> Result<(), Error> {
        let pairs = self.as_map_mut()?;

        if let Some((_, v)) = pairs.iter_mut().find(|(k, _)| *k == key) {
            *v = value;

            return Ok(());
        }

        pairs.push((key, value));

        Ok(())
    }

    /// Returns the value as an unsigned integer.
    pub fn as_u64(&self) -> Result<u64, Error> {
        let integer = self
            .0
            .as_integer()
            .ok_or(Error::new(ErrorKind::Shape, "an unsigned integer"))?;

        u64::try_from(integer).map_err(|_| Error::new(ErrorKind::OutOfRange, "for a u64"))
    }

    /// Returns the value as a signed integer.
    pub fn as_i64(&self) -> Result<i64, Error> {
        let integer = self
            .0
            .as_integer()
            .ok_or(Error::new(ErrorKind::Shape, "an integer"))?;

        i64::try_from(integer).map_err(|_| Error::new(ErrorKind::OutOfRange, "for an i64"))
    }

    /// Returns the value as a byte string.
    pub fn as_bytes(&self) -> Result<&[u8], Error> {
        self.0
            .as_bytes()
            .map(Vec::as_slice)
            .ok_or(Error::new(ErrorKind::Shape, "a byte string"))
    }

    /// Returns the value as a text string.
    pub fn as_str(&self) -> Result<&str, Error> {
        self.0
            .as_text()
            .ok_or(Error::new(ErrorKind::Shape, "a text string"))
    }

    /// Returns the value as a boolean.
    pub fn as_bool(&self) -> Result<bool, Error> {
        self.0
            .as_bool()
            .ok_or(Error::new(ErrorKind::Shape, "a boolean"))
    }

    /// Returns the value as an array of elements.
    pub fn as_array(&self) -> Result<&Vec<ciborium::Value>, Error> {
        self.0
            .as_array()
            .ok_or(Error::new(ErrorKind::Shape, "an array"))
    }

    fn as_array_mut(&mut self) -> Result<&mut Vec<ciborium::Value>, Error> {
        self.0
            .as_array_mut()
            .ok_or(Error::new(ErrorKind::Shape, "an array"))
    }

    /// Returns the value as the pairs of a map.
    pub fn as_map(&self) -> Result<&Vec<(ciborium::Value, ciborium::Value)>, Error> {
        self.0.as_map().ok_or(Error::new(ErrorKind::Shape, "a map"))
    }

    fn as_map_mut(&mut self) -> Result<&mut Vec<(ciborium::Value, ciborium::Value)>, Error> {
        self.0
            .as_map_mut()
            .ok_or(Error::new(ErrorKind::Shape, "a map"))
    }

    /// Unwraps the inner CBOR item.
    pub fn into_inner(self) -> ciborium::Value {
        self.0
    }
}

impl From<ciborium::Value> for Value {
    fn from(value: ciborium::Value) -> Self {
        Self(value)
    }
}

impl From<Value> for ciborium::Value {
    fn from(value: Value) -> Self {
        value.0
    }
}
