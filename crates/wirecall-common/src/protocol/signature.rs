// Copyright 2025 Wirecall Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Method signatures.
//!
//! A signature is the compact string a request carries instead of type
//! metadata: the method name followed by its parameter type codes, for
//! example `add(JJ)` or `echo(Lstring;)`. The return type is not part of it.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{Result, WirecallError};

/// Type code of a single parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Unit,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Char,
    Array(Box<TypeCode>),
    Optional(Box<TypeCode>),
    /// Reference type, written `L<name>;`
    Named(Cow<'static, str>),
}

impl TypeCode {
    /// Convenience constructor for a named reference type.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        TypeCode::Named(name.into())
    }

    fn encode_into(&self, out: &mut String) {
        match self {
            TypeCode::Unit => out.push('V'),
            TypeCode::Bool => out.push('Z'),
            TypeCode::I8 => out.push('B'),
            TypeCode::I16 => out.push('S'),
            TypeCode::I32 => out.push('I'),
            TypeCode::I64 => out.push('J'),
            TypeCode::U8 => out.push('b'),
            TypeCode::U16 => out.push('s'),
            TypeCode::U32 => out.push('i'),
            TypeCode::U64 => out.push('j'),
            TypeCode::F32 => out.push('F'),
            TypeCode::F64 => out.push('D'),
            TypeCode::Char => out.push('C'),
            TypeCode::Array(inner) => {
                out.push('[');
                inner.encode_into(out);
            }
            TypeCode::Optional(inner) => {
                out.push('?');
                inner.encode_into(out);
            }
            TypeCode::Named(name) => {
                out.push('L');
                out.push_str(name);
                out.push(';');
            }
        }
    }

    fn parse(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<Self> {
        let code = chars
            .next()
            .ok_or_else(|| WirecallError::InvalidSignature("missing type code".to_string()))?;
        Ok(match code {
            'V' => TypeCode::Unit,
            'Z' => TypeCode::Bool,
            'B' => TypeCode::I8,
            'S' => TypeCode::I16,
            'I' => TypeCode::I32,
            'J' => TypeCode::I64,
            'b' => TypeCode::U8,
            's' => TypeCode::U16,
            'i' => TypeCode::U32,
            'j' => TypeCode::U64,
            'F' => TypeCode::F32,
            'D' => TypeCode::F64,
            'C' => TypeCode::Char,
            '[' => TypeCode::Array(Box::new(Self::parse(chars)?)),
            '?' => TypeCode::Optional(Box::new(Self::parse(chars)?)),
            'L' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(';') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(WirecallError::InvalidSignature(format!(
                                "unterminated reference type L{}",
                                name
                            )))
                        }
                    }
                }
                if name.is_empty() {
                    return Err(WirecallError::InvalidSignature(
                        "empty reference type name".to_string(),
                    ));
                }
                TypeCode::Named(Cow::Owned(name))
            }
            other => {
                return Err(WirecallError::InvalidSignature(format!(
                    "unknown type code '{}'",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.encode_into(&mut out);
        f.write_str(&out)
    }
}

/// A type that can appear as a method parameter.
///
/// Implemented for primitives, `String`, sequences and optionals. Application
/// types declare their reference name with [`wire_type!`](crate::wire_type).
pub trait WireType {
    fn type_code() -> TypeCode;
}

macro_rules! primitive_wire_type {
    ($($ty:ty => $code:expr),* $(,)?) => {
        $(
            impl WireType for $ty {
                fn type_code() -> TypeCode {
                    $code
                }
            }
        )*
    };
}

primitive_wire_type! {
    () => TypeCode::Unit,
    bool => TypeCode::Bool,
    i8 => TypeCode::I8,
    i16 => TypeCode::I16,
    i32 => TypeCode::I32,
    i64 => TypeCode::I64,
    u8 => TypeCode::U8,
    u16 => TypeCode::U16,
    u32 => TypeCode::U32,
    u64 => TypeCode::U64,
    f32 => TypeCode::F32,
    f64 => TypeCode::F64,
    char => TypeCode::Char,
    String => TypeCode::Named(Cow::Borrowed("string")),
    serde_json::Value => TypeCode::Named(Cow::Borrowed("json")),
}

impl<T: WireType> WireType for Vec<T> {
    fn type_code() -> TypeCode {
        TypeCode::Array(Box::new(T::type_code()))
    }
}

impl<T: WireType> WireType for Option<T> {
    fn type_code() -> TypeCode {
        TypeCode::Optional(Box::new(T::type_code()))
    }
}

impl<K, V, S> WireType for HashMap<K, V, S> {
    fn type_code() -> TypeCode {
        TypeCode::Named(Cow::Borrowed("map"))
    }
}

impl<K, V> WireType for BTreeMap<K, V> {
    fn type_code() -> TypeCode {
        TypeCode::Named(Cow::Borrowed("map"))
    }
}

/// Declares the reference name of an application type.
///
/// ```
/// use wirecall_common::protocol::signature::{TypeCode, WireType};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Point { x: i32, y: i32 }
///
/// wirecall_common::wire_type!(Point => "geo.Point");
///
/// assert_eq!(Point::type_code(), TypeCode::named("geo.Point"));
/// ```
#[macro_export]
macro_rules! wire_type {
    ($ty:ty => $name:expr) => {
        impl $crate::protocol::signature::WireType for $ty {
            fn type_code() -> $crate::protocol::signature::TypeCode {
                $crate::protocol::signature::TypeCode::named($name)
            }
        }
    };
}

/// The full argument list of a method, as a tuple.
///
/// Arguments travel as a serialized tuple, so `(String,)` carries one
/// string and `()` carries none.
pub trait WireArgs: Serialize + DeserializeOwned {
    fn param_types() -> Vec<TypeCode>;
}

impl WireArgs for () {
    fn param_types() -> Vec<TypeCode> {
        Vec::new()
    }
}

macro_rules! tuple_wire_args {
    ($($name:ident),+) => {
        impl<$($name),+> WireArgs for ($($name,)+)
        where
            $($name: WireType + Serialize + DeserializeOwned),+
        {
            fn param_types() -> Vec<TypeCode> {
                vec![$($name::type_code()),+]
            }
        }
    };
}

tuple_wire_args!(A);
tuple_wire_args!(A, B);
tuple_wire_args!(A, B, C);
tuple_wire_args!(A, B, C, D);
tuple_wire_args!(A, B, C, D, E);
tuple_wire_args!(A, B, C, D, E, F);
tuple_wire_args!(A, B, C, D, E, F, G);
tuple_wire_args!(A, B, C, D, E, F, G, H);

/// Canonical method identity: name plus parameter type codes.
///
/// Two methods with the same name and parameter types produce the same
/// signature regardless of their return types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    name_len: usize,
    encoded: String,
}

impl MethodSignature {
    /// Builds a signature from a name and explicit parameter codes.
    pub fn new(name: &str, params: &[TypeCode]) -> Self {
        let mut encoded = String::with_capacity(name.len() + 2 + params.len());
        encoded.push_str(name);
        encoded.push('(');
        for param in params {
            param.encode_into(&mut encoded);
        }
        encoded.push(')');
        Self {
            name_len: name.len(),
            encoded,
        }
    }

    /// Builds the signature of a method taking the argument tuple `A`.
    pub fn of<A: WireArgs>(name: &str) -> Self {
        Self::new(name, &A::param_types())
    }

    /// Parses and validates an encoded signature.
    pub fn parse(encoded: &str) -> Result<Self> {
        let open = encoded
            .find('(')
            .ok_or_else(|| WirecallError::InvalidSignature(encoded.to_string()))?;
        if open == 0 || !encoded.ends_with(')') {
            return Err(WirecallError::InvalidSignature(encoded.to_string()));
        }
        let body = &encoded[open + 1..encoded.len() - 1];
        let mut chars = body.chars().peekable();
        while chars.peek().is_some() {
            TypeCode::parse(&mut chars)?;
        }
        Ok(Self {
            name_len: open,
            encoded: encoded.to_string(),
        })
    }

    /// Method name without parameter codes.
    pub fn name(&self) -> &str {
        &self.encoded[..self.name_len]
    }

    /// Decodes the parameter type codes.
    pub fn params(&self) -> Result<Vec<TypeCode>> {
        let body = &self.encoded[self.name_len + 1..self.encoded.len() - 1];
        let mut chars = body.chars().peekable();
        let mut params = Vec::new();
        while chars.peek().is_some() {
            params.push(TypeCode::parse(&mut chars)?);
        }
        Ok(params)
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Raw bytes, as carried in a request frame.
    pub fn as_bytes(&self) -> &[u8] {
        self.encoded.as_bytes()
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}
