//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro for integer keys issued by the database and
//! `define_string_id!` for opaque string keys issued by clients or the
//! catalog. Both prevent accidentally mixing IDs from different entity types.

use thiserror::Error;

/// Macro to define a type-safe integer ID wrapper.
///
/// Creates a newtype wrapper around `i32` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `Ord`
/// - Conversion methods: `new()`, `as_i32()`
/// - `From<i32>` and `Into<i32>` implementations
/// - `sqlx` `Type`, `Encode`, and `Decode` implementations (with `postgres` feature)
///
/// # Example
///
/// ```rust
/// # use merkato_core::define_id;
/// define_id!(UserId);
/// define_id!(CartId);
///
/// let user_id = UserId::new(1);
/// let cart_id = CartId::new(1);
///
/// // These are different types, so this won't compile:
/// // let _: UserId = cart_id;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            /// Create a new ID from an i32 value.
            #[must_use]
            pub const fn new(id: i32) -> Self {
                Self(id)
            }

            /// Get the underlying i32 value.
            #[must_use]
            pub const fn as_i32(&self) -> i32 {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i32> for $name {
            fn from(id: i32) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <i32 as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <i32 as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        #[cfg(feature = "postgres")]
        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(
                value: ::sqlx::postgres::PgValueRef<'r>,
            ) -> ::core::result::Result<Self, ::sqlx::error::BoxDynError> {
                let id = <i32 as ::sqlx::Decode<::sqlx::Postgres>>::decode(value)?;
                Ok(Self(id))
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Encode<'_, ::sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut ::sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
                <i32 as ::sqlx::Encode<::sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

/// Errors that can occur when parsing a string ID.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input string is empty.
    #[error("id cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("id must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains a character outside the allowed set.
    #[error("id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Macro to define a validated string ID wrapper.
///
/// The generated type:
/// - rejects empty input, input longer than `max`, and characters for which
///   `allowed` returns false
/// - (de)serializes as a plain JSON string, validating on the way in
/// - encodes as `TEXT` in `PostgreSQL` (with the `postgres` feature)
#[macro_export]
macro_rules! define_string_id {
    ($(#[$meta:meta])* $name:ident, max = $max:expr, allowed = $allowed:expr) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Maximum length in characters.
            pub const MAX_LENGTH: usize = $max;

            /// Parse and validate an ID.
            ///
            /// # Errors
            ///
            /// Returns an error if the input is empty, too long, or contains
            /// a disallowed character.
            pub fn parse(s: &str) -> ::core::result::Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }
                if s.chars().count() > Self::MAX_LENGTH {
                    return Err($crate::IdError::TooLong {
                        max: Self::MAX_LENGTH,
                    });
                }
                let allowed: fn(char) -> bool = $allowed;
                if let Some(c) = s.chars().find(|c| !allowed(*c)) {
                    return Err($crate::IdError::InvalidCharacter(c));
                }
                Ok(Self(s.to_owned()))
            }

            /// Returns the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the ID and returns its inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::IdError;

            fn try_from(s: String) -> ::core::result::Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <String as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <String as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        #[cfg(feature = "postgres")]
        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(
                value: ::sqlx::postgres::PgValueRef<'r>,
            ) -> ::core::result::Result<Self, ::sqlx::error::BoxDynError> {
                let s = <String as ::sqlx::Decode<::sqlx::Postgres>>::decode(value)?;
                Ok(Self::parse(&s)?)
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Encode<'_, ::sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut ::sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
                <String as ::sqlx::Encode<::sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

// Integer keys issued by the database
define_id!(UserId);
define_id!(CartId);

define_string_id!(
    /// Catalog product identifier.
    ///
    /// Opaque to this crate; the catalog decides what a valid product is. We
    /// only require a short string without whitespace or control characters.
    ProductId,
    max = 64,
    allowed = |c| !c.is_whitespace() && !c.is_control()
);

define_string_id!(
    /// Client-generated key of an unauthenticated shopper's cart.
    ///
    /// URL-safe so it can travel in query strings unescaped.
    AnonymousId,
    max = 128,
    allowed = |c| c.is_ascii_alphanumeric() || c == '-' || c == '_'
);
