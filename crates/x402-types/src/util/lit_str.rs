//! Zero-sized marker types that serialize as, and compare equal to, a fixed string literal.
//!
//! Used for scheme identifiers (`"exact"`, `"upto"`) so they can be threaded through
//! generic wire types as compile-time constants instead of runtime `String` values.

/// Declares a unit struct `$name` that behaves like the string literal `$value`:
/// it serializes/deserializes as that string, rejecting any other value, and
/// implements `AsRef<str>`/`Display`/`FromStr` against it.
#[macro_export]
macro_rules! lit_str {
    ($name:ident, $value:literal) => {
        #[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
        pub struct $name;

        impl $name {
            /// The string literal this marker type represents.
            pub const VALUE: &'static str = $value;
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                Self::VALUE
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", Self::VALUE)
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s == Self::VALUE {
                    Ok(Self)
                } else {
                    Err(format!("expected \"{}\", got \"{}\"", Self::VALUE, s))
                }
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                other == Self::VALUE
            }
        }

        impl PartialEq<$name> for str {
            fn eq(&self, _other: &$name) -> bool {
                self == $name::VALUE
            }
        }

        impl PartialEq<String> for $name {
            fn eq(&self, other: &String) -> bool {
                other.as_str() == Self::VALUE
            }
        }

        impl PartialEq<$name> for String {
            fn eq(&self, _other: &$name) -> bool {
                self.as_str() == $name::VALUE
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(Self::VALUE)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                if s == Self::VALUE {
                    Ok(Self)
                } else {
                    Err(serde::de::Error::custom(format!(
                        "expected \"{}\", got \"{}\"",
                        Self::VALUE,
                        s
                    )))
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    lit_str!(TestScheme, "test");

    #[test]
    fn round_trips_through_json() {
        let json = serde_json::to_string(&TestScheme).unwrap();
        assert_eq!(json, "\"test\"");
        let parsed: TestScheme = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TestScheme);
    }

    #[test]
    fn rejects_mismatched_literal() {
        let err = serde_json::from_str::<TestScheme>("\"other\"");
        assert!(err.is_err());
    }

    #[test]
    fn compares_against_str_and_string() {
        assert_eq!(TestScheme.as_ref(), "test");
        assert_eq!(TestScheme.to_string(), "test".to_string());
        assert_eq!(TestScheme, TestScheme);
    }
}
