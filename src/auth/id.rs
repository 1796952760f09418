//! Validated names for realms and IAM clients.
//!
//! Both end up as URL path segments and query values on the admin API, so they are checked
//! once at the edge and carried as newtypes afterwards.

// self
use crate::_prelude::*;

/// Longest name accepted, counted in characters.
pub const MAX_IDENTIFIER_CHARS: usize = 255;

/// Error returned when a realm or client name fails validation.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentifierError {
	/// The name was empty.
	#[error("{kind} name cannot be empty.")]
	Empty {
		/// Which name was rejected.
		kind: &'static str,
	},
	/// The name contains whitespace at the reported character offset.
	#[error("{kind} name contains whitespace at position {position}.")]
	Whitespace {
		/// Which name was rejected.
		kind: &'static str,
		/// Character offset of the first whitespace.
		position: usize,
	},
	/// The name is longer than [`MAX_IDENTIFIER_CHARS`].
	#[error(
		"{kind} name is {length} characters long; the limit is {max}.",
		max = MAX_IDENTIFIER_CHARS
	)]
	TooLong {
		/// Which name was rejected.
		kind: &'static str,
		/// Character count of the rejected name.
		length: usize,
	},
}

macro_rules! name_type {
	($(#[$meta:meta])* $name:ident => $kind:literal) => {
		$(#[$meta])*
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates `value` and wraps it.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				Self::try_from(value.into())
			}

			/// Borrows the name.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				check($kind, &value).map(|()| Self(value))
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, "{}({:?})", stringify!($name), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

name_type! {
	/// Tenant namespace on the IAM server.
	RealmId => "Realm"
}
name_type! {
	/// Public `clientId` of an OAuth 2.0 application registration.
	ClientId => "Client"
}

fn check(kind: &'static str, value: &str) -> Result<(), IdentifierError> {
	if value.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if let Some(position) = value.chars().position(char::is_whitespace) {
		return Err(IdentifierError::Whitespace { kind, position });
	}

	let length = value.chars().count();

	if length > MAX_IDENTIFIER_CHARS {
		return Err(IdentifierError::TooLong { kind, length });
	}

	Ok(())
}
