//! Arena handles for metadata entities.
//!
//! Handles are plain indices into the arenas owned by [`crate::Metadata`].
//! They are ordered by insertion order, which is also the order the
//! entities appear in the input document.

use serde::{Deserialize, Serialize};

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Raw index for serialization/debugging.
            #[inline]
            pub fn as_u32(self) -> u32 {
                self.0
            }

            /// Create a handle from a raw index. Use only for deserialization.
            #[inline]
            pub fn from_raw(index: u32) -> Self {
                Self(index)
            }

            #[inline]
            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Handle to a [`crate::TypeDef`].
    TypeId
);
arena_id!(
    /// Handle to a [`crate::FieldDef`].
    FieldId
);
arena_id!(
    /// Handle to a [`crate::MethodDef`].
    MethodId
);
