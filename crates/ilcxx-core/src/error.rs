//! Errors raised while loading or querying metadata.

/// Metadata is assumed to come from a valid compiler, so every variant
/// indicates a defect in the input and is fatal to a translation.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary decode error: {0}")]
    Binary(#[from] postcard::Error),

    #[error("{what} #{index} does not exist")]
    Dangling { what: &'static str, index: u32 },

    #[error("unresolvable token 0x{0:08x}")]
    UnknownToken(u32),

    #[error("token 0x{token:08x} is not a {expected}")]
    TokenKind { token: u32, expected: &'static str },

    #[error("required type `{0}` is missing")]
    MissingWellKnown(String),

    #[error("no instantiation of `{method}` for <{arguments}>")]
    MissingInstantiation { method: String, arguments: String },

    #[error("`{ty}` has no member `{member}`")]
    MemberNotFound { ty: String, member: String },
}

/// Malformed bytecode encountered while decoding an instruction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("IL_{offset:04x}: truncated instruction")]
    Truncated { offset: usize },

    #[error("IL_{offset:04x}: unknown opcode 0x{code:02x}")]
    UnknownOpcode { offset: usize, code: u16 },

    #[error("IL_{offset:04x}: branch target outside the method body")]
    BadTarget { offset: usize },
}
