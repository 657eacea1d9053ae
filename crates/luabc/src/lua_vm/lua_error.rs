use crate::lua_value::chunk_reader::ChunkFormatError;

/// Lightweight error token - only 1 byte.
/// The actual message lives on the VM to keep Result small.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    /// Runtime error - message stored in the VM
    RuntimeError,
    /// Coroutine yield - values stored in the yielding thread
    Yield,
    /// Call depth limit exceeded
    StackOverflow,
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaError::RuntimeError => write!(f, "runtime error"),
            LuaError::Yield => write!(f, "coroutine yield"),
            LuaError::StackOverflow => write!(f, "stack overflow"),
        }
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;

/// Which side of the load/run boundary an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaErrorKind {
    /// Malformed chunk image, raised by the reader before execution
    Format,
    /// Error raised during execution
    Runtime,
}

/// Error with its message attached, for the embedding surface.
///
/// Implements `Display` and `std::error::Error`, so it composes with `?`
/// and the usual error-handling crates.
#[derive(Debug, Clone)]
pub struct LuaFullError {
    pub kind: LuaErrorKind,
    pub message: String,
}

impl LuaFullError {
    pub fn from_format(e: ChunkFormatError) -> Self {
        LuaFullError {
            kind: LuaErrorKind::Format,
            message: e.to_string(),
        }
    }

    #[inline]
    pub fn kind(&self) -> LuaErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for LuaFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LuaFullError {}
