// Binary chunk reader for pre-compiled Lua 5.1 (luac) images
// Header declares endianness and scalar widths; everything after honors them

use super::{Chunk, LocVar, LuaString, LuaValue};
use std::fmt;
use std::rc::Rc;

pub const LUAC_SIGNATURE: [u8; 4] = [0x1B, 0x4C, 0x75, 0x61];
pub const LUAC_VERSION: u8 = 0x51;
pub const LUAC_FORMAT: u8 = 0;

// constant-pool tags
const TAG_NIL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;

/// Failure while materialising a chunk. Strictly distinct from runtime
/// errors: nothing of a malformed image ever reaches the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkFormatError {
    BadSignature,
    UnsupportedVersion(u8),
    UnsupportedFormat(u8),
    BadEndianness(u8),
    UnsupportedSize { field: &'static str, size: u8 },
    UnknownConstantTag(u8),
    Truncated,
}

impl fmt::Display for ChunkFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkFormatError::BadSignature => write!(f, "not a precompiled Lua chunk"),
            ChunkFormatError::UnsupportedVersion(v) => {
                write!(f, "unsupported bytecode version {:#x} (want 0x51)", v)
            }
            ChunkFormatError::UnsupportedFormat(v) => write!(f, "unsupported chunk format {}", v),
            ChunkFormatError::BadEndianness(v) => write!(f, "bad endianness flag {}", v),
            ChunkFormatError::UnsupportedSize { field, size } => {
                write!(f, "unsupported {} size {}", field, size)
            }
            ChunkFormatError::UnknownConstantTag(t) => write!(f, "unknown constant tag {}", t),
            ChunkFormatError::Truncated => write!(f, "truncated chunk"),
        }
    }
}

impl std::error::Error for ChunkFormatError {}

type ReadResult<T> = Result<T, ChunkFormatError>;

struct ChunkHeader {
    little_endian: bool,
    int_size: u8,
    size_t_size: u8,
    instr_size: u8,
    number_size: u8,
    integral_numbers: bool,
}

struct ChunkReader<'a> {
    data: &'a [u8],
    pos: usize,
    header: ChunkHeader,
}

/// Read a complete `.luac` image into its top-level prototype
pub fn read_chunk(data: &[u8]) -> ReadResult<Chunk> {
    let mut reader = ChunkReader::new(data)?;
    reader.read_proto()
}

impl<'a> ChunkReader<'a> {
    fn new(data: &'a [u8]) -> ReadResult<Self> {
        let mut reader = ChunkReader {
            data,
            pos: 0,
            header: ChunkHeader {
                little_endian: true,
                int_size: 4,
                size_t_size: 4,
                instr_size: 4,
                number_size: 8,
                integral_numbers: false,
            },
        };
        reader.read_header()?;
        Ok(reader)
    }

    fn read_header(&mut self) -> ReadResult<()> {
        let signature = self.read_exact(4)?;
        if signature != &LUAC_SIGNATURE[..] {
            return Err(ChunkFormatError::BadSignature);
        }
        let version = self.read_u8()?;
        if version != LUAC_VERSION {
            return Err(ChunkFormatError::UnsupportedVersion(version));
        }
        let format = self.read_u8()?;
        if format != LUAC_FORMAT {
            return Err(ChunkFormatError::UnsupportedFormat(format));
        }
        self.header.little_endian = match self.read_u8()? {
            0 => false,
            1 => true,
            other => return Err(ChunkFormatError::BadEndianness(other)),
        };
        self.header.int_size = self.read_scalar_size("int", &[4, 8])?;
        self.header.size_t_size = self.read_scalar_size("size_t", &[4, 8])?;
        self.header.instr_size = self.read_scalar_size("instruction", &[4])?;
        self.header.number_size = self.read_scalar_size("number", &[4, 8])?;
        self.header.integral_numbers = match self.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(ChunkFormatError::UnsupportedSize {
                    field: "integral flag",
                    size: other,
                });
            }
        };
        Ok(())
    }

    fn read_scalar_size(&mut self, field: &'static str, accepted: &[u8]) -> ReadResult<u8> {
        let size = self.read_u8()?;
        if accepted.contains(&size) {
            Ok(size)
        } else {
            Err(ChunkFormatError::UnsupportedSize { field, size })
        }
    }

    // ---- primitive reads, all honoring the header ----

    fn read_u8(&mut self) -> ReadResult<u8> {
        let b = *self.data.get(self.pos).ok_or(ChunkFormatError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_exact(&mut self, n: usize) -> ReadResult<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(ChunkFormatError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_uint(&mut self, size: u8) -> ReadResult<u64> {
        let bytes = self.read_exact(size as usize)?;
        let mut value: u64 = 0;
        if self.header.little_endian {
            for &b in bytes.iter().rev() {
                value = (value << 8) | b as u64;
            }
        } else {
            for &b in bytes {
                value = (value << 8) | b as u64;
            }
        }
        Ok(value)
    }

    fn read_int(&mut self) -> ReadResult<i64> {
        let raw = self.read_uint(self.header.int_size)?;
        Ok(if self.header.int_size == 4 {
            raw as u32 as i32 as i64
        } else {
            raw as i64
        })
    }

    /// A length-like int field; negative values are malformed
    fn read_count(&mut self) -> ReadResult<usize> {
        let n = self.read_int()?;
        if n < 0 {
            return Err(ChunkFormatError::Truncated);
        }
        let n = n as usize;
        // no element is smaller than a byte, so this bounds every list
        if n > self.data.len() - self.pos {
            return Err(ChunkFormatError::Truncated);
        }
        Ok(n)
    }

    fn read_size_t(&mut self) -> ReadResult<u64> {
        self.read_uint(self.header.size_t_size)
    }

    fn read_number(&mut self) -> ReadResult<f64> {
        let raw = self.read_uint(self.header.number_size)?;
        Ok(match (self.header.integral_numbers, self.header.number_size) {
            (false, 4) => f32::from_bits(raw as u32) as f64,
            (false, _) => f64::from_bits(raw),
            (true, 4) => raw as u32 as i32 as f64,
            (true, _) => (raw as i64) as f64,
        })
    }

    /// Length-prefixed string; length 0 denotes an absent value, otherwise
    /// the payload is length-1 bytes followed by a NUL.
    fn read_lua_string(&mut self) -> ReadResult<Option<Vec<u8>>> {
        let len = self.read_size_t()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let bytes = self.read_exact(len)?;
        Ok(Some(bytes[..len - 1].to_vec()))
    }

    fn read_constant(&mut self) -> ReadResult<LuaValue> {
        let tag = self.read_u8()?;
        match tag {
            TAG_NIL => Ok(LuaValue::Nil),
            TAG_BOOLEAN => Ok(LuaValue::Boolean(self.read_u8()? != 0)),
            TAG_NUMBER => Ok(LuaValue::Number(self.read_number()?)),
            TAG_STRING => {
                let bytes = self.read_lua_string()?.unwrap_or_default();
                Ok(LuaValue::String(Rc::new(LuaString::new(bytes))))
            }
            other => Err(ChunkFormatError::UnknownConstantTag(other)),
        }
    }

    fn read_proto(&mut self) -> ReadResult<Chunk> {
        let source_name = self.read_lua_string()?.map(|bytes| {
            let name = String::from_utf8_lossy(&bytes).into_owned();
            // strip the compiler's @file / =name display marker
            match name.strip_prefix(['@', '=']) {
                Some(stripped) => stripped.to_string(),
                None => name,
            }
        });
        let line_defined = self.read_int()? as u32;
        let last_line_defined = self.read_int()? as u32;
        let upvalue_count = self.read_u8()?;
        let param_count = self.read_u8()?;
        let vararg_flags = self.read_u8()?;
        let max_stack_size = self.read_u8()?;

        let code_len = self.read_count()?;
        let mut code = Vec::with_capacity(code_len);
        for _ in 0..code_len {
            code.push(self.read_uint(self.header.instr_size)? as u32);
        }

        let constant_count = self.read_count()?;
        let mut constants = Vec::with_capacity(constant_count);
        for _ in 0..constant_count {
            constants.push(self.read_constant()?);
        }

        let proto_count = self.read_count()?;
        let mut child_protos = Vec::with_capacity(proto_count);
        for _ in 0..proto_count {
            child_protos.push(Rc::new(self.read_proto()?));
        }

        let line_count = self.read_count()?;
        let mut line_info = Vec::with_capacity(line_count);
        for _ in 0..line_count {
            line_info.push(self.read_int()? as u32);
        }

        let local_count = self.read_count()?;
        let mut locals = Vec::with_capacity(local_count);
        for _ in 0..local_count {
            let name = self.read_lua_string()?.unwrap_or_default();
            let start_pc = self.read_int()? as u32;
            let end_pc = self.read_int()? as u32;
            locals.push(LocVar {
                name: Rc::new(LuaString::new(name)),
                start_pc,
                end_pc,
            });
        }

        let upvalue_name_count = self.read_count()?;
        let mut upvalue_names = Vec::with_capacity(upvalue_name_count);
        for _ in 0..upvalue_name_count {
            let name = self.read_lua_string()?.unwrap_or_default();
            upvalue_names.push(Rc::new(LuaString::new(name)));
        }

        Ok(Chunk {
            source_name,
            line_defined,
            last_line_defined,
            upvalue_count,
            param_count,
            // bit 1 of the flag byte is LUA_VARARG_ISVARARG
            is_vararg: vararg_flags & 2 != 0,
            max_stack_size,
            code,
            constants,
            child_protos,
            line_info,
            locals,
            upvalue_names,
        })
    }
}
