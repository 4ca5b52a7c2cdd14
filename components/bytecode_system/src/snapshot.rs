//! Snapshot serialization of compiled code.
//!
//! A snapshot is the on-disk form of a compiled-code blob: a fixed
//! header followed by one function section per blob, parents before
//! children. Function literals are stored as section indices, so
//! literal references across sections are section-relative and always
//! point forward. Multi-byte fields use the native byte order; the
//! header carries an endianness marker and the compact-pointer width so
//! that a loader on a mismatched runtime rejects the buffer instead of
//! misreading it.

use crate::code::{CodeFlags, CompiledCode, Declaration, Literal};
use std::fmt;
use std::rc::Rc;

/// Magic tag opening every snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"PJSS";
/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;
/// Endianness marker value; written natively, compared natively.
const ENDIAN_MARKER: u16 = 0x5AA5;
/// Compact-pointer width of this runtime in bytes.
const COMPACT_PTR_WIDTH: u8 = 2;

const LITERAL_TAG_NUMBER: u8 = 0;
const LITERAL_TAG_STRING: u8 = 1;
const LITERAL_TAG_FUNCTION: u8 = 2;

/// No-function-name sentinel in a section header.
const NO_NAME: u16 = u16::MAX;
/// No-function-literal sentinel in a declaration record.
const NO_FUNCTION: u16 = u16::MAX;

/// Errors produced by the snapshot loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The buffer is shorter than a well-formed snapshot.
    Truncated,
    /// The magic tag does not match.
    BadMagic,
    /// The version is not supported by this runtime.
    UnsupportedVersion(u32),
    /// The snapshot was produced on a runtime with different endianness.
    EndiannessMismatch,
    /// The snapshot was produced with a different compact-pointer width.
    PointerWidthMismatch(u8),
    /// A literal entry carries an unknown tag.
    BadLiteralTag(u8),
    /// A function literal references a section that does not exist or
    /// does not come after the referencing section.
    BadSectionReference,
    /// A string literal holds invalid UTF-8.
    BadStringEncoding,
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Truncated => write!(f, "snapshot buffer is truncated"),
            SnapshotError::BadMagic => write!(f, "not a snapshot (bad magic)"),
            SnapshotError::UnsupportedVersion(v) => {
                write!(f, "unsupported snapshot version {}", v)
            }
            SnapshotError::EndiannessMismatch => {
                write!(f, "snapshot endianness does not match this runtime")
            }
            SnapshotError::PointerWidthMismatch(w) => {
                write!(f, "snapshot compact-pointer width {} does not match", w)
            }
            SnapshotError::BadLiteralTag(tag) => write!(f, "unknown literal tag {}", tag),
            SnapshotError::BadSectionReference => write!(f, "invalid function section reference"),
            SnapshotError::BadStringEncoding => write!(f, "string literal is not valid UTF-8"),
        }
    }
}

/// Header summary returned by [`inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Format version.
    pub version: u32,
    /// Compact-pointer width in bytes.
    pub pointer_width: u8,
    /// True when the root section is global-scope code (false: eval).
    pub is_global: bool,
    /// Number of function sections.
    pub section_count: u32,
    /// Total snapshot size in bytes.
    pub total_size: usize,
}

/// Serializes a compiled-code blob into a snapshot buffer.
pub fn save(code: &CompiledCode) -> Vec<u8> {
    // Flatten the blob tree parent-first so function literals can be
    // encoded as forward section indices.
    let mut sections: Vec<&CompiledCode> = Vec::new();
    flatten(code, &mut sections);

    let mut out = Vec::new();
    out.extend_from_slice(&SNAPSHOT_MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_ne_bytes());
    out.extend_from_slice(&ENDIAN_MARKER.to_ne_bytes());
    out.push(COMPACT_PTR_WIDTH);
    out.push(if code.flags.contains(CodeFlags::GLOBAL_CODE) { 1 } else { 0 });
    out.extend_from_slice(&(sections.len() as u32).to_ne_bytes());

    for (index, section) in sections.iter().enumerate() {
        write_section(section, index, &sections, &mut out);
    }
    out
}

fn flatten<'a>(code: &'a CompiledCode, sections: &mut Vec<&'a CompiledCode>) {
    sections.push(code);
    for literal in &code.literals {
        if let Literal::Function(nested) = literal {
            flatten(nested, sections);
        }
    }
}

fn section_index_of(target: &CompiledCode, sections: &[&CompiledCode]) -> u32 {
    for (index, section) in sections.iter().enumerate() {
        if std::ptr::eq(*section, target) {
            return index as u32;
        }
    }
    unreachable!("nested blob missing from the flattened section list");
}

fn write_section(code: &CompiledCode, index: usize, sections: &[&CompiledCode], out: &mut Vec<u8>) {
    out.push(code.argument_count);
    out.push(0); // alignment pad
    out.extend_from_slice(&code.register_count.to_ne_bytes());
    out.extend_from_slice(&code.flags.bits().to_ne_bytes());
    out.extend_from_slice(&code.function_name.unwrap_or(NO_NAME).to_ne_bytes());
    out.extend_from_slice(&(code.literals.len() as u32).to_ne_bytes());
    out.extend_from_slice(&(code.parameters.len() as u32).to_ne_bytes());
    out.extend_from_slice(&(code.declarations.len() as u32).to_ne_bytes());
    out.extend_from_slice(&(code.code.len() as u32).to_ne_bytes());

    for literal in &code.literals {
        match literal {
            Literal::Number(n) => {
                out.push(LITERAL_TAG_NUMBER);
                out.extend_from_slice(&n.to_bits().to_ne_bytes());
            }
            Literal::String(s) => {
                out.push(LITERAL_TAG_STRING);
                out.extend_from_slice(&(s.len() as u32).to_ne_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Literal::Function(nested) => {
                let target = section_index_of(nested, sections);
                debug_assert!(target as usize > index);
                out.push(LITERAL_TAG_FUNCTION);
                out.extend_from_slice(&target.to_ne_bytes());
            }
        }
    }

    for parameter in &code.parameters {
        out.extend_from_slice(&parameter.to_ne_bytes());
    }

    for declaration in &code.declarations {
        out.extend_from_slice(&declaration.name.to_ne_bytes());
        out.extend_from_slice(&declaration.function.unwrap_or(NO_FUNCTION).to_ne_bytes());
    }

    out.extend_from_slice(&code.code);
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self.offset.checked_add(len).ok_or(SnapshotError::Truncated)?;
        if end > self.bytes.len() {
            return Err(SnapshotError::Truncated);
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SnapshotError> {
        let raw = self.take(2)?;
        Ok(u16::from_ne_bytes([raw[0], raw[1]]))
    }

    fn u32(&mut self) -> Result<u32, SnapshotError> {
        let raw = self.take(4)?;
        Ok(u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self) -> Result<u64, SnapshotError> {
        let raw = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(u64::from_ne_bytes(bytes))
    }
}

fn read_header(reader: &mut Reader<'_>) -> Result<(u32, bool, u32), SnapshotError> {
    if reader.take(4)? != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = reader.u32()?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    if reader.u16()? != ENDIAN_MARKER {
        return Err(SnapshotError::EndiannessMismatch);
    }
    let width = reader.u8()?;
    if width != COMPACT_PTR_WIDTH {
        return Err(SnapshotError::PointerWidthMismatch(width));
    }
    let is_global = reader.u8()? != 0;
    let section_count = reader.u32()?;
    Ok((version, is_global, section_count))
}

/// Reads the snapshot header without materializing the sections.
pub fn inspect(bytes: &[u8]) -> Result<SnapshotInfo, SnapshotError> {
    let mut reader = Reader { bytes, offset: 0 };
    let (version, is_global, section_count) = read_header(&mut reader)?;
    Ok(SnapshotInfo {
        version,
        pointer_width: COMPACT_PTR_WIDTH,
        is_global,
        section_count,
        total_size: bytes.len(),
    })
}

/// Intermediate section with unresolved function references.
struct RawSection {
    code: CompiledCode,
    function_refs: Vec<(usize, u32)>,
}

/// Loads a snapshot buffer back into a compiled-code blob.
pub fn load(bytes: &[u8]) -> Result<CompiledCode, SnapshotError> {
    let mut reader = Reader { bytes, offset: 0 };
    let (_, _, section_count) = read_header(&mut reader)?;

    let mut raw_sections = Vec::with_capacity(section_count as usize);
    for _ in 0..section_count {
        raw_sections.push(read_section(&mut reader)?);
    }

    // Function literals always reference later sections, so resolving
    // back to front sees every child fully built.
    let mut resolved: Vec<Option<Rc<CompiledCode>>> = vec![None; raw_sections.len()];
    for index in (0..raw_sections.len()).rev() {
        let raw = &raw_sections[index];
        let mut code = raw.code.clone();
        for &(literal_index, target) in &raw.function_refs {
            if target as usize <= index || target as usize >= raw_sections.len() {
                return Err(SnapshotError::BadSectionReference);
            }
            let nested = resolved[target as usize]
                .clone()
                .ok_or(SnapshotError::BadSectionReference)?;
            code.literals[literal_index] = Literal::Function(nested);
        }
        resolved[index] = Some(Rc::new(code));
    }

    let root = resolved
        .into_iter()
        .next()
        .flatten()
        .ok_or(SnapshotError::Truncated)?;
    Ok(Rc::try_unwrap(root).unwrap_or_else(|rc| (*rc).clone()))
}

fn read_section(reader: &mut Reader<'_>) -> Result<RawSection, SnapshotError> {
    let argument_count = reader.u8()?;
    let _pad = reader.u8()?;
    let register_count = reader.u16()?;
    let flags = CodeFlags::from_bits(reader.u16()?);
    let name = reader.u16()?;
    let literal_count = reader.u32()? as usize;
    let parameter_count = reader.u32()? as usize;
    let declaration_count = reader.u32()? as usize;
    let code_len = reader.u32()? as usize;

    let mut literals = Vec::with_capacity(literal_count);
    let mut function_refs = Vec::new();
    for literal_index in 0..literal_count {
        match reader.u8()? {
            LITERAL_TAG_NUMBER => {
                literals.push(Literal::Number(f64::from_bits(reader.u64()?)));
            }
            LITERAL_TAG_STRING => {
                let len = reader.u32()? as usize;
                let raw = reader.take(len)?;
                let text = std::str::from_utf8(raw)
                    .map_err(|_| SnapshotError::BadStringEncoding)?;
                literals.push(Literal::String(text.into()));
            }
            LITERAL_TAG_FUNCTION => {
                let target = reader.u32()?;
                function_refs.push((literal_index, target));
                // Placeholder until the back-to-front resolve pass.
                literals.push(Literal::Number(0.0));
            }
            tag => return Err(SnapshotError::BadLiteralTag(tag)),
        }
    }

    let mut parameters = Vec::with_capacity(parameter_count);
    for _ in 0..parameter_count {
        parameters.push(reader.u16()?);
    }

    let mut declarations = Vec::with_capacity(declaration_count);
    for _ in 0..declaration_count {
        let name = reader.u16()?;
        let function = match reader.u16()? {
            NO_FUNCTION => None,
            idx => Some(idx),
        };
        declarations.push(Declaration { name, function });
    }

    let code_bytes = reader.take(code_len)?.to_vec();

    Ok(RawSection {
        code: CompiledCode {
            argument_count,
            register_count,
            flags,
            function_name: if name == NO_NAME { None } else { Some(name) },
            literals,
            parameters,
            declarations,
            code: code_bytes,
        },
        function_refs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{BinaryOp, Opcode};

    fn sample_code() -> CompiledCode {
        let mut inner = CompiledCode::new();
        inner.argument_count = 1;
        inner.register_count = 2;
        inner.flags.insert(CodeFlags::STRICT);
        inner.literals.push(Literal::String("a".into()));
        inner.parameters.push(0);
        inner.code = vec![Opcode::PushNumber1.to_byte(), Opcode::ReturnValue.to_byte()];

        let mut outer = CompiledCode::new();
        outer.register_count = 3;
        outer.flags.insert(CodeFlags::GLOBAL_CODE | CodeFlags::HAS_DECLARATIONS);
        outer.literals.push(Literal::Number(3.25));
        outer.literals.push(Literal::String("answer".into()));
        outer.literals.push(Literal::Function(Rc::new(inner)));
        outer.declarations.push(Declaration {
            name: 1,
            function: Some(2),
        });
        outer.code = vec![
            Opcode::BinaryWithTwoLiterals(BinaryOp::Add).to_byte(),
            0,
            0,
            Opcode::ReturnValue.to_byte(),
        ];
        outer
    }

    #[test]
    fn test_save_load_round_trip() {
        let code = sample_code();
        let bytes = save(&code);
        let restored = load(&bytes).unwrap();
        assert_eq!(restored, code);
    }

    #[test]
    fn test_inspect() {
        let code = sample_code();
        let bytes = save(&code);
        let info = inspect(&bytes).unwrap();
        assert_eq!(info.version, SNAPSHOT_VERSION);
        assert_eq!(info.section_count, 2);
        assert!(info.is_global);
        assert_eq!(info.total_size, bytes.len());
    }

    #[test]
    fn test_reject_bad_magic() {
        let mut bytes = save(&sample_code());
        bytes[0] = b'X';
        assert_eq!(load(&bytes), Err(SnapshotError::BadMagic));
    }

    #[test]
    fn test_reject_bad_version() {
        let mut bytes = save(&sample_code());
        bytes[4] = 0xEE;
        assert!(matches!(
            load(&bytes),
            Err(SnapshotError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_reject_endianness_mismatch() {
        let mut bytes = save(&sample_code());
        // Swap the marker bytes to simulate a foreign-endian producer.
        bytes.swap(8, 9);
        assert_eq!(load(&bytes), Err(SnapshotError::EndiannessMismatch));
    }

    #[test]
    fn test_reject_pointer_width_mismatch() {
        let mut bytes = save(&sample_code());
        bytes[10] = 4;
        assert_eq!(load(&bytes), Err(SnapshotError::PointerWidthMismatch(4)));
    }

    #[test]
    fn test_reject_truncated() {
        let bytes = save(&sample_code());
        for cut in [3, 11, bytes.len() - 1] {
            assert!(load(&bytes[..cut]).is_err());
        }
    }
}
