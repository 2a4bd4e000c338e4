//! Minimal ELF32 executable images, written directly to bytes.
//!
//! An image is a file header, two loadable program headers (text and data),
//! and the raw segment bytes, in that order. There is no section header
//! table: the loader only reads segments. This path is independent of the
//! textual assembler output; it exists for pre-assembled bytes.

use crate::backend::CodegenError;

/// Page size assumed when searching for segment alignment
pub const PAGE_SIZE: u32 = 0x1000;

/// Size of the ELF32 file header (e_ehsize)
pub const FILE_HEADER_SIZE: u32 = 52;

/// Size of one program header entry (e_phentsize)
pub const PROGRAM_HEADER_SIZE: u32 = 32;

/// File offset at which segment bytes begin in images this module writes
pub const IMAGE_HEADER_SIZE: u32 = FILE_HEADER_SIZE + 2 * PROGRAM_HEADER_SIZE;

const PF_X: u32 = 0x1;
const PF_W: u32 = 0x2;
const PF_R: u32 = 0x4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Text,
    Data,
}

impl SegmentKind {
    /// p_flags for this segment. The data segment deliberately keeps the
    /// historical write+execute combination; see DESIGN.md before changing
    /// it.
    fn flags(self) -> u32 {
        match self {
            SegmentKind::Text => PF_R | PF_X,
            SegmentKind::Data => PF_R | PF_W | PF_X,
        }
    }
}

#[derive(Debug, Default)]
struct ImageWriter {
    bytes: Vec<u8>,
}

impl ImageWriter {
    fn put_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
}

/// ELF32 file header for a little-endian i386 executable: two program
/// headers directly after the header, no section header table
pub fn encode_file_header(entry: u32) -> Vec<u8> {
    let mut w = ImageWriter::default();

    // e_ident: magic, 32-bit class, little-endian data, version 1
    w.put_bytes(b"\x7fELF\x01\x01\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00");
    w.put_u16(2); // e_type = ET_EXEC
    w.put_u16(3); // e_machine = EM_386
    w.put_u32(1); // e_version = EV_CURRENT
    w.put_u32(entry);
    w.put_u32(FILE_HEADER_SIZE); // e_phoff: program headers follow immediately
    w.put_u32(0); // e_shoff: no section headers
    w.put_u32(0); // e_flags
    w.put_u16(FILE_HEADER_SIZE as u16); // e_ehsize
    w.put_u16(PROGRAM_HEADER_SIZE as u16); // e_phentsize
    w.put_u16(2); // e_phnum
    w.put_u16(0); // e_shentsize
    w.put_u16(0); // e_shnum
    w.put_u16(0); // e_shstrndx = SHN_UNDEF

    w.bytes
}

/// The largest power of two no greater than the page size under which
/// `offset` and `vaddr` are congruent. This congruence search, not a fixed
/// constant, is the alignment policy; 1 always satisfies it.
pub fn congruent_alignment(offset: u32, vaddr: u32) -> u32 {
    let mut alignment = PAGE_SIZE;

    while alignment > 1 {
        if offset % alignment == vaddr % alignment {
            return alignment;
        }
        alignment >>= 1;
    }

    1
}

/// One loadable-segment descriptor
pub fn encode_program_header(
    kind: SegmentKind,
    offset: u32,
    vaddr: u32,
    length: usize,
) -> Result<Vec<u8>, CodegenError> {
    let length = u32::try_from(length).map_err(|_| CodegenError::EncodingOverflow {
        field: "p_filesz",
        value: length as u64,
    })?;

    let mut w = ImageWriter::default();

    w.put_u32(1); // p_type = PT_LOAD
    w.put_u32(offset);
    w.put_u32(vaddr);
    w.put_u32(0); // p_paddr is meaningless on this target
    w.put_u32(length); // p_filesz
    w.put_u32(length); // p_memsz
    w.put_u32(kind.flags());
    w.put_u32(congruent_alignment(offset, vaddr));

    Ok(w.bytes)
}

/// Where the two segments land in the file and in memory, supplied by the
/// caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub text_offset: u32,
    pub text_vaddr: u32,
    pub data_offset: u32,
    pub data_vaddr: u32,
}

impl ImageLayout {
    /// Both segments packed directly after the headers, mapped at
    /// `base_vaddr` plus their file offset so the page-sized alignment
    /// congruence holds
    pub fn contiguous(base_vaddr: u32, text_length: usize) -> Result<Self, CodegenError> {
        let text_length = u32::try_from(text_length).map_err(|_| CodegenError::EncodingOverflow {
            field: "p_filesz",
            value: text_length as u64,
        })?;
        let data_offset = IMAGE_HEADER_SIZE + text_length;

        Ok(Self {
            text_offset: IMAGE_HEADER_SIZE,
            text_vaddr: base_vaddr + IMAGE_HEADER_SIZE,
            data_offset,
            data_vaddr: base_vaddr + data_offset,
        })
    }
}

/// Serialize a complete image:
/// `[file header][text phdr][data phdr][text bytes][data bytes]`
pub fn write_image(
    entry: u32,
    text: &[u8],
    data: &[u8],
    layout: ImageLayout,
) -> Result<Vec<u8>, CodegenError> {
    let mut image = encode_file_header(entry);

    image.extend(encode_program_header(
        SegmentKind::Text,
        layout.text_offset,
        layout.text_vaddr,
        text.len(),
    )?);
    image.extend(encode_program_header(
        SegmentKind::Data,
        layout.data_offset,
        layout.data_vaddr,
        data.len(),
    )?);
    image.extend_from_slice(text);
    image.extend_from_slice(data);

    Ok(image)
}
