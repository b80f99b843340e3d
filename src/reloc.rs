//! Relocation engine (spec §4.3): decodes each RELOC-flagged segment's
//! fixup records and applies them in place over loaded segment images,
//! following embedded chain pointers.
//!
//! Record decoding is a direct generalization of the teacher's
//! `exe286::segrelocs::RelocationTable::read` (same byte layout, same
//! bit-split of the type byte); applying the fixups to a live buffer is
//! new — the teacher only ever decodes relocations for display, it never
//! patches segment data.

use thiserror::Error;

use crate::ne::{ParserImage, SegmentDescriptor};
use crate::reader::ByteReader;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RelocError {
    #[error("import resolver could not resolve a reference")]
    Unresolved,
    #[error("relocation targets a segment index or offset out of range")]
    BadSeg,
    #[error("unrecognized or inconsistent address type")]
    AddrType,
    #[error("allocation failure")]
    Alloc,
    #[error("no buffer or segment image supplied")]
    NullArg,
    #[error("relocation record block lies outside the file image")]
    Io,
}

impl RelocError {
    pub fn code(&self) -> i32 {
        match self {
            RelocError::Unresolved => 1,
            RelocError::BadSeg => 2,
            RelocError::AddrType => 3,
            RelocError::Alloc => 4,
            RelocError::NullArg => 5,
            RelocError::Io => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    LoByte,
    Seg16,
    Off16,
    Far32,
    Ptr32,
}

impl AddressType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(AddressType::LoByte),
            2 => Some(AddressType::Seg16),
            5 => Some(AddressType::Off16),
            3 => Some(AddressType::Far32),
            11 => Some(AddressType::Ptr32),
            _ => None,
        }
    }

    /// Width, in bytes, of the final patch this address type writes.
    fn patch_width(self) -> usize {
        match self {
            AddressType::LoByte => 1,
            AddressType::Seg16 | AddressType::Off16 => 2,
            AddressType::Far32 | AddressType::Ptr32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    Internal,
    ImportOrdinal,
    ImportName,
    OsFixup,
}

impl RelocKind {
    fn from_bits(b: u8) -> Self {
        match b & 0x03 {
            0 => RelocKind::Internal,
            1 => RelocKind::ImportOrdinal,
            2 => RelocKind::ImportName,
            _ => RelocKind::OsFixup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationRecord {
    pub address_type_raw: u8,
    pub kind: RelocKind,
    pub additive: bool,
    pub target_offset: u16,
    pub ref1: u16,
    pub ref2: u16,
}

/// Decodes the relocation record block trailing a RELOC-flagged segment's
/// on-disk data (spec §4.3, "Record decoding"). `buf` is the whole file
/// image; the block's position is `segment-file-offset +
/// segment-on-disk-length`.
pub fn decode_segment_records(
    buf: &[u8],
    segment: &SegmentDescriptor,
    alignment_shift: u32,
) -> Result<Vec<RelocationRecord>, RelocError> {
    let reader = ByteReader::new(buf);
    let block_pos = segment.file_offset(alignment_shift) + segment.on_disk_length() as u64;
    let block_pos: usize = block_pos.try_into().map_err(|_| RelocError::Io)?;

    let count = reader.u16_le_at(block_pos).map_err(|_| RelocError::Io)?;
    let mut records = Vec::with_capacity(count as usize);
    let mut cursor = block_pos + 2;

    for _ in 0..count {
        let raw = reader.slice_at(cursor, 8).map_err(|_| RelocError::Io)?;
        let address_type_raw = raw[0];
        let reloc_flags = raw[1];
        let target_offset = u16::from_le_bytes([raw[2], raw[3]]);
        let ref1 = u16::from_le_bytes([raw[4], raw[5]]);
        let ref2 = u16::from_le_bytes([raw[6], raw[7]]);

        records.push(RelocationRecord {
            address_type_raw,
            kind: RelocKind::from_bits(reloc_flags),
            additive: reloc_flags & 0x04 != 0,
            target_offset,
            ref1,
            ref2,
        });
        cursor += 8;
    }

    Ok(records)
}

/// Callback the relocation engine asks to resolve an import reference.
/// `imported_names` is the owned imported-name table bytes from the
/// parser image; `ref1`/`ref2` are the raw values from the relocation
/// record (module index + ordinal, or module index + name offset).
pub trait ImportResolver {
    fn resolve(
        &mut self,
        ref1: u16,
        ref2: u16,
        is_by_name: bool,
        imported_names: &[u8],
    ) -> Option<(u16, u16)>;
}

/// Applies every relocation record for every RELOC-flagged segment,
/// in table order, patching `segment_images[i]` in place for segment
/// `i + 1` (spec §4.3, §9's ordering guarantee).
///
/// `segment_images[i] == None` for a segment with no live data (BSS, or
/// simply not loaded yet) is only an error if that segment actually
/// carries relocations to apply.
pub fn apply_relocations(
    buf: &[u8],
    image: &ParserImage,
    segment_images: &mut [Option<&mut [u8]>],
    resolver: &mut dyn ImportResolver,
) -> Result<(), RelocError> {
    if segment_images.len() != image.segments.len() {
        return Err(RelocError::NullArg);
    }
    let alignment_shift = image.header.alignment_shift();
    let segment_count = image.segments.len();

    for (i, segment) in image.segments.iter().enumerate() {
        if !segment.has_relocations() {
            continue;
        }
        let records = decode_segment_records(buf, segment, alignment_shift)?;
        let data = segment_images[i].as_deref_mut().ok_or(RelocError::BadSeg)?;

        for record in records {
            if record.kind == RelocKind::OsFixup {
                continue;
            }

            let (segment_value, offset_value) = match record.kind {
                RelocKind::Internal => {
                    let seg_num = record.ref1 as usize;
                    if seg_num == 0 || seg_num > segment_count {
                        return Err(RelocError::BadSeg);
                    }
                    (record.ref1, record.ref2)
                }
                RelocKind::ImportOrdinal | RelocKind::ImportName => resolver
                    .resolve(
                        record.ref1,
                        record.ref2,
                        record.kind == RelocKind::ImportName,
                        &image.imported_names.bytes,
                    )
                    .ok_or(RelocError::Unresolved)?,
                RelocKind::OsFixup => unreachable!(),
            };

            let address_type = AddressType::from_u8(record.address_type_raw)
                .ok_or(RelocError::AddrType)?;

            if record.additive && address_type == AddressType::LoByte {
                // Open question resolution (spec §9): an additive LOBYTE
                // record whose target byte looks like a live chain
                // pointer (anything but the terminator) is an
                // inconsistent stream, not a record we can apply safely.
                let current = *data
                    .get(record.target_offset as usize)
                    .ok_or(RelocError::BadSeg)?;
                if current != 0xFF {
                    return Err(RelocError::AddrType);
                }
            }

            patch_chain(data, record.target_offset, address_type, record.additive, segment_value, offset_value)?;
        }
    }

    Ok(())
}

fn patch_chain(
    data: &mut [u8],
    mut target: u16,
    address_type: AddressType,
    additive: bool,
    segment_value: u16,
    offset_value: u16,
) -> Result<(), RelocError> {
    loop {
        let at = target as usize;
        let width = address_type.patch_width();
        if at.checked_add(width).is_none_or(|end| end > data.len()) {
            return Err(RelocError::BadSeg);
        }

        let next = if !additive {
            Some(match address_type {
                AddressType::LoByte => {
                    let b = data[at];
                    if b == 0xFF {
                        None
                    } else {
                        Some(b as u16)
                    }
                }
                _ => {
                    let w = u16::from_le_bytes([data[at], data[at + 1]]);
                    if w == 0xFFFF {
                        None
                    } else {
                        Some(w)
                    }
                }
            })
        } else {
            None
        };

        match address_type {
            AddressType::LoByte => {
                data[at] = (offset_value & 0xFF) as u8;
            }
            AddressType::Seg16 => {
                data[at..at + 2].copy_from_slice(&segment_value.to_le_bytes());
            }
            AddressType::Off16 => {
                data[at..at + 2].copy_from_slice(&offset_value.to_le_bytes());
            }
            AddressType::Far32 => {
                data[at..at + 2].copy_from_slice(&offset_value.to_le_bytes());
                data[at + 2..at + 4].copy_from_slice(&segment_value.to_le_bytes());
            }
            AddressType::Ptr32 => {
                data[at..at + 2].copy_from_slice(&offset_value.to_le_bytes());
                if !additive {
                    data[at + 2..at + 4].copy_from_slice(&[0, 0]);
                }
            }
        }

        match next {
            None => return Ok(()),
            Some(None) => return Ok(()), // chain terminator reached
            Some(Some(next_offset)) => target = next_offset,
        }
    }
}
