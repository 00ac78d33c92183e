//! Compressed bitstream inspection
//!
//! Just enough parsing to tell whether an access unit starts a decodable
//! sequence: Annex-B NAL headers for H.264/HEVC and OBU headers for AV1.

use crate::encode::Codec;

const H264_NAL_IDR: u8 = 5;
const HEVC_NAL_IRAP: std::ops::RangeInclusive<u8> = 16..=23;
const AV1_OBU_SEQUENCE_HEADER: u8 = 1;

/// Iterator over the NAL unit payloads of an Annex-B byte stream
pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Split an Annex-B stream on 3- and 4-byte start codes
pub fn nal_units(data: &[u8]) -> NalUnits<'_> {
    let pos = find_start_code(data, 0).map_or(data.len(), |(_, end)| end);
    NalUnits { data, pos }
}

/// Returns (start of the start code, first byte after it)
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, i + 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, i + 4));
            }
        }
        i += 1;
    }
    None
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        while self.pos < self.data.len() {
            let start = self.pos;
            let (end, next) = find_start_code(self.data, start)
                .unwrap_or((self.data.len(), self.data.len()));
            self.pos = next;
            if end > start {
                return Some(&self.data[start..end]);
            }
        }
        None
    }
}

/// Whether an access unit contains a random access point for `codec`
pub fn contains_keyframe(codec: Codec, data: &[u8]) -> bool {
    match codec {
        Codec::H264 => nal_units(data).any(|nal| nal[0] & 0x1f == H264_NAL_IDR),
        Codec::Hevc => nal_units(data).any(|nal| HEVC_NAL_IRAP.contains(&((nal[0] >> 1) & 0x3f))),
        Codec::Av1 => av1_has_sequence_header(data),
    }
}

/// Walk the low-overhead OBU stream looking for a sequence header
fn av1_has_sequence_header(data: &[u8]) -> bool {
    let mut pos = 0;
    while pos < data.len() {
        let header = data[pos];
        let obu_type = (header >> 3) & 0x0f;
        if obu_type == AV1_OBU_SEQUENCE_HEADER {
            return true;
        }
        let has_extension = header & 0x04 != 0;
        let has_size = header & 0x02 != 0;
        pos += 1 + usize::from(has_extension);
        if !has_size {
            // Unsized OBU runs to the end of the unit.
            return false;
        }
        let Some((size, used)) = read_leb128(&data[pos.min(data.len())..]) else {
            return false;
        };
        let Some(next) = usize::try_from(size)
            .ok()
            .and_then(|size| size.checked_add(pos + used))
        else {
            return false;
        };
        pos = next;
    }
    false
}

fn read_leb128(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in data.iter().take(8).enumerate() {
        value |= u64::from(byte & 0x7f).checked_shl(i as u32 * 7)?;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}
