use bytes::Bytes;

use crate::types::{DataUnit, FrameInfo};

/// Split one frame image into leader, payload and trailer units.
///
/// Payload units carry up to `packet_size` bytes and are numbered from 1; the
/// trailer takes the sequence after the last payload unit. Payload slices share
/// the image allocation.
///
/// ```rust
/// use camstream::transport::packetize;
/// use camstream::{FrameInfo, PixelFormat};
///
/// let units = packetize(1, FrameInfo::new(4, 2, PixelFormat::MONO_8), vec![0u8; 8], 3);
/// assert_eq!(units.len(), 5);
/// assert!(units[0].is_leader());
/// assert_eq!(units[3].len(), 2);
/// assert!(units[4].is_trailer());
/// ```
pub fn packetize(frame_id: u64, info: FrameInfo, data: impl Into<Bytes>, packet_size: usize) -> Vec<DataUnit> {
    let data: Bytes = data.into();
    let packet_size = packet_size.max(1);
    let mut units = Vec::with_capacity(data.len().div_ceil(packet_size) + 2);
    units.push(DataUnit::leader(frame_id, info));

    let mut sequence = 1u32;
    for offset in (0..data.len()).step_by(packet_size) {
        let end = (offset + packet_size).min(data.len());
        units.push(DataUnit::payload(frame_id, sequence, offset, data.slice(offset..end)));
        sequence += 1;
    }

    units.push(DataUnit::trailer(frame_id, sequence));
    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitKind;

    #[test]
    fn units_cover_the_image_in_order() {
        let image: Vec<u8> = (0..10).collect();
        let units = packetize(5, FrameInfo::default(), image.clone(), 4);

        let sequences: Vec<u32> = units.iter().map(|u| u.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert!(units.iter().all(|u| u.frame_id == 5));

        let mut rebuilt = Vec::new();
        for unit in units.iter().filter(|u| u.kind == UnitKind::Payload) {
            assert_eq!(unit.offset, rebuilt.len());
            rebuilt.extend_from_slice(&unit.payload);
        }
        assert_eq!(rebuilt, image);
    }

    #[test]
    fn empty_image_is_leader_and_trailer() {
        let units = packetize(1, FrameInfo::default(), Vec::new(), 16);
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].sequence, 1);
        assert!(units[1].is_trailer());
    }
}
