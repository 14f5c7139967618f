//! Wire format for synchronization messages.
//!
//! All integers little-endian:
//! ```text
//! [Header: magic u16 = 0x5154, version u8 = 1, kind u8]
//! kind 1 (snapshot):
//!   [sequence u32][record count u16][records: count × 40 bytes]
//!   [removed count u16][removed ids: count × u64]
//! kind 2 (resync request):
//!   [last applied sequence u32]
//! ```
//!
//! A record is `id u64, position 3×i32, orientation 4×i16,
//! linear velocity 3×i16, angular velocity 3×i16`.

use std::collections::HashSet;

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::api::types::BodyId;
use crate::sync::quantize::QuantizedState;

pub const MAGIC: u16 = 0x5154;
pub const WIRE_VERSION: u8 = 1;
pub const KIND_SNAPSHOT: u8 = 1;
pub const KIND_RESYNC_REQUEST: u8 = 2;

/// Bytes in the common header.
pub const HEADER_BYTES: usize = 4;
/// Bytes per body record. Fixed by the wire format.
pub const RECORD_BYTES: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("message truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("{0} trailing byte(s) after message")]
    TrailingBytes(usize),

    #[error("bad magic {0:#06x}")]
    BadMagic(u16),

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    #[error("{0} appears more than once")]
    DuplicateBody(BodyId),

    #[error("zero-length orientation for {0}")]
    ZeroOrientation(BodyId),

    #[error("{0} entries exceed the u16 count field")]
    TooManyEntries(usize),
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One body's state inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyRecord {
    pub id: BodyId,
    pub state: QuantizedState,
}

/// Changed bodies for one connection since the previous snapshot it received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub sequence: u32,
    pub records: Vec<BodyRecord>,
    /// Bodies the receiver must drop.
    pub removed: Vec<BodyId>,
}

impl SyncSnapshot {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    Snapshot(SyncSnapshot),
    ResyncRequest { last_applied: u32 },
}

/// Record as laid out on the wire. Fields hold little-endian values.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
struct WireRecord {
    id: u64,
    position: [i32; 3],
    orientation: [i16; 4],
    linear_velocity: [i16; 3],
    angular_velocity: [i16; 3],
}

impl WireRecord {
    fn from_record(record: &BodyRecord) -> Self {
        let s = &record.state;
        Self {
            id: record.id.0.to_le(),
            position: s.position.map(i32::to_le),
            orientation: s.orientation.map(i16::to_le),
            linear_velocity: s.linear_velocity.map(i16::to_le),
            angular_velocity: s.angular_velocity.map(i16::to_le),
        }
    }

    fn into_record(self) -> BodyRecord {
        BodyRecord {
            id: BodyId(u64::from_le(self.id)),
            state: QuantizedState {
                position: self.position.map(i32::from_le),
                orientation: self.orientation.map(i16::from_le),
                linear_velocity: self.linear_velocity.map(i16::from_le),
                angular_velocity: self.angular_velocity.map(i16::from_le),
            },
        }
    }
}

const _: () = assert!(std::mem::size_of::<WireRecord>() == RECORD_BYTES);

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

fn count_u16(n: usize) -> Result<u16, CodecError> {
    u16::try_from(n).map_err(|_| CodecError::TooManyEntries(n))
}

impl SyncMessage {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            SyncMessage::Snapshot(snap) => {
                let records = count_u16(snap.records.len())?;
                let removed = count_u16(snap.removed.len())?;
                let mut out = Vec::with_capacity(
                    HEADER_BYTES + 8 + snap.records.len() * RECORD_BYTES + snap.removed.len() * 8,
                );
                write_header(&mut out, KIND_SNAPSHOT);
                out.extend_from_slice(&snap.sequence.to_le_bytes());
                out.extend_from_slice(&records.to_le_bytes());
                for record in &snap.records {
                    out.extend_from_slice(bytemuck::bytes_of(&WireRecord::from_record(record)));
                }
                out.extend_from_slice(&removed.to_le_bytes());
                for id in &snap.removed {
                    out.extend_from_slice(&id.0.to_le_bytes());
                }
                Ok(out)
            }
            SyncMessage::ResyncRequest { last_applied } => {
                let mut out = Vec::with_capacity(HEADER_BYTES + 4);
                write_header(&mut out, KIND_RESYNC_REQUEST);
                out.extend_from_slice(&last_applied.to_le_bytes());
                Ok(out)
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<SyncMessage, CodecError> {
        let mut r = Reader::new(bytes);
        let magic = r.u16()?;
        if magic != MAGIC {
            return Err(CodecError::BadMagic(magic));
        }
        let version = r.u8()?;
        if version != WIRE_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let message = match r.u8()? {
            KIND_SNAPSHOT => SyncMessage::Snapshot(decode_snapshot(&mut r)?),
            KIND_RESYNC_REQUEST => SyncMessage::ResyncRequest {
                last_applied: r.u32()?,
            },
            other => return Err(CodecError::UnknownKind(other)),
        };
        r.finish()?;
        Ok(message)
    }
}

fn write_header(out: &mut Vec<u8>, kind: u8) {
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.push(WIRE_VERSION);
    out.push(kind);
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

fn decode_snapshot(r: &mut Reader<'_>) -> Result<SyncSnapshot, CodecError> {
    let sequence = r.u32()?;
    let count = r.u16()? as usize;
    let mut seen = HashSet::with_capacity(count);
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let wire: WireRecord = bytemuck::pod_read_unaligned(r.take(RECORD_BYTES)?);
        let record = wire.into_record();
        if !seen.insert(record.id) {
            return Err(CodecError::DuplicateBody(record.id));
        }
        if !record.state.has_orientation() {
            return Err(CodecError::ZeroOrientation(record.id));
        }
        records.push(record);
    }
    let removed_count = r.u16()? as usize;
    let mut removed = Vec::with_capacity(removed_count);
    for _ in 0..removed_count {
        let id = BodyId(r.u64()?);
        if !seen.insert(id) {
            return Err(CodecError::DuplicateBody(id));
        }
        removed.push(id);
    }
    Ok(SyncSnapshot {
        sequence,
        records,
        removed,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let available = self.bytes.len() - self.pos;
        if n > available {
            return Err(CodecError::Truncated {
                needed: self.pos + n,
                available: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn finish(&self) -> Result<(), CodecError> {
        match self.bytes.len() - self.pos {
            0 => Ok(()),
            extra => Err(CodecError::TrailingBytes(extra)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Pose;
    use glam::{Quat, Vec3};

    fn record(id: u64) -> BodyRecord {
        BodyRecord {
            id: BodyId(id),
            state: QuantizedState::new(
                &Pose::new(Vec3::new(1.5, -2.0, 300.25), Quat::from_rotation_x(0.7)),
                Vec3::new(0.5, 0.0, -3.0),
                Vec3::new(0.0, 1.0, 0.0),
            ),
        }
    }

    fn snapshot() -> SyncMessage {
        SyncMessage::Snapshot(SyncSnapshot {
            sequence: 42,
            records: vec![record(1), record(7)],
            removed: vec![BodyId(3)],
        })
    }

    #[test]
    fn snapshot_layout_matches_wire_format() {
        let bytes = snapshot().encode().expect("encode");
        assert_eq!(bytes.len(), HEADER_BYTES + 4 + 2 + 2 * RECORD_BYTES + 2 + 8);
        assert_eq!(&bytes[0..4], &[0x54, 0x51, 1, KIND_SNAPSHOT]);
        assert_eq!(&bytes[4..8], &42u32.to_le_bytes());
        assert_eq!(&bytes[8..10], &2u16.to_le_bytes());
        assert_eq!(&bytes[10..18], &1u64.to_le_bytes());
        assert_eq!(SyncMessage::decode(&bytes), Ok(snapshot()));
    }

    #[test]
    fn resync_request_is_eight_bytes() {
        let bytes = SyncMessage::ResyncRequest { last_applied: 9 }.encode().expect("encode");
        assert_eq!(bytes, vec![0x54, 0x51, 1, 2, 9, 0, 0, 0]);
    }

    #[test]
    fn rejects_truncation_and_trailing_bytes() {
        let bytes = snapshot().encode().expect("encode");
        assert!(matches!(
            SyncMessage::decode(&bytes[..bytes.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));
        let mut longer = bytes.clone();
        longer.push(0);
        assert_eq!(SyncMessage::decode(&longer), Err(CodecError::TrailingBytes(1)));
        assert!(matches!(SyncMessage::decode(&[]), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn rejects_bad_header_fields() {
        let bytes = snapshot().encode().expect("encode");
        let mut bad = bytes.clone();
        bad[0] = 0;
        assert!(matches!(SyncMessage::decode(&bad), Err(CodecError::BadMagic(_))));
        let mut bad = bytes.clone();
        bad[2] = 9;
        assert_eq!(SyncMessage::decode(&bad), Err(CodecError::UnsupportedVersion(9)));
        let mut bad = bytes;
        bad[3] = 77;
        assert_eq!(SyncMessage::decode(&bad), Err(CodecError::UnknownKind(77)));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let msg = SyncMessage::Snapshot(SyncSnapshot {
            sequence: 1,
            records: vec![record(5)],
            removed: vec![BodyId(5)],
        });
        let bytes = msg.encode().expect("encode");
        assert_eq!(SyncMessage::decode(&bytes), Err(CodecError::DuplicateBody(BodyId(5))));
    }

    #[test]
    fn rejects_zero_quaternion() {
        let mut rec = record(2);
        rec.state.orientation = [0; 4];
        let bytes = SyncMessage::Snapshot(SyncSnapshot {
            sequence: 1,
            records: vec![rec],
            removed: Vec::new(),
        })
        .encode()
        .expect("encode");
        assert_eq!(SyncMessage::decode(&bytes), Err(CodecError::ZeroOrientation(BodyId(2))));
    }
}
