//! FD-exchange wire record (spec.md §6): a fixed-size struct sent as the
//! iovec payload of a Unix-domain-socket message, with the descriptor (when
//! present) riding in the ancillary `SCM_RIGHTS`-style data that `passfd`
//! attaches alongside it.

use shmc_region::RegionType;

/// Byte length of [`FdExchangeRecord`] on the wire.
pub const FD_EXCHANGE_RECORD_LEN: usize = 24;

/// `{ region_type, region_index, region_size, contains_fd }` exactly as
/// spec.md §6 lays it out, padded to a round record size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdExchangeRecord {
    pub region_type: RegionType,
    pub region_index: u32,
    pub region_size: u64,
    pub contains_fd: bool,
}

impl FdExchangeRecord {
    pub fn new(region_type: RegionType, region_index: u32, region_size: u64, contains_fd: bool) -> Self {
        Self {
            region_type,
            region_index,
            region_size,
            contains_fd,
        }
    }

    pub fn write_le(&self, buf: &mut [u8; FD_EXCHANGE_RECORD_LEN]) {
        buf.fill(0);
        buf[0..4].copy_from_slice(&(self.region_type as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.region_index.to_le_bytes());
        buf[8..16].copy_from_slice(&self.region_size.to_le_bytes());
        buf[16] = self.contains_fd as u8;
    }

    pub fn read_le(buf: &[u8; FD_EXCHANGE_RECORD_LEN]) -> Result<Self, String> {
        let region_type_bits = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let region_type = RegionType::from_u8(region_type_bits as u8)
            .ok_or_else(|| format!("unknown region_type {region_type_bits}"))?;
        let region_index = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let region_size = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let contains_fd = buf[16] != 0;
        Ok(Self {
            region_type,
            region_index,
            region_size,
            contains_fd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrips_through_bytes() {
        let record = FdExchangeRecord::new(RegionType::Feedback, 3, 65536, true);
        let mut buf = [0u8; FD_EXCHANGE_RECORD_LEN];
        record.write_le(&mut buf);
        let back = FdExchangeRecord::read_le(&buf).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn unknown_region_type_is_rejected() {
        let mut buf = [0u8; FD_EXCHANGE_RECORD_LEN];
        buf[0] = 0xFF;
        assert!(FdExchangeRecord::read_le(&buf).is_err());
    }
}
