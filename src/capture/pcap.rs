//! Classic libpcap file format writer.
//!
//! The global header is always written, so a capture with zero packets is
//! still a valid 24-byte file.

use std::io::{self, Write};
use std::time::UNIX_EPOCH;

use super::PacketRecord;

pub const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
pub const PCAP_HEADER_LEN: usize = 24;
pub const LINKTYPE_ETHERNET: u32 = 1;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65_535;

/// Write the global header followed by every record in order.
pub fn write_pcap<W: Write>(out: &mut W, records: &[PacketRecord], link_type: u32) -> io::Result<()> {
    out.write_all(&PCAP_MAGIC.to_le_bytes())?;
    out.write_all(&VERSION_MAJOR.to_le_bytes())?;
    out.write_all(&VERSION_MINOR.to_le_bytes())?;
    out.write_all(&0i32.to_le_bytes())?; // thiszone
    out.write_all(&0u32.to_le_bytes())?; // sigfigs
    out.write_all(&SNAPLEN.to_le_bytes())?;
    out.write_all(&link_type.to_le_bytes())?;

    for record in records {
        let since_epoch = record.timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
        let incl_len = u32::try_from(record.data.len()).unwrap_or(u32::MAX);
        out.write_all(&(since_epoch.as_secs() as u32).to_le_bytes())?;
        out.write_all(&since_epoch.subsec_micros().to_le_bytes())?;
        out.write_all(&incl_len.to_le_bytes())?;
        out.write_all(&record.original_len.max(incl_len).to_le_bytes())?;
        out.write_all(&record.data)?;
    }
    out.flush()
}
