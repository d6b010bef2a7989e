//! Program specific information: PAT and PMT sections.

use tracing::trace;

use crate::error::{TsError, TsResult};

const TABLE_PAT: u8 = 0x00;
const TABLE_PMT: u8 = 0x02;
/// Longest section allowed for PAT/PMT.
const MAX_SECTION_LEN: usize = 1021;

/// CRC-32/MPEG-2 over a whole section; zero when the trailing CRC matches.
pub(crate) fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= u32::from(byte) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// One `(program_number, pmt_pid)` entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// One elementary stream listed in a PMT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub pid: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pmt {
    pub program_number: u16,
    pub version: u8,
    pub pcr_pid: u16,
    pub streams: Vec<PmtStream>,
}

/// Reassembles sections that span TS packets.
#[derive(Debug, Default)]
pub(crate) struct SectionAssembler {
    section: Vec<u8>,
    active: bool,
}

impl SectionAssembler {
    /// Feed one packet payload; returns a complete section when one ends here.
    pub(crate) fn push(&mut self, payload: &[u8], unit_start: bool) -> TsResult<Option<Vec<u8>>> {
        let mut data = payload;
        if unit_start {
            let pointer = usize::from(*data.first().ok_or_else(|| TsError::parse("empty PSI payload"))?);
            data = data
                .get(1 + pointer..)
                .ok_or_else(|| TsError::parse(format!("PSI pointer field {pointer} past payload")))?;
            self.section.clear();
            self.active = true;
        } else if !self.active {
            return Ok(None);
        }

        self.section.extend_from_slice(data);
        if self.section.len() < 3 {
            return Ok(None);
        }
        if self.section[0] == 0xFF {
            // Stuffing.
            self.active = false;
            self.section.clear();
            return Ok(None);
        }
        let length = usize::from(u16::from_be_bytes([self.section[1], self.section[2]]) & 0x0FFF);
        if length > MAX_SECTION_LEN {
            self.active = false;
            return Err(TsError::parse(format!("section length {length}")));
        }
        if self.section.len() < 3 + length {
            return Ok(None);
        }
        self.active = false;
        let mut section = std::mem::take(&mut self.section);
        section.truncate(3 + length);
        if crc32_mpeg2(&section) != 0 {
            return Err(TsError::parse(format!(
                "section CRC mismatch (table {:#04x})",
                section[0]
            )));
        }
        Ok(Some(section))
    }

    pub(crate) fn reset(&mut self) {
        self.section.clear();
        self.active = false;
    }
}

/// Common long-form section header checks; returns the table body without CRC.
fn section_body(section: &[u8], table_id: u8, min_len: usize) -> TsResult<&[u8]> {
    if section[0] != table_id {
        return Err(TsError::parse(format!(
            "expected table {table_id:#04x}, found {:#04x}",
            section[0]
        )));
    }
    if section[1] & 0x80 == 0 {
        return Err(TsError::parse("section_syntax_indicator is 0"));
    }
    if section.len() < min_len + 4 {
        return Err(TsError::parse(format!("section too short ({} bytes)", section.len())));
    }
    Ok(&section[..section.len() - 4])
}

pub fn parse_pat(section: &[u8]) -> TsResult<Vec<PatEntry>> {
    let body = section_body(section, TABLE_PAT, 8)?;
    let entries: Vec<PatEntry> = body[8..]
        .chunks_exact(4)
        .map(|entry| PatEntry {
            program_number: u16::from_be_bytes([entry[0], entry[1]]),
            pmt_pid: u16::from_be_bytes([entry[2], entry[3]]) & 0x1FFF,
        })
        .collect();
    trace!(programs = entries.len(), "psi: PAT");
    Ok(entries)
}

pub fn parse_pmt(section: &[u8]) -> TsResult<Pmt> {
    let body = section_body(section, TABLE_PMT, 12)?;
    let program_number = u16::from_be_bytes([body[3], body[4]]);
    let version = (body[5] >> 1) & 0x1F;
    let pcr_pid = u16::from_be_bytes([body[8], body[9]]) & 0x1FFF;
    let info_length = usize::from(u16::from_be_bytes([body[10], body[11]]) & 0x0FFF);

    let mut rest = body
        .get(12 + info_length..)
        .ok_or_else(|| TsError::parse("PMT program_info_length past section"))?;
    let mut streams = Vec::new();
    while rest.len() >= 5 {
        let stream_type = rest[0];
        let pid = u16::from_be_bytes([rest[1], rest[2]]) & 0x1FFF;
        let es_info_length = usize::from(u16::from_be_bytes([rest[3], rest[4]]) & 0x0FFF);
        rest = rest
            .get(5 + es_info_length..)
            .ok_or_else(|| TsError::parse(format!("PMT ES_info_length past section on pid {pid}")))?;
        streams.push(PmtStream { stream_type, pid });
    }
    Ok(Pmt {
        program_number,
        version,
        pcr_pid,
        streams,
    })
}
