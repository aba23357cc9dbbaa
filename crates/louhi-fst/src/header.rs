// Fixed-layout binary header: symbol counts, table sizes, property bits.

use crate::{OlError, SymbolNumber, TableIndex};

/// Size of the binary header in bytes: two u16 counts, four u32 counts,
/// nine u32 booleans.
pub const HEADER_SIZE: usize = 2 + 2 + 4 * 4 + 9 * 4;

/// Parsed transducer header.
///
/// The nine property booleans are advisory: lookup correctness does not
/// depend on them, except that `weighted` selects the record width used to
/// decode both tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransducerHeader {
    pub input_symbol_count: SymbolNumber,
    pub symbol_count: SymbolNumber,
    pub index_table_size: TableIndex,
    pub transition_table_size: TableIndex,
    pub state_count: u32,
    pub transition_count: u32,

    pub weighted: bool,
    pub deterministic: bool,
    pub input_deterministic: bool,
    pub minimized: bool,
    pub cyclic: bool,
    pub has_epsilon_epsilon_transitions: bool,
    pub has_input_epsilon_transitions: bool,
    pub has_input_epsilon_cycles: bool,
    pub has_unweighted_input_epsilon_cycles: bool,
}

fn read_u16(data: &[u8], pos: &mut usize) -> Result<u16, OlError> {
    if *pos + 2 > data.len() {
        return Err(OlError::TooShort {
            expected: *pos + 2,
            actual: data.len(),
        });
    }
    let v = u16::from_le_bytes([data[*pos], data[*pos + 1]]);
    *pos += 2;
    Ok(v)
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32, OlError> {
    if *pos + 4 > data.len() {
        return Err(OlError::TooShort {
            expected: *pos + 4,
            actual: data.len(),
        });
    }
    let v = u32::from_le_bytes([
        data[*pos],
        data[*pos + 1],
        data[*pos + 2],
        data[*pos + 3],
    ]);
    *pos += 4;
    Ok(v)
}

fn read_bool(data: &[u8], pos: &mut usize) -> Result<bool, OlError> {
    match read_u32(data, pos)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(OlError::BadTransducer(format!(
            "header boolean has value {other}"
        ))),
    }
}

impl TransducerHeader {
    /// Parse the header from the start of `data`. On success also returns
    /// the offset of the first byte after the header.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), OlError> {
        let mut pos = 0;
        let header = TransducerHeader {
            input_symbol_count: read_u16(data, &mut pos)?,
            symbol_count: read_u16(data, &mut pos)?,
            index_table_size: read_u32(data, &mut pos)?,
            transition_table_size: read_u32(data, &mut pos)?,
            state_count: read_u32(data, &mut pos)?,
            transition_count: read_u32(data, &mut pos)?,
            weighted: read_bool(data, &mut pos)?,
            deterministic: read_bool(data, &mut pos)?,
            input_deterministic: read_bool(data, &mut pos)?,
            minimized: read_bool(data, &mut pos)?,
            cyclic: read_bool(data, &mut pos)?,
            has_epsilon_epsilon_transitions: read_bool(data, &mut pos)?,
            has_input_epsilon_transitions: read_bool(data, &mut pos)?,
            has_input_epsilon_cycles: read_bool(data, &mut pos)?,
            has_unweighted_input_epsilon_cycles: read_bool(data, &mut pos)?,
        };
        if header.symbol_count == 0 {
            return Err(OlError::BadTransducer(
                "header declares zero symbols (epsilon is mandatory)".to_string(),
            ));
        }
        if header.input_symbol_count > header.symbol_count {
            return Err(OlError::BadTransducer(format!(
                "{} input symbols but only {} symbols in total",
                header.input_symbol_count, header.symbol_count
            )));
        }
        Ok((header, pos))
    }

    /// Append the 56-byte wire form to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.input_symbol_count.to_le_bytes());
        out.extend_from_slice(&self.symbol_count.to_le_bytes());
        out.extend_from_slice(&self.index_table_size.to_le_bytes());
        out.extend_from_slice(&self.transition_table_size.to_le_bytes());
        out.extend_from_slice(&self.state_count.to_le_bytes());
        out.extend_from_slice(&self.transition_count.to_le_bytes());
        for b in [
            self.weighted,
            self.deterministic,
            self.input_deterministic,
            self.minimized,
            self.cyclic,
            self.has_epsilon_epsilon_transitions,
            self.has_input_epsilon_transitions,
            self.has_input_epsilon_cycles,
            self.has_unweighted_input_epsilon_cycles,
        ] {
            out.extend_from_slice(&(b as u32).to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(weighted: bool) -> TransducerHeader {
        TransducerHeader {
            input_symbol_count: 3,
            symbol_count: 5,
            index_table_size: 10,
            transition_table_size: 7,
            state_count: 4,
            transition_count: 6,
            weighted,
            deterministic: true,
            input_deterministic: false,
            minimized: true,
            cyclic: false,
            has_epsilon_epsilon_transitions: false,
            has_input_epsilon_transitions: true,
            has_input_epsilon_cycles: false,
            has_unweighted_input_epsilon_cycles: false,
        }
    }

    #[test]
    fn round_trip() {
        let header = sample_header(true);
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let (parsed, end) = TransducerHeader::from_bytes(&buf).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(end, HEADER_SIZE);
    }

    #[test]
    fn reject_truncated() {
        let mut buf = Vec::new();
        sample_header(false).write(&mut buf);
        buf.truncate(20);
        assert!(matches!(
            TransducerHeader::from_bytes(&buf),
            Err(OlError::TooShort { .. })
        ));
    }

    #[test]
    fn reject_nonbinary_boolean() {
        let mut buf = Vec::new();
        sample_header(false).write(&mut buf);
        // First boolean starts after the six count fields.
        buf[20] = 7;
        assert!(matches!(
            TransducerHeader::from_bytes(&buf),
            Err(OlError::BadTransducer(_))
        ));
    }

    #[test]
    fn reject_zero_symbols() {
        let mut header = sample_header(false);
        header.symbol_count = 0;
        header.input_symbol_count = 0;
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert!(matches!(
            TransducerHeader::from_bytes(&buf),
            Err(OlError::BadTransducer(_))
        ));
    }

    #[test]
    fn reject_more_input_symbols_than_symbols() {
        let mut header = sample_header(false);
        header.input_symbol_count = 9;
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert!(matches!(
            TransducerHeader::from_bytes(&buf),
            Err(OlError::BadTransducer(_))
        ));
    }
}
