//! Conversion of a binary image into 32-bit memory initialization words.
//!
//! Memory initialization files for the FPGA block RAM hold one 32-bit word
//! per line, written as 8 lowercase hex digits. The binary is little endian,
//! so every group of 4 bytes is reversed before being printed:
//!
//! ```
//! let words: Vec<String> = rvboot::hex_image::words(&[0x11, 0x22, 0x33, 0x44, 0x55]).collect();
//! assert_eq!(words, ["44332211", "00000055"]);
//! ```

use std::io::{self, Write};

/// Size in bytes of one memory word.
pub const WORD_SIZE: usize = 4;

/// Iterator over the hex words of a binary image. Cloning it restarts the
/// sequence from the current position.
#[derive(Debug, Clone)]
pub struct HexWords<'a> {
    groups: std::slice::Chunks<'a, u8>,
}

/// Returns the hex words of `data`. The last word is zero padded when the
/// length of `data` is not a multiple of [`WORD_SIZE`].
pub fn words(data: &[u8]) -> HexWords<'_> {
    HexWords {
        groups: data.chunks(WORD_SIZE),
    }
}

/// Writes the hex words of `data` to `writer`, one per line.
pub fn write_words<W: Write>(data: &[u8], mut writer: W) -> io::Result<()> {
    for word in words(data) {
        writeln!(writer, "{}", word)?;
    }
    writer.flush()
}

impl<'a> Iterator for HexWords<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let group = self.groups.next()?;
        let mut bytes = [0u8; WORD_SIZE];
        bytes[..group.len()].copy_from_slice(group);
        Some(format!("{:08x}", u32::from_le_bytes(bytes)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}

impl<'a> ExactSizeIterator for HexWords<'a> {}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
fn decode(lines: &[String]) -> Vec<u8> {
    lines
        .iter()
        .flat_map(|line| {
            let word = u32::from_str_radix(line, 16).unwrap();
            word.to_le_bytes().to_vec()
        })
        .collect()
}

#[test]
fn byte_order() {
    use hex_literal::hex;

    let lines: Vec<String> = words(&hex!("11223344")).collect();
    assert_eq!(lines, ["44332211"]);

    let lines: Vec<String> = words(&hex!("13000000 6f00c000 deadbeef")).collect();
    assert_eq!(lines, ["00000013", "00c0006f", "efbeadde"]);
}

#[test]
fn empty_image() {
    assert_eq!(words(&[]).count(), 0);
}

#[test]
fn padding_law() {
    let data: Vec<u8> = (1..=23).collect();
    for len in 0..data.len() {
        let lines: Vec<String> = words(&data[..len]).collect();
        assert_eq!(lines.len(), (len + WORD_SIZE - 1) / WORD_SIZE);
        assert_eq!(words(&data[..len]).len(), lines.len());

        let decoded = decode(&lines);
        let padding = decoded.len() - len;
        assert!(padding < WORD_SIZE);
        assert_eq!(padding, (WORD_SIZE - len % WORD_SIZE) % WORD_SIZE);
        assert!(decoded[len..].iter().all(|b| *b == 0));
    }
}

#[test]
fn source_bytes_are_recovered() {
    let data: Vec<u8> = (0..=255u8).rev().chain(vec![0x7f, 0x80, 0x01]).collect();
    let lines: Vec<String> = words(&data).collect();
    assert!(lines
        .iter()
        .all(|l| l.len() == 8 && l.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))));
    assert_eq!(&decode(&lines)[..data.len()], &data[..]);
}

#[test]
fn restartable() {
    use hex_literal::hex;

    let data = hex!("0102030405060708");
    let mut it = words(&data);
    let again = it.clone();
    assert_eq!(it.next().as_deref(), Some("04030201"));
    assert_eq!(again.collect::<Vec<_>>(), ["04030201", "08070605"]);
    assert_eq!(it.collect::<Vec<_>>(), ["08070605"]);
}

#[test]
fn written_lines() {
    let mut out = Vec::new();
    write_words(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee], &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "ddccbbaa\n000000ee\n");
}
