//! Container framing.
//!
//! ```text
//! [ salt ][ nonce || ciphertext || tag ] ... [ nonce || ciphertext || tag ][ "BS;len;...;len" 0 0 ... 0 ]
//! ```
//!
//! Chunk boundaries are chosen by whoever writes into the [`FrameWriter`], so
//! the sealed length of every chunk is recorded in a ledger that is appended
//! as a zero-padded trailer. The trailer size is never stored. It comes from
//! the container size and the header ratio `R`: the baseline
//! [`header_size`] is rounded up to the first `R * 2^k` that also fits the
//! ledger text. The reader walks the same `R * 2^k` sizes from the smallest and keeps
//! the first region that parses and whose ledger accounts for every byte
//! between the salt and the trailer.

use std::collections::VecDeque;

use crate::config::{CHACHA_NONCE_SIZE, TAG_SIZE, TRAILER_SEPARATOR, TRAILER_TAG};
use crate::error::{Error, Result};

mod reader;
mod writer;

pub use reader::FrameReader;
pub use writer::FrameWriter;

/// Sealed length of a chunk carrying at least one plaintext byte.
pub const MIN_SEALED_LEN: u64 = (CHACHA_NONCE_SIZE + TAG_SIZE + 1) as u64;

/// Baseline trailer size for a container holding `total` bytes before the trailer.
///
/// Stays at `ratio` until `total` reaches `ratio²`, then grows by about one
/// byte per `ratio` bytes of content.
#[inline]
pub fn header_size(total: u64, ratio: u64) -> u64 {
    if ratio > total / ratio { ratio } else { (total + total / ratio) / ratio }
}

/// Trailer size the writer reserves: the smallest `ratio * 2^k` covering both
/// [`header_size`] and the encoded ledger.
pub fn trailer_size(total: u64, ratio: u64, encoded_len: usize) -> u64 {
    let target = header_size(total, ratio).max(encoded_len as u64);
    let mut size = ratio;
    while size < target {
        size = size.saturating_mul(2);
    }
    size
}

/// Every trailer size a reader must consider for `available` bytes after the salt, smallest first.
pub fn candidate_sizes(ratio: u64, available: u64) -> impl Iterator<Item = u64> {
    std::iter::successors(Some(ratio), |size| size.checked_mul(2)).take_while(move |size| *size <= available)
}

/// `"BS;len_1;...;len_n"` without padding.
pub fn encode_ledger(ledger: &[u64]) -> String {
    let mut text = String::from(TRAILER_TAG);
    for len in ledger {
        text.push(TRAILER_SEPARATOR);
        text.push_str(&len.to_string());
    }
    text
}

/// Parses a zero-padded trailer back into its ledger.
///
/// # Errors
///
/// Returns [`Error::CorruptHeader`] if the tag is missing, the ledger is
/// empty, or a token is not a plausible sealed length.
pub fn decode_ledger(trailer: &[u8]) -> Result<VecDeque<u64>> {
    let end = trailer.iter().rposition(|byte| *byte != 0).map_or(0, |last| last + 1);
    let text = std::str::from_utf8(&trailer[..end]).map_err(|_| Error::CorruptHeader("trailer is not ASCII".into()))?;

    let mut tokens = text.split(TRAILER_SEPARATOR);
    if tokens.next() != Some(TRAILER_TAG) {
        return Err(Error::CorruptHeader("trailer tag missing".into()));
    }

    let ledger = tokens
        .map(|token| match token.parse::<u64>() {
            Ok(len) if len >= MIN_SEALED_LEN => Ok(len),
            _ => Err(Error::CorruptHeader(format!("invalid chunk length {token:?}"))),
        })
        .collect::<Result<VecDeque<u64>>>()?;

    if ledger.is_empty() {
        return Err(Error::CorruptHeader("ledger is empty".into()));
    }
    Ok(ledger)
}
