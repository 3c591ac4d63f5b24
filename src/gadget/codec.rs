//! Leaf file codecs
//!
//! ConfigFS exposes two textual conventions for the values this crate cares
//! about: hex attributes (`0x1d6b\n`) and plain strings (`One-KVM\n`). A few
//! config attributes (`MaxPower`) are plain decimals. Everything here is pure;
//! the scanner and the mutation engine pair these with storage calls.

/// Decode a hex attribute, accepting an optional `0x`/`0X` prefix and
/// surrounding whitespace
///
/// Returns `None` when the content is not hex or exceeds `max`.
pub fn decode_hex(content: &str, max: u32) -> Option<u32> {
    let trimmed = content.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    // Leading zeros do not count against the width
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Some(0);
    }

    u32::from_str_radix(significant, 16)
        .ok()
        .filter(|value| *value <= max)
}

/// Encode a hex attribute as lowercase `0x` + zero-padded digits + newline
pub fn encode_hex(value: u32, digits: usize) -> String {
    format!("0x{:0width$x}\n", value, width = digits)
}

/// Decode a decimal attribute
pub fn decode_dec(content: &str, max: u32) -> Option<u32> {
    let trimmed = content.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse::<u32>().ok().filter(|value| *value <= max)
}

pub fn encode_dec(value: u32) -> String {
    format!("{}\n", value)
}

/// Decode a plain string, stripping at most one trailing newline
pub fn decode_str(content: &str) -> String {
    content.strip_suffix('\n').unwrap_or(content).to_string()
}

/// Encode a plain string with exactly one trailing newline
pub fn encode_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 1);
    out.push_str(value);
    out.push('\n');
    out
}

/// Language directory name (`0x409` for US English)
pub fn encode_lang(lang: u16) -> String {
    format!("0x{:x}", lang)
}

pub fn decode_lang(name: &str) -> Option<u16> {
    decode_hex(name, u16::MAX as u32).map(|lang| lang as u16)
}
