//! Bit-vector value canonicalization and delta coding
//!
//! Bit-vectors travel as ASCII text (`0`, `1`, `x`, `z`, ...), MSB first.
//! Before a value is compared or encoded it is justified to the signal
//! width using VCD left-fill rules and lower-cased. A change is then
//! expressed, cheapest first, as a code relative to the previous value,
//! a run code, or a literal that goes through the string dictionary.

use crate::format::Encoding;

/// Outcome of encoding one bit-vector change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaChoice<'a> {
    /// A built-in code; no dictionary traffic
    Builtin(Encoding),
    /// Minimal self-describing suffix to intern in the string dictionary
    Literal(&'a [u8]),
}

/// Justify `value` to `width` characters and lower-case it.
///
/// Short input is left-filled with its own first character, except that a
/// leading `1` fills with `0`. Long input keeps its leftmost `width`
/// characters.
pub fn justify(value: &[u8], width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(width);
    if value.len() >= width {
        out.extend_from_slice(&value[..width]);
    } else {
        let fill = match value.first() {
            Some(b'1') | None => b'0',
            Some(&ch) => ch,
        };
        out.resize(width - value.len(), fill);
        out.extend_from_slice(value);
    }
    out.make_ascii_lowercase();
    out
}

/// Run code when every character of `value` is the same 0/1/x/z.
pub fn run_code(value: &[u8]) -> Option<Encoding> {
    let (&first, rest) = value.split_first()?;
    if rest.iter().all(|&ch| ch == first) {
        Encoding::for_run(first)
    } else {
        None
    }
}

fn is_binary(ch: u8) -> bool {
    ch == b'0' || ch == b'1'
}

/// Unsigned magnitude of a 0/1 vector of at most 32 characters
fn magnitude(value: &[u8]) -> Option<u32> {
    value.iter().try_fold(0u32, |acc, &ch| {
        is_binary(ch).then(|| (acc << 1) | u32::from(ch & 1))
    })
}

/// Code that turns `old` into `new`, both already justified to one width.
///
/// Tried in order: complement, one-bit left shift, one-bit right shift,
/// then (widths 2..=32, pure 0/1 vectors) offsets of ±1, ±2, ±3 and, above
/// two bits, ±4 modulo the width.
pub fn relative_code(old: &[u8], new: &[u8]) -> Option<Encoding> {
    let len = new.len();
    if len == 0 || old.len() != len {
        return None;
    }

    let inverted = new.iter().zip(old).all(|(&n, &o)| match n {
        b'0' => o == b'1',
        b'1' => o == b'0',
        _ => false,
    });
    if inverted {
        return Some(Encoding::Invert);
    }

    if len == 1 {
        return None;
    }

    if old[1..] == new[..len - 1] {
        match new[len - 1] {
            b'0' => return Some(Encoding::ShiftLeft0),
            b'1' => return Some(Encoding::ShiftLeft1),
            _ => {}
        }
    } else if old[..len - 1] == new[1..] {
        match new[0] {
            b'0' => return Some(Encoding::ShiftRight0),
            b'1' => return Some(Encoding::ShiftRight1),
            _ => {}
        }
    }

    if len > 32 {
        return None;
    }
    let now = magnitude(new)?;
    let was = magnitude(old)?;
    let mask = u32::MAX >> (32 - len);
    let max_offset = if len > 2 { 4 } else { 3 };

    for offset in 1..=max_offset {
        if was.wrapping_add(offset) & mask == now {
            return Encoding::add(offset);
        }
        if was.wrapping_sub(offset) & mask == now {
            return Encoding::sub(offset);
        }
    }
    None
}

/// Pick the code for a new bit-vector value.
///
/// `previous` is `None` at the first slot of a section, where relative
/// codes are not allowed so the section decodes on its own.
pub fn choose<'a>(previous: Option<&[u8]>, value: &'a [u8]) -> DeltaChoice<'a> {
    if let Some(old) = previous {
        if let Some(code) = relative_code(old, value) {
            return DeltaChoice::Builtin(code);
        }
    }
    match run_code(value) {
        Some(code) => DeltaChoice::Builtin(code),
        None => DeltaChoice::Literal(truncate_bitvec(value)),
    }
}

/// Shortest suffix of `value` that [`justify`] expands back to `value`.
///
/// The leading run of the first character collapses to one character; a
/// run of `0` followed by `1` drops entirely since left-fill supplies the
/// zeros. A value starting with `1` is kept whole.
pub fn truncate_bitvec(value: &[u8]) -> &[u8] {
    let Some(&first) = value.first() else {
        return value;
    };
    if first == b'1' {
        return value;
    }

    let mut prev = first;
    for (i, &ch) in value.iter().enumerate().skip(1) {
        if ch != prev {
            return if prev == b'0' && ch == b'1' {
                &value[i..]
            } else {
                &value[i - 1..]
            };
        }
        prev = ch;
    }
    &value[value.len() - 1..]
}

/// Reapply a built-in relative code to `old`; the inverse of [`relative_code`].
pub fn reconstruct(old: &[u8], code: Encoding) -> Option<Vec<u8>> {
    let len = old.len();
    let flip = |ch: u8| if ch == b'0' { b'1' } else { b'0' };
    let value = match code {
        Encoding::Zeros => vec![b'0'; len],
        Encoding::Ones => vec![b'1'; len],
        Encoding::AllX => vec![b'x'; len],
        Encoding::AllZ => vec![b'z'; len],
        Encoding::Invert => old.iter().map(|&ch| flip(ch)).collect(),
        Encoding::ShiftLeft0 | Encoding::ShiftLeft1 => {
            let fill = if code == Encoding::ShiftLeft0 { b'0' } else { b'1' };
            let mut v = old.get(1..)?.to_vec();
            v.push(fill);
            v
        }
        Encoding::ShiftRight0 | Encoding::ShiftRight1 => {
            let fill = if code == Encoding::ShiftRight0 { b'0' } else { b'1' };
            let mut v = Vec::with_capacity(len);
            v.push(fill);
            v.extend_from_slice(old.get(..len.checked_sub(1)?)?);
            v
        }
        Encoding::Blackout => return None,
        arith => {
            let offset = arith.code() - Encoding::Add1.code();
            let (add, amount) = if offset < 4 {
                (true, offset + 1)
            } else {
                (false, offset - 3)
            };
            if len == 0 || len > 32 {
                return None;
            }
            let was = magnitude(old)?;
            let mask = u32::MAX >> (32 - len);
            let now = if add {
                was.wrapping_add(amount)
            } else {
                was.wrapping_sub(amount)
            } & mask;
            (0..len)
                .map(|i| b'0' | ((now >> (len - 1 - i)) & 1) as u8)
                .collect()
        }
    };
    Some(value)
}

/// Two's-complement bits of `value`, MSB first, `min(width, 32)` long.
pub fn expand_integer(width: u32, value: i32) -> Vec<u8> {
    let width = width.clamp(1, 32);
    let bits = value as u32;
    (0..width)
        .rev()
        .map(|bit| b'0' | ((bits >> bit) & 1) as u8)
        .collect()
}

/// Render a double the way `printf("%.16g")` does.
pub fn format_double(value: f64) -> String {
    const PRECISION: i32 = 16;

    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value < 0.0 { "-inf" } else { "inf" }.to_string();
    }

    let sci = format!("{:.*e}", (PRECISION - 1) as usize, value);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= PRECISION {
        let mantissa = strip_fraction_zeros(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (PRECISION - 1 - exponent) as usize;
        strip_fraction_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn strip_fraction_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}
