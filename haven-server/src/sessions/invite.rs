//! Group session invite codes

use rand::Rng;

pub const INVITE_CODE_LEN: usize = 8;

/// Uppercase letters and digits without look-alikes (0/O, 1/I/L)
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub fn generate_invite_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..INVITE_CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of a user-typed code, or None if it cannot be one
pub fn normalize_invite_code(input: &str) -> Option<String> {
    let code: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let valid = code.len() == INVITE_CODE_LEN && code.bytes().all(|b| ALPHABET.contains(&b));
    valid.then_some(code)
}
