use std::future::Future;

use rand::Rng;

use crate::error::BookingError;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Attempt cap for standalone appointment creation.
pub const SINGLE_CODE_RETRIES: u32 = 100;
/// Tighter per-code cap for paths that draw several codes in one request.
pub const GROUP_CODE_RETRIES: u32 = 10;

fn segment<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// One candidate appointment code: two base-36 segments, 2 + 6 uppercase
/// characters.
pub fn candidate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{}{}", segment(rng, 2), segment(rng, 6))
}

/// Draws candidate codes until `exists` reports one unused, up to
/// `max_attempts`. Exhaustion is a conflict the caller may retry.
pub async fn unique_code<R, F, Fut>(
    rng: &mut R,
    max_attempts: u32,
    mut exists: F,
) -> Result<String, BookingError>
where
    R: Rng + ?Sized,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, BookingError>>,
{
    for _ in 0..max_attempts {
        let code = candidate_code(rng);
        if !exists(code.clone()).await? {
            return Ok(code);
        }
    }
    Err(BookingError::conflict(
        "could not allocate a unique appointment code",
    ))
}
