use chrono::{DateTime, Utc};
use rand::Rng;

use crate::db::tx::TransactionId;

pub const PREFIX: &str = "TR";
const SUFFIX_MODULUS: i64 = 1_000_000;

/// `TR<epoch millis><6 digit suffix>`.
///
/// The suffix is the transaction id modulo one million when the id is known,
/// otherwise a random six digit number. Two references collide only if two
/// ids congruent modulo one million are stamped in the same millisecond; the
/// stores additionally enforce uniqueness.
pub fn generate(id: Option<TransactionId>, at: DateTime<Utc>) -> String {
    let suffix = match id {
        Some(id) => id.rem_euclid(SUFFIX_MODULUS),
        None => rand::thread_rng().gen_range(0..SUFFIX_MODULUS),
    };
    format!("{PREFIX}{}{suffix:06}", at.timestamp_millis())
}

pub fn is_well_formed(reference: &str) -> bool {
    reference
        .strip_prefix(PREFIX)
        .is_some_and(|digits| digits.len() > 6 && digits.bytes().all(|b| b.is_ascii_digit()))
}
