use rand::Rng;

const COUNTRY: &str = "NL";
const BANK_CODE: &str = "SPYD";

/// Canonical form used for storage and comparison: no whitespace, upper case.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Random Dutch IBAN for this bank, e.g. `NL27SPYD0123456789`.
pub fn generate(rng: &mut impl Rng) -> String {
    let account: String = (0..10).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect();
    let bban = format!("{BANK_CODE}{account}");
    let check = 98 - mod97(&format!("{bban}{COUNTRY}00"));
    format!("{COUNTRY}{check:02}{bban}")
}

#[cfg(test)]
pub fn is_valid(iban: &str) -> bool {
    let iban = normalize(iban);
    if iban.len() < 5 || !iban.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    let (head, tail) = iban.split_at(4);
    mod97(&format!("{tail}{head}")) == 1
}

// ISO 7064 MOD 97-10 over the letter-expanded string.
fn mod97(input: &str) -> u32 {
    input.chars().fold(0, |acc, c| {
        let value = c.to_digit(36).unwrap_or(0);
        if value >= 10 {
            (acc * 100 + value) % 97
        } else {
            (acc * 10 + value) % 97
        }
    })
}
