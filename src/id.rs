use chrono::Utc;
use sha2::{Digest, Sha256};

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const CODE_LEN: usize = 5;

pub const ITEM_PREFIX: &str = "it";
pub const SESSION_PREFIX: &str = "ss";

fn to_base36(bytes: &[u8], len: usize) -> String {
    let mut result = String::with_capacity(len);
    for i in 0..len {
        let idx = bytes[i % bytes.len()] as usize % 36;
        result.push(BASE36[idx] as char);
    }
    result
}

/// Generate `<prefix>-<code>` where the code is derived from `seed`, the clock
/// and a nonce. `is_taken` must report every id that is live or was ever
/// handed out before, so ids are never reused.
pub fn generate_id(prefix: &str, seed: &str, is_taken: impl Fn(&str) -> bool) -> String {
    for nonce in 0u32.. {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
        hasher.update(nonce.to_le_bytes());
        let hash = hasher.finalize();
        let code = to_base36(&hash, CODE_LEN);
        let id = format!("{prefix}-{code}");
        if !is_taken(&id) {
            return id;
        }
    }
    unreachable!()
}
