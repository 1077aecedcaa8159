use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

static SEQ: AtomicU64 = AtomicU64::new(0);

/// Short request id for log correlation: base36 of time and pid, then the process-wide counter.
pub fn create_request_id() -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let pid = std::process::id() as u128;
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let mix = now.as_nanos() ^ (pid << 20);
    // last 40 bits are enough to tell requests apart in a log window
    format!("{}-{}", base36((mix & 0xffffffffff) as u64), base36(seq))
}

fn base36(mut v: u64) -> String {
    let alphabet = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if v == 0 {
        return "0".to_string();
    }
    let mut s = String::new();
    while v > 0 {
        s.push(alphabet[(v % 36) as usize] as char);
        v /= 36;
    }
    s.chars().rev().collect()
}
