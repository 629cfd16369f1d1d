/// Raw transfer event as delivered by a storage client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: u8);
}

/// Maps a raw transfer event to the 0..=100 integer shown to the user.
pub fn percent(bytes_transferred: u64, total_bytes: u64) -> u8 {
    if total_bytes == 0 {
        return 0;
    }
    let pct = (100.0 * bytes_transferred as f64 / total_bytes as f64).round();
    pct.clamp(0.0, 100.0) as u8
}
