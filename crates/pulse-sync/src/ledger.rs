use dashmap::DashMap;

/// One monotonically increasing counter per logical channel.
///
/// Counters live for the process lifetime and reset on restart; clients
/// must tolerate a visible version reset after a reconnect. Versions for
/// different channels are independent and not comparable.
#[derive(Debug, Default)]
pub struct VersionLedger {
    counters: DashMap<String, u64>,
}

impl VersionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next version for a channel. Strictly greater than any
    /// version previously issued for the same channel; atomic per key.
    pub fn next(&self, channel: &str) -> u64 {
        let mut entry = self.counters.entry(channel.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Last issued version, 0 if the channel has never been stamped.
    pub fn current(&self, channel: &str) -> u64 {
        self.counters.get(channel).map(|v| *v).unwrap_or(0)
    }
}
