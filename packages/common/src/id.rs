/// Sequential ID generator for persistent runtime objects
///
/// IDs never leave the process, so a plain monotonic counter is enough.
/// Zero is reserved as a niche for "never a valid ID".
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    count: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { count: 0 }
    }

    /// Generate the next sequential ID (starts at 1).
    pub fn next_id(&mut self) -> u64 {
        self.count += 1;
        self.count
    }

    pub fn last(&self) -> u64 {
        self.count
    }
}
