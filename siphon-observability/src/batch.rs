/// Serialised records waiting to be shipped together.
///
/// `size_bytes` is the sum of the serialised record lengths; the newline
/// framing added by [`Batch::body`] is not counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<Vec<u8>>,
    size_bytes: usize,
    oldest_created_at: Option<i64>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one serialised record created at `created_at` (ms since epoch).
    pub fn push(&mut self, entry: Vec<u8>, created_at: i64) {
        self.size_bytes += entry.len();
        self.oldest_created_at = Some(match self.oldest_created_at {
            Some(oldest) => oldest.min(created_at),
            None => created_at,
        });
        self.entries.push(entry);
    }

    /// Whether `len` more bytes still fit under `max_bytes`.
    pub fn fits(&self, len: usize, max_bytes: usize) -> bool {
        self.size_bytes.saturating_add(len) <= max_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn oldest_created_at(&self) -> Option<i64> {
        self.oldest_created_at
    }

    pub fn entries(&self) -> &[Vec<u8>] {
        &self.entries
    }

    /// Newline-delimited body: every entry followed by `\n`.
    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.size_bytes + self.entries.len());
        for entry in &self.entries {
            body.extend_from_slice(entry);
            body.push(b'\n');
        }
        body
    }
}
