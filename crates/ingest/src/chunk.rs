use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub sequence_index: usize,
}

impl Chunk {
    pub fn new(text: String, sequence_index: usize) -> Self {
        // Identity comes from content only, never from position
        let chunk_id = Self::generate_chunk_id(&text);

        Self {
            chunk_id,
            text,
            sequence_index,
        }
    }

    pub fn generate_chunk_id(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }

    /// Length in characters, which is the unit the splitter budgets in.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_depends_on_text_only() {
        let a = Chunk::new("张三拔剑。".to_string(), 0);
        let b = Chunk::new("张三拔剑。".to_string(), 7);
        let c = Chunk::new("李四拔剑。".to_string(), 0);

        assert_eq!(a.chunk_id, b.chunk_id);
        assert_ne!(a.chunk_id, c.chunk_id);
        assert_eq!(a.chunk_id.len(), 32);
    }

    #[test]
    fn test_char_len_counts_characters() {
        let chunk = Chunk::new("萧中慧".to_string(), 0);
        assert_eq!(chunk.char_len(), 3);
    }
}
