use crate::chunk::Chunk;

/// Separators tried from coarsest to finest: paragraph, line, sentence
/// end, comma, space.
const SEPARATORS: &[&str] = &[
    "\n\n", "\n", "。", "！", "？", ". ", "! ", "? ", "，", ", ", " ",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Upper bound on a segment, in characters.
    pub target_size: usize,
    /// Characters of the predecessor carried onto the front of each chunk.
    pub overlap_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_size: 2000,
            overlap_size: 400,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config: ChunkerConfig {
                target_size: config.target_size.max(1),
                overlap_size: config.overlap_size,
            },
        }
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Split text into overlapping, content-addressed chunks.
    ///
    /// Output depends only on `text` and the config, so repeated calls yield
    /// the same chunk IDs in the same order.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let normalized = text.replace("\r\n", "\n");

        let segments = self.recursive_split(&normalized, SEPARATORS);
        let cleaned: Vec<&str> = segments
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        cleaned
            .iter()
            .enumerate()
            .map(|(index, segment)| {
                let text = match index {
                    0 => segment.to_string(),
                    _ => self.with_overlap(cleaned[index - 1], segment),
                };
                Chunk::new(text, index)
            })
            .collect()
    }

    fn recursive_split(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let target = self.config.target_size;

        if char_len(text) <= target {
            return vec![text.to_string()];
        }

        let Some((separator, finer)) = separators.split_first() else {
            return self.hard_split(text);
        };

        // Greedily pack separator-delimited parts up to the target size
        let mut packed = Vec::new();
        let mut buffer = String::new();
        let mut buffer_len = 0;

        for part in text.split_inclusive(*separator) {
            let part_len = char_len(part);

            if buffer_len + part_len > target && !buffer.is_empty() {
                packed.push(std::mem::take(&mut buffer));
                buffer_len = 0;
            }

            buffer.push_str(part);
            buffer_len += part_len;
        }

        if !buffer.is_empty() {
            packed.push(buffer);
        }

        // Only oversized segments fall through to the next separator
        packed
            .into_iter()
            .flat_map(|segment| {
                if char_len(&segment) > target {
                    self.recursive_split(&segment, finer)
                } else {
                    vec![segment]
                }
            })
            .collect()
    }

    /// Last resort for runs with no separator at all.
    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.config.target_size)
            .map(|piece| piece.iter().collect())
            .collect()
    }

    fn with_overlap(&self, previous: &str, current: &str) -> String {
        let overlap = self.config.overlap_size;

        if overlap == 0 || overlap >= char_len(current) {
            return current.to_string();
        }

        let tail = tail_chars(previous, overlap);
        format!("{}{}", tail, current).trim().to_string()
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn tail_chars(text: &str, count: usize) -> &str {
    let skip = char_len(text).saturating_sub(count);
    match text.char_indices().nth(skip) {
        Some((byte_index, _)) => &text[byte_index..],
        None => "",
    }
}
