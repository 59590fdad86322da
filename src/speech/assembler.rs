//! Audio chunk assembly. No re-encoding: the streamed formats are valid when
//! fragments are concatenated in arrival order.

use super::sentence::AudioChunk;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledAudio {
    pub bytes: Vec<u8>,
}

impl AssembledAudio {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Concatenate chunks in index order.
pub fn assemble(chunks: &[AudioChunk]) -> AssembledAudio {
    let mut ordered: Vec<&AudioChunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);

    let mut bytes = Vec::with_capacity(chunks.iter().map(|c| c.data.len()).sum());
    for chunk in ordered {
        bytes.extend_from_slice(&chunk.data);
    }
    AssembledAudio { bytes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(index: usize, data: &[u8]) -> AudioChunk {
        AudioChunk {
            index,
            data: data.to_vec(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn concatenates_uneven_fragments_in_arrival_order() {
        let fragments: Vec<Vec<u8>> = vec![vec![1], (2..50).collect(), vec![], vec![50, 51], (52..=255).collect()];
        let chunks: Vec<AudioChunk> = fragments.iter().enumerate().map(|(i, f)| chunk(i, f)).collect();

        let merged = assemble(&chunks);
        let expected: Vec<u8> = fragments.concat();
        assert_eq!(merged.bytes, expected);
        assert_eq!(merged.len(), expected.len());
    }

    #[test]
    fn index_order_wins_over_slice_order() {
        let chunks = vec![chunk(1, b"world"), chunk(0, b"hello ")];
        assert_eq!(assemble(&chunks).bytes, b"hello world".to_vec());
    }

    #[test]
    fn empty_and_repeatable() {
        assert!(assemble(&[]).is_empty());
        let chunks = vec![chunk(0, b"ab")];
        assert_eq!(assemble(&chunks), assemble(&chunks));
    }
}
