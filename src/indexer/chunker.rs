/// Default chunk window size in bytes.
pub const CHUNK_SIZE: usize = 500;
/// Default overlap carried between consecutive chunks, in bytes.
pub const CHUNK_OVERLAP: usize = 50;

#[derive(Debug, Clone)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
}

/// バイト位置をchar境界に切り上げる
fn ceil_char_boundary(text: &str, byte_pos: usize) -> usize {
    if byte_pos >= text.len() {
        return text.len();
    }
    let mut pos = byte_pos;
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

/// バイト位置をchar境界に切り下げる
fn floor_char_boundary(text: &str, byte_pos: usize) -> usize {
    if byte_pos >= text.len() {
        return text.len();
    }
    let mut pos = byte_pos;
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Splits text into fixed-size windows that overlap by `overlap` bytes,
/// snapped to char boundaries. Every byte of the input lands in at least
/// one chunk, and identical input always produces identical chunks.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    if text.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);

    if text.len() <= chunk_size {
        return vec![TextChunk {
            text: text.to_string(),
            chunk_index: 0,
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut chunk_index = 0;

    while start < text.len() {
        let end = ceil_char_boundary(text, (start + chunk_size).min(text.len()));

        chunks.push(TextChunk {
            text: text[start..end].to_string(),
            chunk_index,
        });
        chunk_index += 1;

        if end >= text.len() {
            break;
        }

        let next_start = if end > overlap {
            floor_char_boundary(text, end - overlap)
        } else {
            end
        };

        // Windows must always advance; when the overlap swallows the whole
        // step the next chunk starts flush at the previous end instead.
        if next_start <= start {
            start = end;
        } else {
            start = next_start;
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Undo the overlap: append each chunk minus its longest prefix that is
    /// already a suffix of the text rebuilt so far.
    fn reconstruct(chunks: &[TextChunk]) -> String {
        let mut out = String::new();
        for chunk in chunks {
            let max = out.len().min(chunk.text.len());
            let mut matched = 0;
            for k in (1..=max).rev() {
                if !chunk.text.is_char_boundary(k) {
                    continue;
                }
                if out.ends_with(&chunk.text[..k]) {
                    matched = k;
                    break;
                }
            }
            out.push_str(&chunk.text[matched..]);
        }
        out
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("", 100, 10);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("short", 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short");
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_no_bytes_lost() {
        let text: String = (0..400).map(|i| format!("word{} ", i)).collect();
        let chunks = chunk_text(&text, 100, 20);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_exact_overlap_between_neighbors() {
        // Pure ASCII, so boundary snapping never shifts the window edges.
        let text: String = (0..200).map(|i| format!("w{:04} ", i)).collect();
        let chunks = chunk_text(&text, 120, 30);
        for pair in chunks.windows(2) {
            let prev = &pair[0].text;
            let cur = &pair[1].text;
            assert_eq!(&prev[prev.len() - 30..], &cur[..30]);
        }
    }

    #[test]
    fn test_deterministic_boundaries() {
        let text: String = (0..300).map(|i| format!("token{} ", i)).collect();
        let a: Vec<String> = chunk_text(&text, 90, 15).into_iter().map(|c| c.text).collect();
        let b: Vec<String> = chunk_text(&text, 90, 15).into_iter().map(|c| c.text).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_indices_follow_document_order() {
        let text: String = (0..300).map(|i| format!("t{} ", i)).collect();
        let chunks = chunk_text(&text, 80, 10);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn test_japanese_text_chunking() {
        let text = "これはテスト文章です。日本語のマルチバイト文字を含むテキストを正しくチャンクに分割できるかを確認します。文字境界で安全に分割されることが重要です。";
        let chunks = chunk_text(text, 60, 12);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(!chunk.text.is_empty());
            assert!(text.contains(&chunk.text));
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_overlap_larger_than_chunk_still_advances() {
        // The overlap swallows the whole step, so windows degrade to
        // adjacent slices; plain concatenation must rebuild the input.
        let text: String = (0..100).map(|i| format!("x{} ", i)).collect();
        let chunks = chunk_text(&text, 40, 60);
        assert!(!chunks.is_empty());
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }
}
