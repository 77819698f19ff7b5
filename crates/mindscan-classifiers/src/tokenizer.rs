//! Text preprocessing into fixed-length token encodings

use crate::model_loader::find_tokenizer_file;
use mindscan_core::{Error, Result, TokenizedInput};
use std::path::Path;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::debug;

const PAD_TOKEN: &str = "[PAD]";

/// Subword tokenizer producing fixed-length, right-padded encodings.
///
/// Truncation keeps the head of the text and the boundary markers; padding
/// and the attention mask are produced in lockstep by the tokenizer itself.
pub struct Preprocessor {
    tokenizer: Tokenizer,
    max_length: usize,
    pad_id: u32,
}

impl Preprocessor {
    /// Wrap a tokenizer, forcing truncation and padding to `max_length`
    pub fn new(mut tokenizer: Tokenizer, max_length: usize) -> Result<Self> {
        if max_length < 2 {
            return Err(Error::tokenizer(format!(
                "max_length {} cannot hold boundary markers",
                max_length
            )));
        }

        let pad_id = tokenizer
            .token_to_id(PAD_TOKEN)
            .or_else(|| tokenizer.get_padding().map(|p| p.pad_id))
            .unwrap_or(0);

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| Error::tokenizer(format!("Failed to configure truncation: {}", e)))?;

        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            pad_id,
            pad_token: PAD_TOKEN.to_string(),
            ..Default::default()
        }));

        Ok(Self {
            tokenizer,
            max_length,
            pad_id,
        })
    }

    /// Load from `tokenizer.json`, `vocab.txt`, or a directory holding either
    pub fn from_path(path: &Path, max_length: usize) -> Result<Self> {
        Self::new(load_tokenizer(path)?, max_length)
    }

    /// Encode text into exactly `max_length` ids and mask entries
    pub fn tokenize(&self, text: &str) -> Result<TokenizedInput> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::tokenizer(format!("Tokenization failed: {}", e)))?;

        debug!(
            "Tokenized {} chars into {} positions",
            text.chars().count(),
            encoding.get_ids().len()
        );

        TokenizedInput::new(
            encoding.get_ids().to_vec(),
            encoding.get_attention_mask().to_vec(),
            self.max_length,
        )
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}

/// Load a tokenizer from a file or directory
pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    let file = if path.is_dir() {
        find_tokenizer_file(path).ok_or_else(|| {
            Error::tokenizer(format!(
                "No tokenizer found in {} (tried tokenizer.json, vocab.txt)",
                path.display()
            ))
        })?
    } else {
        path.to_path_buf()
    };

    if !file.exists() {
        return Err(Error::tokenizer(format!(
            "Tokenizer file does not exist: {}",
            file.display()
        )));
    }

    if file.extension().and_then(|e| e.to_str()) == Some("txt") {
        debug!("Building tokenizer from {}", file.display());
        return wordpiece_from_vocab(&file);
    }

    debug!("Loading tokenizer from {}", file.display());
    Tokenizer::from_file(&file)
        .map_err(|e| Error::tokenizer(format!("Failed to load {}: {}", file.display(), e)))
}

/// Uncased BERT-style WordPiece tokenizer with `[CLS]`/`[SEP]` markers
fn wordpiece_from_vocab(vocab_path: &Path) -> Result<Tokenizer> {
    let wordpiece = WordPiece::from_file(vocab_path.to_string_lossy().as_ref())
        .unk_token("[UNK]".to_string())
        .build()
        .map_err(|e| Error::tokenizer(format!("Failed to build WordPiece model: {}", e)))?;

    let mut tokenizer = Tokenizer::new(wordpiece);
    tokenizer.with_normalizer(Some(BertNormalizer::default()));
    tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));

    let special = |token: &str| {
        tokenizer
            .token_to_id(token)
            .map(|id| (token.to_string(), id))
            .ok_or_else(|| Error::tokenizer(format!("Vocabulary has no {} token", token)))
    };
    let sep = special("[SEP]")?;
    let cls = special("[CLS]")?;

    tokenizer.with_post_processor(Some(BertProcessing::new(sep, cls)));

    Ok(tokenizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const VOCAB: &str = "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\ni\nfeel\nvery\nanxious\nand\nworried\nabout\neverything\n.\n";

    fn preprocessor(max_length: usize) -> (tempfile::TempDir, Preprocessor) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vocab.txt"), VOCAB).unwrap();
        let pre = Preprocessor::from_path(dir.path(), max_length).unwrap();
        (dir, pre)
    }

    #[test]
    fn test_short_text_is_padded_right() {
        let (_dir, pre) = preprocessor(8);
        let input = pre.tokenize("I feel").unwrap();

        assert_eq!(input.input_ids(), &[2, 5, 6, 3, 0, 0, 0, 0]);
        assert_eq!(input.attention_mask(), &[1, 1, 1, 1, 0, 0, 0, 0]);
        assert_eq!(pre.pad_id(), 0);
    }

    #[test]
    fn test_single_character_input() {
        let (_dir, pre) = preprocessor(16);
        let input = pre.tokenize("i").unwrap();

        assert_eq!(input.len(), 16);
        assert_eq!(input.real_token_count(), 3);
    }

    #[test]
    fn test_long_text_truncates_head_anchored() {
        let (_dir, pre) = preprocessor(6);
        let input = pre
            .tokenize("I feel very anxious and worried about everything.")
            .unwrap();

        // [CLS] i feel very anxious [SEP]
        assert_eq!(input.input_ids(), &[2, 5, 6, 7, 8, 3]);
        assert_eq!(input.real_token_count(), 6);
    }

    #[test]
    fn test_tokenization_is_deterministic() {
        let (_dir, pre) = preprocessor(32);
        let text = "I feel very anxious and worried about everything.";
        assert_eq!(pre.tokenize(text).unwrap(), pre.tokenize(text).unwrap());
    }

    #[test]
    fn test_missing_tokenizer_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Preprocessor::from_path(dir.path(), 16).is_err());
        assert!(Preprocessor::from_path(&dir.path().join("tokenizer.json"), 16).is_err());
    }

    #[test]
    fn test_vocab_without_markers_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vocab.txt"), "[PAD]\n[UNK]\nhello\n").unwrap();
        assert!(Preprocessor::from_path(dir.path(), 16).is_err());
    }

    proptest! {
        #[test]
        fn prop_length_is_always_max_length(text in "[a-zA-Z .,!?']{1,600}") {
            let (_dir, pre) = preprocessor(24);
            let input = pre.tokenize(&text).unwrap();
            prop_assert_eq!(input.len(), 24);
            prop_assert_eq!(input.attention_mask().len(), 24);
            prop_assert_eq!(input.input_ids()[0], 2);

            // mask is a run of ones followed by zeros
            let real = input.real_token_count();
            prop_assert!(input.attention_mask()[..real].iter().all(|&m| m == 1));
            prop_assert!(input.input_ids()[real..].iter().all(|&id| id == 0));
        }
    }
}
