// Reference stage implementations
pub mod lemmatizer;
pub mod pos_tagger;
pub mod sentence_splitter;
pub mod tokenizer;

// Re-exports
pub use lemmatizer::LemmatizerStage;
pub use pos_tagger::PosTaggerStage;
pub use sentence_splitter::SentenceSplitterStage;
pub use tokenizer::TokenizerStage;
