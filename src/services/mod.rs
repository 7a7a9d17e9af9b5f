pub mod code_reader;
pub mod marking_feed;
pub mod page_classifier;
pub mod review_writer;

pub use code_reader::{CodeReader, PageReading, QrSymbolDecoder, SymbolDecoder};
pub use marking_feed::{ImageRef, MarkingFeed, QuestionPages};
pub use page_classifier::{Classification, PageClassifier};
pub use review_writer::ReviewWriter;
