//! Background processing: persistence batching, the item processors, the
//! keyword task, and the job queue

pub mod fanout;
pub mod keywords;
pub mod persister;
pub mod processor;
pub mod queue;

pub use fanout::{FanoutReport, FeedProcessor};
pub use keywords::{parse_keyword_response, KeywordExtractor};
pub use persister::BatchPersister;
pub use processor::{ItemProcessor, ProcessReport};
pub use queue::{IngestWorker, JobQueue, KeywordWorker, QueueStats};
