pub mod decoder;
pub mod pump;
pub mod session;
pub mod sse;
pub mod tap;

pub use decoder::Utf8StreamDecoder;
pub use pump::{abortable, process_sse_stream, SseCallbacks};
pub use session::{Accumulator, StreamCompletion, StreamSession};
pub use sse::{parse_sse_block, parse_sse_chunk, SseChunkParser, SseParseResult};
pub use tap::SseTap;
