use super::{FrameParser, ParseContext};
use crate::error::TsResult;

/// Sink for streams nobody plays.
pub(crate) struct NullFramer;

impl FrameParser for NullFramer {
    fn parse(&mut self, data: &[u8], _ctx: &mut ParseContext) -> TsResult<usize> {
        Ok(data.len())
    }
}
