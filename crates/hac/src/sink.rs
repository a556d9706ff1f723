//! A backpressure-aware output sink for the NCZ decoder: every write can
//! reject (the caller is full, or cancelling), and the decoder must stop
//! issuing further writes the moment one does.

use snafu::Snafu;

#[derive(Snafu, Debug)]
pub enum SinkError {
    #[snafu(display("sink rejected a write: {message}"))]
    Rejected { message: String },
}

/// Receives the decoder's output in strictly increasing NCA-offset order.
pub trait Sink {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError>;
}

/// An in-memory sink, for tests and small in-process decodes.
#[derive(Debug, Default)]
pub struct VecSink(pub Vec<u8>);

impl Sink for VecSink {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.0.extend_from_slice(data);
        Ok(())
    }
}
